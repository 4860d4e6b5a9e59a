//! Calendar event and query window models

use chrono::{DateTime, NaiveTime, Utc};

/// Wire format for window bounds: zero-padded, UTC, locale independent.
const WINDOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Half-open `[start_utc, end_utc)` window covering one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDateWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

impl CalendarDateWindow {
    /// `startdatetime` / `enddatetime` query parameters for calendarView.
    pub fn query_params(&self) -> [(&'static str, String); 2] {
        [
            ("startdatetime", self.start_utc.format(WINDOW_FORMAT).to_string()),
            ("enddatetime", self.end_utc.format(WINDOW_FORMAT).to_string()),
        ]
    }
}

/// Calendar entry as shown in the day view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub subject: String,
    pub start_local_time: NaiveTime,
}

/// Events in API order, plus how many items could not be parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedEvents {
    pub events: Vec<CalendarEvent>,
    pub skipped: usize,
}
