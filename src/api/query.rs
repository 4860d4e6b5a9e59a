//! Day window construction for calendarView queries

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::QueryError;
use crate::models::CalendarDateWindow;

/// Step used to search past a daylight-saving gap at midnight.
const GAP_PROBE_MINUTES: i64 = 30;
const GAP_PROBE_LIMIT: i64 = 8;

/// Converts a selected date into the UTC window of that local day.
#[derive(Debug, Clone)]
pub struct CalendarQueryBuilder<Tz: TimeZone> {
    tz: Tz,
}

impl<Tz: TimeZone> CalendarQueryBuilder<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// `[midnight(d), midnight(d + 1 day))` in UTC.
    ///
    /// The window spans one local calendar day, so it is 23 or 25 hours wide
    /// on daylight-saving transition days and 24 hours otherwise.
    pub fn build_window(&self, selected: Option<NaiveDate>) -> Result<CalendarDateWindow, QueryError> {
        let date = selected.ok_or(QueryError::NoDateSelected)?;
        let next = date.succ_opt().ok_or(QueryError::OutOfRange(date))?;

        let window = CalendarDateWindow {
            start_utc: local_midnight(&self.tz, date).ok_or(QueryError::OutOfRange(date))?,
            end_utc: local_midnight(&self.tz, next).ok_or(QueryError::OutOfRange(date))?,
        };
        tracing::debug!(
            "Window for {}: {} .. {}",
            date,
            window.start_utc,
            window.end_utc
        );
        Ok(window)
    }
}

/// First instant of `date` in `tz`. When midnight falls in a DST gap the
/// day starts at the first wall-clock time that exists.
fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=GAP_PROBE_LIMIT)
        .map(|step| midnight + Duration::minutes(step * GAP_PROBE_MINUTES))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
