//! calendarView fetch and event normalization

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use url::Url;

use super::client::{ApiClient, ApiRequest};
use crate::error::{ApiError, ConfigurationError};
use crate::models::{CalendarDateWindow, CalendarEvent, FetchedEvents};

/// Ask Graph to render event times in UTC so they can be localized here.
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";

#[derive(Debug, Deserialize)]
struct CalendarViewPage {
    value: Vec<serde_json::Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    subject: Option<String>,
    start: DateTimeTimeZone,
    #[serde(default)]
    is_all_day: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateTimeTimeZone {
    date_time: String,
    #[serde(default)]
    time_zone: Option<String>,
}

/// Fetches one day of events through the authenticated client.
pub struct CalendarViewFetcher<Tz: TimeZone> {
    client: Arc<ApiClient>,
    endpoint: Url,
    tz: Tz,
    max_pages: usize,
}

impl<Tz: TimeZone> CalendarViewFetcher<Tz> {
    pub fn new(
        client: Arc<ApiClient>,
        tz: Tz,
        max_pages: usize,
    ) -> Result<Self, ConfigurationError> {
        let endpoint = client.broker().authority().calendar_view_url()?;
        Ok(Self {
            client,
            endpoint,
            tz,
            max_pages: max_pages.max(1),
        })
    }

    /// Events inside `window`, in the order the API returned them.
    pub async fn fetch_events(&self, window: &CalendarDateWindow) -> Result<FetchedEvents, ApiError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().extend_pairs(window.query_params());

        let mut fetched = FetchedEvents::default();
        let mut next = Some(url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            let request = ApiRequest::get(url).header("Prefer", PREFER_UTC);
            let body = self.client.send(&request).await?;
            let page: CalendarViewPage = serde_json::from_str(&body)
                .map_err(|e| ApiError::MalformedResponse(format!("calendarView: {}", e)))?;

            for item in page.value {
                match parse_event(item, &self.tz) {
                    Ok(event) => fetched.events.push(event),
                    Err(reason) => {
                        tracing::warn!("Skipping calendar item: {}", reason);
                        fetched.skipped += 1;
                    }
                }
            }

            pages += 1;
            next = match page.next_link {
                Some(_) if pages >= self.max_pages => {
                    tracing::warn!("Stopping after {} pages; more events available", pages);
                    None
                }
                Some(link) => Some(Url::parse(&link).map_err(|e| {
                    ApiError::MalformedResponse(format!("bad @odata.nextLink '{}': {}", link, e))
                })?),
                None => None,
            };
        }

        tracing::info!(
            "Fetched {} events ({} skipped)",
            fetched.events.len(),
            fetched.skipped
        );
        Ok(fetched)
    }
}

fn parse_event<Tz: TimeZone>(item: serde_json::Value, tz: &Tz) -> Result<CalendarEvent, String> {
    let raw: RawEvent = serde_json::from_value(item).map_err(|e| e.to_string())?;
    // All-day events start at midnight in whatever zone was asked for; they
    // have no instant to convert.
    let start_local_time = if raw.is_all_day {
        wall_time(&raw.start.date_time)?
    } else {
        local_start_time(&raw.start, tz)?
    };
    Ok(CalendarEvent {
        subject: raw.subject.unwrap_or_default(),
        start_local_time,
    })
}

/// Time of day in `tz`. UTC (or unlabelled) timestamps are converted; a
/// timestamp labelled with any other zone is already local wall time.
fn local_start_time<Tz: TimeZone>(start: &DateTimeTimeZone, tz: &Tz) -> Result<NaiveTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&start.date_time) {
        return Ok(dt.with_timezone(tz).time());
    }

    let naive = parse_naive(&start.date_time)?;

    let is_utc = start
        .time_zone
        .as_deref()
        .map_or(true, |zone| zone.eq_ignore_ascii_case("UTC"));
    if is_utc {
        Ok(Utc.from_utc_datetime(&naive).with_timezone(tz).time())
    } else {
        Ok(naive.time())
    }
}

fn wall_time(date_time: &str) -> Result<NaiveTime, String> {
    match DateTime::parse_from_rfc3339(date_time) {
        Ok(dt) => Ok(dt.naive_local().time()),
        Err(_) => parse_naive(date_time).map(|naive| naive.time()),
    }
}

fn parse_naive(date_time: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| format!("unparsable start '{}': {}", date_time, e))
}
