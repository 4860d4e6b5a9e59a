//! Calendar API: authenticated client, day window queries and event fetch

pub mod calendar;
pub mod client;
pub mod query;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::auth::{AadProvider, TokenBroker};
use crate::config::Settings;
use crate::models::FetchedEvents;

pub use calendar::CalendarViewFetcher;
pub use client::ApiClient;
pub use query::CalendarQueryBuilder;

/// Day queries sharing one broker, so tokens are reused across selections.
pub struct DayView<Tz: TimeZone> {
    builder: CalendarQueryBuilder<Tz>,
    fetcher: CalendarViewFetcher<Tz>,
}

impl DayView<Local> {
    /// Wire broker, client and fetcher from settings, in the local time zone.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let authority = Arc::new(
            settings
                .authority_config()
                .context("Invalid configuration")?,
        );
        let provider = Arc::new(AadProvider::new(&authority).context("Invalid configuration")?);
        let broker = Arc::new(TokenBroker::new(authority, provider));
        Self::new(Arc::new(ApiClient::new(broker)), Local, settings.max_pages)
    }
}

impl<Tz: TimeZone> DayView<Tz> {
    pub fn new(client: Arc<ApiClient>, tz: Tz, max_pages: usize) -> Result<Self> {
        Ok(Self {
            builder: CalendarQueryBuilder::new(tz.clone()),
            fetcher: CalendarViewFetcher::new(client, tz, max_pages)
                .context("Invalid configuration")?,
        })
    }

    pub async fn events_on(&self, date: Option<NaiveDate>) -> Result<FetchedEvents> {
        let window = self.builder.build_window(date)?;
        let fetched = self
            .fetcher
            .fetch_events(&window)
            .await
            .context("Failed to fetch calendar")?;
        Ok(fetched)
    }
}

/// Print one day of events.
pub async fn show_day(settings: &Settings, date: Option<NaiveDate>) -> Result<()> {
    let view = DayView::connect(settings)?;
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let fetched = view.events_on(Some(date)).await?;
    print_events(date, &fetched);
    Ok(())
}

/// Interactive day selector: one date per line from stdin.
pub async fn agenda(settings: &Settings) -> Result<()> {
    let view = DayView::connect(settings)?;
    // Once a device code sign-in has listened for Ctrl-C, SIGINT no longer
    // ends the process on its own.
    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            futures::future::pending::<()>().await;
        }
    };
    run_agenda(&view, BufReader::new(tokio::io::stdin()), interrupted).await
}

async fn run_agenda<Tz, R, F>(view: &DayView<Tz>, input: R, shutdown: F) -> Result<()>
where
    Tz: TimeZone,
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    println!("Enter a date (YYYY-MM-DD, today, tomorrow, yesterday) or 'q' to quit.");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = &mut shutdown => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        let date = match parse_selection(input) {
            Ok(date) => date,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };

        match view.events_on(date).await {
            Ok(fetched) => {
                if let Some(date) = date {
                    print_events(date, &fetched);
                }
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

/// Blank input means nothing is selected; the query layer rejects it.
fn parse_selection(input: &str) -> Result<Option<NaiveDate>> {
    let today = Local::now().date_naive();
    let date = match input.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "today" => today,
        "tomorrow" => today.succ_opt().context("Date out of range")?,
        "yesterday" => today.pred_opt().context("Date out of range")?,
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
            .with_context(|| format!("Not a date: '{}'", other))?,
    };
    Ok(Some(date))
}

fn print_events(date: NaiveDate, fetched: &FetchedEvents) {
    println!("\n{}:", date.format("%A %Y-%m-%d"));
    println!("{:-<40}", "");
    for event in &fetched.events {
        println!("{}: {}", event.subject, event.start_local_time.format("%H:%M"));
    }
    if fetched.events.is_empty() {
        println!("  (no events)");
    }
    if fetched.skipped > 0 {
        println!("({} unreadable items skipped)", fetched.skipped);
    }
}
