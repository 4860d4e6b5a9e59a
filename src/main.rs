//! dayview - Microsoft 365 calendar day view
//!
//! Signs in against Azure AD and lists a selected day's calendar entries.

mod api;
mod auth;
mod config;
mod error;
mod models;

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "dayview")]
#[command(about = "Show a day of your Microsoft 365 calendar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and show the account and granted scopes
    Login,

    /// List events for one day
    Events {
        /// Day to show, YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Pick days interactively, one date per line
    Agenda,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login => {
            tracing::info!("Starting authentication flow...");
            auth::login(&settings).await?;
        }
        Commands::Events { date } => {
            api::show_day(&settings, date).await?;
        }
        Commands::Agenda => {
            api::agenda(&settings).await?;
        }
    }

    Ok(())
}
