use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod calendar;
mod clock;
mod config;
mod db;
mod dispatch;
mod error;
mod kv;
mod message;
mod models;
mod push;
mod report;
mod subscriptions;

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::kv::{KvStore, MemoryKv};
use crate::models::{DayInfo, Slot};
use crate::push::{PushTransport, WebPushTransport};
use crate::subscriptions::SubscriptionStore;

#[derive(Parser)]
#[command(name = "school-cycle")]
#[command(about = "Six-day school cycle calendar and daily push reminders", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
        bind: String,
        #[arg(long, value_enum, default_value_t = StoreKind::Postgres)]
        store: StoreKind,
    },
    /// Send one slot's notification to every subscription
    Send {
        #[arg(long, value_enum, default_value_t = Slot::Morning)]
        slot: Slot,
    },
    /// Show today's cycle day and the next school day
    Today,
    /// Generate a markdown overview of the calendar
    Report {
        /// Limit the listing to one month, as YYYY-MM
        #[arg(long)]
        month: Option<String>,
        #[arg(long, default_value = "calendar.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_kv(settings: &Settings, kind: StoreKind) -> anyhow::Result<Arc<dyn KvStore>> {
    match kind {
        StoreKind::Postgres => {
            let pool = db::connect(settings.database_url()?).await?;
            Ok(Arc::new(db::PgKv::new(pool)))
        }
        StoreKind::Memory => {
            info!("using in-memory store; subscriptions are lost on restart");
            Ok(Arc::new(MemoryKv::new()))
        }
    }
}

fn push_transport(settings: &Settings) -> anyhow::Result<Arc<dyn PushTransport>> {
    let transport = WebPushTransport::new(settings.vapid_private_key()?, &settings.vapid_subject)?;
    Ok(Arc::new(transport))
}

fn describe_day(info: Option<&DayInfo>) -> String {
    match info {
        None => "no entry".to_string(),
        Some(info) => {
            let mut parts = Vec::new();
            if let Some(cycle_day) = info.cycle_day {
                parts.push(cycle_day.to_string());
            }
            if let Some(special) = info.special {
                parts.push(special.to_string());
            }
            if let Some(label) = &info.label {
                parts.push(label.clone());
            }
            parts.join(", ")
        }
    }
}

/// Push is optional for the server: calendar and subscription routes work without keys.
fn optional_push_transport(settings: &Settings) -> anyhow::Result<Option<Arc<dyn PushTransport>>> {
    if settings.vapid_private_key().is_err() {
        warn!("VAPID_PRIVATE_KEY not set; send and test endpoints will answer 503");
        return Ok(None);
    }
    push_transport(settings).map(Some)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = cli.settings;

    match cli.command {
        Commands::InitDb => {
            let pool = db::connect(settings.database_url()?).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Serve { bind, store } => {
            let calendar = Arc::new(calendar::build_school_calendar(
                settings.exceptions.as_deref(),
            )?);
            let kv = open_kv(&settings, store).await?;
            let transport = optional_push_transport(&settings)?;
            info!(?settings, days = calendar.len(), "starting school-cycle service");

            let state = api::AppState::new(calendar, SubscriptionStore::new(kv), transport, settings);
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            info!(%bind, "listening");
            axum::serve(listener, api::router(state))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
        Commands::Send { slot } => {
            let calendar = Arc::new(calendar::build_school_calendar(
                settings.exceptions.as_deref(),
            )?);
            let kv = open_kv(&settings, StoreKind::Postgres).await?;
            let dispatcher =
                Dispatcher::new(calendar, SubscriptionStore::new(kv), push_transport(&settings)?);
            let report = dispatcher.dispatch(slot, Utc::now()).await?;

            if report.skipped {
                println!("Already sent the {} notification for {}.", report.slot, report.date);
            } else {
                println!(
                    "Sent {} notification for {}: {} delivered, {} failed.",
                    report.slot, report.date, report.sent, report.failed
                );
            }
        }
        Commands::Today => {
            let table = calendar::build_school_calendar(settings.exceptions.as_deref())?;
            let now = Utc::now();
            let today = clock::today_info(&table, now);
            let next = clock::next_school_day_info(&table, now);

            println!("Today {}: {}", today.date, describe_day(today.info.as_ref()));
            match next.info {
                Some(info) => println!(
                    "Next school day {}{}: {}",
                    next.date,
                    if next.is_tomorrow { " (tomorrow)" } else { "" },
                    describe_day(Some(&info))
                ),
                None => println!("No school days left this year."),
            }
        }
        Commands::Report { month, out } => {
            let table = calendar::build_school_calendar(settings.exceptions.as_deref())?;
            let month = month
                .map(|value| calendar::parse_date_key(&format!("{value}-01")))
                .transpose()
                .context("--month must be YYYY-MM")?;
            let report = report::build_report(&table, month);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_without_a_private_key() {
        let settings = Settings::default();
        assert!(optional_push_transport(&settings).unwrap().is_none());
    }

    #[test]
    fn malformed_private_key_still_fails_startup() {
        let settings = Settings {
            vapid_private_key: Some("not a key".to_string()),
            ..Settings::default()
        };
        assert!(optional_push_transport(&settings).is_err());
    }
}
