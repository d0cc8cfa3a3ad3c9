use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use ridewatch::config;
use ridewatch::db;
use ridewatch::model::{Direction, GeoPoint, PhaseAction, ScanRequest};
use ridewatch::reset;
use ridewatch::RideService;

#[derive(Debug, Parser)]
#[command(author, version, about = "School-bus ride events: scans, boarding state and guardian notifications")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record one card scan from a reader device
    Scan {
        #[arg(long)]
        card: String,
        #[arg(long)]
        driver: i64,
        /// Direction reported by the device; defaults to the driver's phase
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
        /// Scan time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Opaque device metadata as a JSON document
        #[arg(long)]
        metadata: Option<serde_json::Value>,
    },
    /// Change a driver's trip phase
    Phase {
        #[arg(long)]
        driver: i64,
        #[arg(long, value_enum)]
        action: ActionArg,
    },
    /// Report a driver's position
    Position {
        #[arg(long)]
        driver: i64,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
    },
    /// Mark a student absent for a trip-day
    Absence {
        #[arg(long)]
        student: i64,
        /// Trip-day (YYYY-MM-DD); defaults to the current one
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the daily reset for a trip-day
    Reset {
        /// Trip-day (YYYY-MM-DD); defaults to the current one
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Poll and reset once per new trip-day
    RunResetLoop,
    /// List failed notification deliveries
    FailedDeliveries {
        /// Look back this many hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Outbound,
    Return,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Outbound => Direction::Outbound,
            DirectionArg::Return => Direction::Return,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    StartDuty,
    ReverseDirection,
    EndDuty,
}

impl From<ActionArg> for PhaseAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::StartDuty => PhaseAction::StartDuty,
            ActionArg::ReverseDirection => PhaseAction::ReverseDirection,
            ActionArg::EndDuty => PhaseAction::EndDuty,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let service = RideService::from_config(pool.clone(), &cfg)?;
    let now = Utc::now();

    match args.command {
        Command::Scan {
            card,
            driver,
            direction,
            lat,
            lon,
            at,
            metadata,
        } => {
            let req = ScanRequest {
                card_id: card,
                driver_id: driver,
                direction: direction.map(Direction::from),
                coords: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
                at: at.unwrap_or(now),
                metadata,
            };
            let receipt = service.record_scan(req).await?;
            print_json(&receipt)?;
        }
        Command::Phase { driver, action } => {
            let phase = service.set_driver_phase(driver, action.into(), now).await?;
            print_json(&phase)?;
        }
        Command::Position { driver, lat, lon } => {
            service.report_position(driver, lat, lon, now).await?;
            info!(driver, lat, lon, "position recorded");
        }
        Command::Absence { student, date } => {
            let receipt = service.request_absence(student, date, now).await?;
            print_json(&receipt)?;
        }
        Command::Reset { date } => {
            let day = date.unwrap_or_else(|| service.clock().trip_day(now));
            let report = service.reset_for_day(day).await?;
            print_json(&report)?;
        }
        Command::RunResetLoop => {
            let poll = Duration::from_secs(cfg.app.reset_poll_seconds);
            reset::run_reset_loop(pool, cfg.clock(), poll).await;
        }
        Command::FailedDeliveries { hours } => {
            let since = now - chrono::Duration::hours(hours);
            let rows = service.failed_deliveries(since).await?;
            print_json(&rows)?;
        }
    }
    Ok(())
}
