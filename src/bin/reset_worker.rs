use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use ridewatch::config;
use ridewatch::db;
use ridewatch::reset;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Prepare each new trip-day: archive prior records and seed waiting ones"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run one reset check and exit instead of polling
    #[arg(long)]
    once: bool,
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
    let clock = cfg.clock();

    if args.once {
        match reset::reset_if_due(&pool, &clock, chrono::Utc::now()).await? {
            Some(report) => info!(
                day = %report.trip_day,
                archived = report.archived,
                seeded = report.seeded,
                "reset complete"
            ),
            None => info!("trip-day already prepared, nothing to do"),
        }
        return Ok(());
    }

    reset::run_reset_loop(pool, clock, Duration::from_secs(cfg.app.reset_poll_seconds)).await;
    Ok(())
}
