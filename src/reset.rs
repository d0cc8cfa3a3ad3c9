//! Daily reset: archive prior trip-days and seed `waiting` rows for the new one.
use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::ServiceClock;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetReport {
    pub trip_day: NaiveDate,
    /// Prior-day records moved to the archive.
    pub archived: u64,
    /// `waiting` records created for `trip_day`.
    pub seeded: u64,
}

/// Prepare `day`. Safe to repeat: existing rows for `day` are never touched,
/// so a second run seeds nothing and cannot regress a boarded student.
#[instrument(skip(pool))]
pub async fn reset_for_day(pool: &Pool, day: NaiveDate, now: DateTime<Utc>) -> Result<ResetReport> {
    let mut tx = pool.begin().await?;
    let archived = db::archive_boarding_before(&mut tx, day, now).await?;
    let pruned = db::prune_scan_guard_before(&mut tx, day).await?;
    let seeded = db::seed_waiting_records(&mut tx, day, now).await?;
    db::record_reset_run(&mut tx, day, archived, seeded, now).await?;
    tx.commit().await?;

    info!(%day, archived, seeded, pruned, "daily reset finished");
    Ok(ResetReport {
        trip_day: day,
        archived,
        seeded,
    })
}

/// Run the reset for the current trip-day unless it already ran.
pub async fn reset_if_due(
    pool: &Pool,
    clock: &ServiceClock,
    now: DateTime<Utc>,
) -> Result<Option<ResetReport>> {
    let today = clock.trip_day(now);
    match db::last_reset_day(pool).await? {
        Some(last) if last >= today => Ok(None),
        _ => reset_for_day(pool, today, now).await.map(Some),
    }
}

/// Poll forever, resetting once per new trip-day.
pub async fn run_reset_loop(pool: Pool, clock: ServiceClock, poll: Duration) {
    info!(poll_seconds = poll.as_secs(), "reset worker started");
    loop {
        match reset_if_due(&pool, &clock, Utc::now()).await {
            Ok(Some(report)) => info!(day = %report.trip_day, "new trip-day prepared"),
            Ok(None) => {}
            Err(err) => error!(?err, "daily reset failed"),
        }
        tokio::time::sleep(poll).await;
    }
}
