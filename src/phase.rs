//! Trip phase controller: per-driver duty/direction state.
//!
//! The live phase sits on the driver row and every change is appended to
//! `driver_phase_log`, which scans consult as of their own timestamp.
use crate::db::{self, DriverRow, Pool};
use crate::error::{Result, RideError};
use crate::model::{DriverId, PhaseAction, TripPhase};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

const MAX_ATTEMPTS: usize = 3;

/// Apply a driver-initiated action and return the new phase.
#[instrument(skip(pool))]
pub async fn set_driver_phase(
    pool: &Pool,
    driver_id: DriverId,
    action: PhaseAction,
    at: DateTime<Utc>,
) -> Result<TripPhase> {
    let mut last_seen = TripPhase::OffDuty;
    for attempt in 0..MAX_ATTEMPTS {
        let driver = db::fetch_driver(pool, driver_id)
            .await?
            .ok_or(RideError::ReferenceError {
                entity: "driver",
                id: driver_id,
            })?;
        last_seen = driver.phase;
        let Some(next) = driver.phase.apply(action) else {
            return Err(RideError::InvalidPhaseTransition {
                from: driver.phase,
                action,
            });
        };

        let mut tx = pool.begin().await?;
        if db::swap_driver_phase(&mut tx, driver_id, driver.phase, next, action, at).await? {
            tx.commit().await?;
            info!(driver_id, action = action.as_str(), ?next, "driver phase changed");
            return Ok(next);
        }
        tx.rollback().await?;
        warn!(driver_id, attempt, "driver phase changed concurrently; retrying");
    }
    Err(RideError::InvalidPhaseTransition {
        from: last_seen,
        action,
    })
}

/// Phase in force for `driver` at `at`. Drivers with no recorded history
/// fall back to their live row.
#[instrument(skip(pool, driver), fields(driver_id = driver.id))]
pub async fn phase_at(pool: &Pool, driver: &DriverRow, at: DateTime<Utc>) -> Result<TripPhase> {
    if let Some(phase) = db::phase_as_of(pool, driver.id, at).await? {
        return Ok(phase);
    }
    if db::has_phase_history(pool, driver.id).await? {
        // History exists but starts after `at`: the driver had not started yet.
        return Ok(TripPhase::OffDuty);
    }
    Ok(driver.phase)
}

/// Record the driver's last-known position.
#[instrument(skip(pool))]
pub async fn report_position(
    pool: &Pool,
    driver_id: DriverId,
    lat: f64,
    lon: f64,
    at: DateTime<Utc>,
) -> Result<()> {
    if db::fetch_driver(pool, driver_id).await?.is_none() {
        return Err(RideError::ReferenceError {
            entity: "driver",
            id: driver_id,
        });
    }
    db::update_driver_position(pool, driver_id, lat, lon, at).await?;
    Ok(())
}
