//! Boarding state store: one record per (student, driver, trip-day, direction).
//!
//! Every change runs inside a single write transaction and the status update
//! is a compare-and-set on the previous status. SQLite has one writer lock for
//! the whole database: writes for unrelated keys never conflict, but they do
//! queue behind each other on the busy timeout.
use crate::db::{self, BoardingRecord, Pool};
use crate::error::{Result, RideError};
use crate::model::{BoardingEvent, BoardingStatus, Direction, RideKey, StudentId, Transition};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::{info, instrument};

/// Result of applying one event: the record for the event's own key, and
/// every status change the event caused.
#[derive(Debug, Clone)]
pub struct Applied {
    pub record: BoardingRecord,
    pub transitions: Vec<Transition>,
}

/// Apply a scan for `key` in its own transaction.
#[instrument(skip(pool))]
pub async fn apply_event(pool: &Pool, key: RideKey, at: DateTime<Utc>) -> Result<Applied> {
    let mut tx = pool.begin().await?;
    let applied = apply_scan_tx(&mut tx, &key, at, None).await?;
    tx.commit().await?;
    Ok(applied)
}

/// Apply a scan inside the caller's transaction.
///
/// A return-direction scan also closes the student's outbound record for the
/// same driver and day when it is still `boarded`.
pub async fn apply_scan_tx(
    conn: &mut SqliteConnection,
    key: &RideKey,
    at: DateTime<Utc>,
    scan_event_id: Option<&str>,
) -> Result<Applied> {
    let event = BoardingEvent::Scan(key.direction);
    db::ensure_boarding_record(conn, key, at).await?;

    let mut transitions = Vec::new();
    if let Some(t) = step(conn, key, event, at, scan_event_id).await? {
        transitions.push(t);
    }

    if key.direction == Direction::Return {
        let outbound = RideKey {
            direction: Direction::Outbound,
            ..*key
        };
        let boarded = db::fetch_boarding_record_tx(conn, &outbound)
            .await?
            .is_some_and(|r| r.status == BoardingStatus::Boarded);
        if boarded {
            let closed = step(conn, &outbound, BoardingEvent::DropOff, at, scan_event_id).await?;
            transitions.extend(closed);
        }
    }

    let record = db::fetch_boarding_record_tx(conn, key)
        .await?
        .ok_or(RideError::Database(sqlx::Error::RowNotFound))?;
    Ok(Applied {
        record,
        transitions,
    })
}

/// Run one event against an existing record. `None` for an accepted no-op.
async fn step(
    conn: &mut SqliteConnection,
    key: &RideKey,
    event: BoardingEvent,
    at: DateTime<Utc>,
    scan_event_id: Option<&str>,
) -> Result<Option<Transition>> {
    let current = db::fetch_boarding_record_tx(conn, key)
        .await?
        .ok_or(RideError::Database(sqlx::Error::RowNotFound))?
        .status;
    let Some(next) = event.next_status(current) else {
        info!(
            student_id = key.student_id,
            driver_id = key.driver_id,
            direction = key.direction.as_str(),
            status = current.as_str(),
            ?event,
            "no-op transition"
        );
        return Ok(None);
    };
    if !db::set_boarding_status(conn, key, current, next, at, scan_event_id).await? {
        // Unreachable while this transaction holds the write lock.
        return Err(RideError::Database(sqlx::Error::RowNotFound));
    }
    info!(
        student_id = key.student_id,
        driver_id = key.driver_id,
        direction = key.direction.as_str(),
        from = current.as_str(),
        to = next.as_str(),
        "boarding transition"
    );
    Ok(Some(Transition {
        key: *key,
        from: current,
        to: next,
        at,
    }))
}

/// Mark a student absent for `day` on their assigned driver, both directions.
/// Records already past `waiting` are left as they are.
#[instrument(skip(pool))]
pub async fn apply_absence(
    pool: &Pool,
    student_id: StudentId,
    day: NaiveDate,
    at: DateTime<Utc>,
) -> Result<Vec<Transition>> {
    if db::fetch_student(pool, student_id).await?.is_none() {
        return Err(RideError::ReferenceError {
            entity: "student",
            id: student_id,
        });
    }
    let driver_id = db::assigned_driver(pool, student_id)
        .await?
        .ok_or(RideError::ReferenceError {
            entity: "assigned driver of student",
            id: student_id,
        })?;

    let mut tx = pool.begin().await?;
    let mut transitions = Vec::new();
    for direction in [Direction::Outbound, Direction::Return] {
        let key = RideKey {
            student_id,
            driver_id,
            trip_day: day,
            direction,
        };
        db::ensure_boarding_record(&mut tx, &key, at).await?;
        if let Some(t) = step(&mut tx, &key, BoardingEvent::AbsenceRequest, at, None).await? {
            transitions.push(t);
        }
    }
    tx.commit().await?;
    Ok(transitions)
}

/// Current status for a key, `None` when no record exists.
pub async fn status_of(pool: &Pool, key: &RideKey) -> Result<Option<BoardingStatus>> {
    Ok(db::fetch_boarding_record(pool, key).await?.map(|r| r.status))
}
