use super::model::{BoardingRecord, DriverRow, NewScanEvent, NotificationLogRow, ScanEventRow};
use crate::error::{Result, RideError};
use crate::model::{
    day_str, from_millis, parse_day, BoardingStatus, DeliveryStatus, Direction, DriverId,
    GuardianId, PhaseAction, RideKey, Student, StudentId, Subject, TripPhase,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL with full durability; writers queue on the busy timeout instead of failing.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));
    // Every connection to an in-memory URL opens a separate database.
    let max_connections = if normalized.starts_with("sqlite::memory") { 1 } else { 8 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

// ---------------------------------------------------------------------------
// Directory reads
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(card_id = %card_id))]
pub async fn active_card_holder(
    pool: &Pool,
    card_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<StudentId>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT student_id FROM card_assignments \
         WHERE card_id = ? AND active = 1 AND valid_from_ms <= ? \
           AND (valid_until_ms IS NULL OR valid_until_ms > ?)",
    )
    .bind(card_id)
    .bind(millis(at))
    .bind(millis(at))
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn fetch_student(pool: &Pool, student_id: StudentId) -> Result<Option<Student>> {
    let row = sqlx::query("SELECT id, display_name, active FROM students WHERE id = ?")
        .bind(student_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Student {
        id: row.get("id"),
        display_name: row.get("display_name"),
        active: row.get::<bool, _>("active"),
    }))
}

#[instrument(skip_all)]
pub async fn assigned_driver(pool: &Pool, student_id: StudentId) -> Result<Option<DriverId>> {
    let driver = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT assigned_driver_id FROM students WHERE id = ?",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;
    Ok(driver.flatten())
}

#[instrument(skip_all)]
pub async fn active_guardians(pool: &Pool, student_id: StudentId) -> Result<Vec<GuardianId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT g.id FROM guardians g \
         JOIN student_guardians sg ON sg.guardian_id = g.id \
         WHERE sg.student_id = ? AND sg.active = 1 AND g.active = 1 \
         ORDER BY g.id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn active_handles(pool: &Pool, subject: Subject) -> Result<Vec<String>> {
    let handles = sqlx::query_scalar::<_, String>(
        "SELECT handle FROM identity_links \
         WHERE subject_type = ? AND subject_id = ? AND active = 1 \
         ORDER BY linked_at_ms DESC",
    )
    .bind(subject.type_str())
    .bind(subject.id())
    .fetch_all(pool)
    .await?;
    Ok(handles)
}

// ---------------------------------------------------------------------------
// Drivers and trip phases
// ---------------------------------------------------------------------------

fn driver_from_row(row: &SqliteRow) -> DriverRow {
    let on_duty: bool = row.get("on_duty");
    let direction: Option<String> = row.get("direction");
    let lat: Option<f64> = row.get("last_lat");
    let lon: Option<f64> = row.get("last_lon");
    DriverRow {
        id: row.get("id"),
        display_name: row.get("display_name"),
        phase: TripPhase::from_columns(on_duty, direction.as_deref()),
        last_position: lat.zip(lon),
        last_seen_at: row.get::<Option<i64>, _>("last_seen_ms").map(from_millis),
    }
}

#[instrument(skip_all)]
pub async fn fetch_driver(pool: &Pool, driver_id: DriverId) -> Result<Option<DriverRow>> {
    let row = sqlx::query(
        "SELECT id, display_name, on_duty, direction, last_lat, last_lon, last_seen_ms \
         FROM drivers WHERE id = ?",
    )
    .bind(driver_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(driver_from_row))
}

/// Phase in force at `at`, read from the phase log. `None` when the driver
/// has never changed phase at or before that instant.
#[instrument(skip_all)]
pub async fn phase_as_of(
    pool: &Pool,
    driver_id: DriverId,
    at: DateTime<Utc>,
) -> Result<Option<TripPhase>> {
    let row = sqlx::query(
        "SELECT on_duty, direction FROM driver_phase_log \
         WHERE driver_id = ? AND changed_ms <= ? \
         ORDER BY changed_ms DESC, id DESC LIMIT 1",
    )
    .bind(driver_id)
    .bind(millis(at))
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| {
        let on_duty: bool = row.get("on_duty");
        let direction: Option<String> = row.get("direction");
        TripPhase::from_columns(on_duty, direction.as_deref())
    }))
}

#[instrument(skip_all)]
pub async fn has_phase_history(pool: &Pool, driver_id: DriverId) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM driver_phase_log WHERE driver_id = ?)",
    )
    .bind(driver_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Compare-and-set of the driver's phase columns. Returns false when the
/// stored phase no longer equals `from`.
#[instrument(skip_all)]
pub async fn swap_driver_phase(
    conn: &mut SqliteConnection,
    driver_id: DriverId,
    from: TripPhase,
    to: TripPhase,
    action: PhaseAction,
    at: DateTime<Utc>,
) -> Result<bool> {
    let from_dir = from.direction().map(|d| d.as_str());
    let to_dir = to.direction().map(|d| d.as_str());
    let updated = sqlx::query(
        "UPDATE drivers SET on_duty = ?, direction = ?, phase_changed_ms = ? \
         WHERE id = ? AND on_duty = ? AND direction IS ?",
    )
    .bind(to_dir.is_some())
    .bind(to_dir)
    .bind(millis(at))
    .bind(driver_id)
    .bind(from_dir.is_some())
    .bind(from_dir)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated == 0 {
        return Ok(false);
    }
    sqlx::query(
        "INSERT INTO driver_phase_log (driver_id, action, on_duty, direction, changed_ms) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(driver_id)
    .bind(action.as_str())
    .bind(to_dir.is_some())
    .bind(to_dir)
    .bind(millis(at))
    .execute(&mut *conn)
    .await?;
    Ok(true)
}

#[instrument(skip_all)]
pub async fn update_driver_position(
    pool: &Pool,
    driver_id: DriverId,
    lat: f64,
    lon: f64,
    at: DateTime<Utc>,
) -> Result<bool> {
    // Older fixes never overwrite newer ones.
    let updated = sqlx::query(
        "UPDATE drivers SET last_lat = ?, last_lon = ?, last_seen_ms = ? \
         WHERE id = ? AND (last_seen_ms IS NULL OR last_seen_ms <= ?)",
    )
    .bind(lat)
    .bind(lon)
    .bind(millis(at))
    .bind(driver_id)
    .bind(millis(at))
    .execute(pool)
    .await?
    .rows_affected();
    Ok(updated > 0)
}

// ---------------------------------------------------------------------------
// Dedup guard
// ---------------------------------------------------------------------------

/// Claim the dedup slot for `key`. A single conditional upsert: it inserts a
/// fresh row, or updates an existing one only when the stored accepted scan is
/// at least `window_ms` away in either direction, since readers may deliver
/// out of timestamp order. The stored timestamp never moves backwards.
/// Returns false when the scan must be suppressed.
#[instrument(skip_all)]
pub async fn claim_scan_guard(
    conn: &mut SqliteConnection,
    card_id: &str,
    key: &RideKey,
    at: DateTime<Utc>,
    window_ms: i64,
) -> Result<bool> {
    let claimed = sqlx::query(
        "INSERT INTO scan_guard (card_id, student_id, driver_id, trip_day, direction, accepted_ms) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (card_id, student_id, driver_id, trip_day, direction) DO UPDATE \
         SET accepted_ms = MAX(scan_guard.accepted_ms, excluded.accepted_ms) \
         WHERE ABS(excluded.accepted_ms - scan_guard.accepted_ms) >= ?",
    )
    .bind(card_id)
    .bind(key.student_id)
    .bind(key.driver_id)
    .bind(day_str(key.trip_day))
    .bind(key.direction.as_str())
    .bind(millis(at))
    .bind(window_ms)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(claimed > 0)
}

#[instrument(skip_all)]
pub async fn prune_scan_guard_before(conn: &mut SqliteConnection, day: NaiveDate) -> Result<u64> {
    let removed = sqlx::query("DELETE FROM scan_guard WHERE trip_day < ?")
        .bind(day_str(day))
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Boarding records
// ---------------------------------------------------------------------------

fn boarding_from_row(row: &SqliteRow) -> Result<BoardingRecord> {
    let id: i64 = row.get("id");
    let day: String = row.get("trip_day");
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    let corrupt = |what: &str, value: &str| {
        RideError::Database(sqlx::Error::Decode(
            format!("boarding record {id} has unknown {what} {value}").into(),
        ))
    };
    Ok(BoardingRecord {
        id,
        student_id: row.get("student_id"),
        driver_id: row.get("driver_id"),
        trip_day: parse_day(&day).ok_or_else(|| corrupt("trip_day", &day))?,
        direction: Direction::parse(&direction).ok_or_else(|| corrupt("direction", &direction))?,
        status: BoardingStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        first_event_at: row.get::<Option<i64>, _>("first_event_ms").map(from_millis),
        last_event_at: row.get::<Option<i64>, _>("last_event_ms").map(from_millis),
        scan_event_id: row.get("scan_event_id"),
    })
}

const BOARDING_COLUMNS: &str = "id, student_id, driver_id, trip_day, direction, status, \
     first_event_ms, last_event_ms, scan_event_id";

/// Insert a `waiting` record for `key` unless one exists.
#[instrument(skip_all)]
pub async fn ensure_boarding_record(
    conn: &mut SqliteConnection,
    key: &RideKey,
    now: DateTime<Utc>,
) -> Result<bool> {
    let inserted = sqlx::query(
        "INSERT INTO boarding_records (student_id, driver_id, trip_day, direction, status, created_ms) \
         VALUES (?, ?, ?, ?, 'waiting', ?) \
         ON CONFLICT (student_id, driver_id, trip_day, direction) DO NOTHING",
    )
    .bind(key.student_id)
    .bind(key.driver_id)
    .bind(day_str(key.trip_day))
    .bind(key.direction.as_str())
    .bind(millis(now))
    .execute(&mut *conn)
    .await
    .map_err(|err| RideError::from_constraint(err, "student/driver", key.student_id))?
    .rows_affected();
    Ok(inserted > 0)
}

#[instrument(skip_all)]
pub async fn fetch_boarding_record_tx(
    conn: &mut SqliteConnection,
    key: &RideKey,
) -> Result<Option<BoardingRecord>> {
    let sql = format!(
        "SELECT {BOARDING_COLUMNS} FROM boarding_records \
         WHERE student_id = ? AND driver_id = ? AND trip_day = ? AND direction = ?"
    );
    let row = sqlx::query(&sql)
        .bind(key.student_id)
        .bind(key.driver_id)
        .bind(day_str(key.trip_day))
        .bind(key.direction.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(boarding_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_boarding_record(pool: &Pool, key: &RideKey) -> Result<Option<BoardingRecord>> {
    let mut conn = pool.acquire().await?;
    fetch_boarding_record_tx(&mut conn, key).await
}

/// Move a record from `from` to `to`. Returns false if the stored status is
/// no longer `from`.
#[instrument(skip_all)]
pub async fn set_boarding_status(
    conn: &mut SqliteConnection,
    key: &RideKey,
    from: BoardingStatus,
    to: BoardingStatus,
    at: DateTime<Utc>,
    scan_event_id: Option<&str>,
) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE boarding_records \
         SET status = ?, first_event_ms = COALESCE(first_event_ms, ?), last_event_ms = ?, \
             scan_event_id = COALESCE(?, scan_event_id) \
         WHERE student_id = ? AND driver_id = ? AND trip_day = ? AND direction = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(millis(at))
    .bind(millis(at))
    .bind(scan_event_id)
    .bind(key.student_id)
    .bind(key.driver_id)
    .bind(day_str(key.trip_day))
    .bind(key.direction.as_str())
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(updated > 0)
}

#[instrument(skip_all)]
pub async fn list_boarding_for_day(pool: &Pool, day: NaiveDate) -> Result<Vec<BoardingRecord>> {
    let sql = format!(
        "SELECT {BOARDING_COLUMNS} FROM boarding_records WHERE trip_day = ? \
         ORDER BY student_id, driver_id, direction"
    );
    let rows = sqlx::query(&sql)
        .bind(day_str(day))
        .fetch_all(pool)
        .await?;
    rows.iter().map(boarding_from_row).collect()
}

#[instrument(skip_all)]
pub async fn count_boarding_records(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boarding_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Daily reset
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn archive_boarding_before(
    conn: &mut SqliteConnection,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<u64> {
    sqlx::query(
        "INSERT OR IGNORE INTO boarding_archive \
         (id, student_id, driver_id, trip_day, direction, status, first_event_ms, last_event_ms, \
          scan_event_id, created_ms, archived_ms) \
         SELECT id, student_id, driver_id, trip_day, direction, status, first_event_ms, \
                last_event_ms, scan_event_id, created_ms, ? \
         FROM boarding_records WHERE trip_day < ?",
    )
    .bind(millis(now))
    .bind(day_str(day))
    .execute(&mut *conn)
    .await?;
    let removed = sqlx::query("DELETE FROM boarding_records WHERE trip_day < ?")
        .bind(day_str(day))
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed)
}

/// Seed a `waiting` outbound record for every active student with an assigned
/// driver. Existing rows are left untouched.
#[instrument(skip_all)]
pub async fn seed_waiting_records(
    conn: &mut SqliteConnection,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<u64> {
    let seeded = sqlx::query(
        "INSERT INTO boarding_records (student_id, driver_id, trip_day, direction, status, created_ms) \
         SELECT s.id, s.assigned_driver_id, ?, 'outbound', 'waiting', ? \
         FROM students s \
         WHERE s.active = 1 AND s.assigned_driver_id IS NOT NULL \
         ON CONFLICT (student_id, driver_id, trip_day, direction) DO NOTHING",
    )
    .bind(day_str(day))
    .bind(millis(now))
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(seeded)
}

#[instrument(skip_all)]
pub async fn record_reset_run(
    conn: &mut SqliteConnection,
    day: NaiveDate,
    archived: u64,
    seeded: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reset_runs (trip_day, archived, seeded, ran_ms) VALUES (?, ?, ?, ?) \
         ON CONFLICT (trip_day) DO UPDATE SET \
           archived = reset_runs.archived + excluded.archived, \
           seeded = reset_runs.seeded + excluded.seeded, \
           ran_ms = excluded.ran_ms",
    )
    .bind(day_str(day))
    .bind(archived as i64)
    .bind(seeded as i64)
    .bind(millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn last_reset_day(pool: &Pool) -> Result<Option<NaiveDate>> {
    let day: Option<String> = sqlx::query_scalar("SELECT MAX(trip_day) FROM reset_runs")
        .fetch_one(pool)
        .await?;
    Ok(day.as_deref().and_then(parse_day))
}

// ---------------------------------------------------------------------------
// Scan events
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(scan_id = ev.id, outcome = ev.outcome.as_str()))]
pub async fn insert_scan_event(
    conn: &mut SqliteConnection,
    ev: &NewScanEvent<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO scan_events \
         (id, card_id, student_id, driver_id, device_direction, direction, trip_day, occurred_ms, \
          lat, lon, outcome, reason, detail, metadata, recorded_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ev.id)
    .bind(ev.card_id)
    .bind(ev.student_id)
    .bind(ev.driver_id)
    .bind(ev.device_direction.map(|d| d.as_str()))
    .bind(ev.direction.map(|d| d.as_str()))
    .bind(ev.trip_day.map(day_str))
    .bind(millis(ev.occurred_at))
    .bind(ev.coords.map(|c| c.0))
    .bind(ev.coords.map(|c| c.1))
    .bind(ev.outcome.as_str())
    .bind(ev.reason)
    .bind(&ev.detail)
    .bind(ev.metadata.as_deref())
    .bind(millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_scan_events_for_card(pool: &Pool, card_id: &str) -> Result<Vec<ScanEventRow>> {
    let rows = sqlx::query(
        "SELECT id, card_id, student_id, driver_id, direction, occurred_ms, outcome, reason, \
                detail, metadata \
         FROM scan_events WHERE card_id = ? ORDER BY occurred_ms, recorded_ms",
    )
    .bind(card_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<ScanEventRow> {
            let direction: Option<String> = row.get("direction");
            let detail: String = row.get("detail");
            let metadata: Option<String> = row.get("metadata");
            Ok(ScanEventRow {
                id: row.get("id"),
                card_id: row.get("card_id"),
                student_id: row.get("student_id"),
                driver_id: row.get("driver_id"),
                direction: direction.as_deref().and_then(Direction::parse),
                occurred_at: from_millis(row.get("occurred_ms")),
                outcome: row.get("outcome"),
                reason: row.get("reason"),
                detail: serde_json::from_str(&detail)?,
                metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Notification log
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_notification_sending(
    pool: &Pool,
    student_id: StudentId,
    recipient: &str,
    template_id: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO notification_log (student_id, recipient, template_id, body, status, created_ms) \
         VALUES (?, ?, ?, ?, 'sending', ?) RETURNING id",
    )
    .bind(student_id)
    .bind(recipient)
    .bind(template_id)
    .bind(body)
    .bind(millis(now))
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Close a `sending` row. Rows already closed are left alone.
#[instrument(skip_all)]
pub async fn finish_notification(
    pool: &Pool,
    id: i64,
    status: DeliveryStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE notification_log SET status = ?, error = ?, finished_ms = ? \
         WHERE id = ? AND status = 'sending'",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(millis(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

fn notification_from_row(row: &SqliteRow) -> NotificationLogRow {
    let status: String = row.get("status");
    NotificationLogRow {
        id: row.get("id"),
        student_id: row.get("student_id"),
        recipient: row.get("recipient"),
        template_id: row.get("template_id"),
        body: row.get("body"),
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
        error: row.get("error"),
        created_at: from_millis(row.get("created_ms")),
        finished_at: row.get::<Option<i64>, _>("finished_ms").map(from_millis),
    }
}

#[instrument(skip_all)]
pub async fn list_notifications_for_student(
    pool: &Pool,
    student_id: StudentId,
) -> Result<Vec<NotificationLogRow>> {
    let rows = sqlx::query(
        "SELECT id, student_id, recipient, template_id, body, status, error, created_ms, finished_ms \
         FROM notification_log WHERE student_id = ? ORDER BY id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(notification_from_row).collect())
}

#[instrument(skip_all)]
pub async fn failed_deliveries(
    pool: &Pool,
    since: DateTime<Utc>,
) -> Result<Vec<NotificationLogRow>> {
    let rows = sqlx::query(
        "SELECT id, student_id, recipient, template_id, body, status, error, created_ms, finished_ms \
         FROM notification_log WHERE status = 'failed' AND created_ms >= ? ORDER BY created_ms",
    )
    .bind(millis(since))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(notification_from_row).collect())
}
