//! Row and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! lives in the engine modules.

use crate::model::{
    BoardingStatus, Direction, DeliveryStatus, DriverId, ScanOutcome, StudentId, TripPhase,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One row of `boarding_records`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardingRecord {
    pub id: i64,
    pub student_id: StudentId,
    pub driver_id: DriverId,
    pub trip_day: NaiveDate,
    pub direction: Direction,
    pub status: BoardingStatus,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub scan_event_id: Option<String>,
}

/// Driver slice read by the resolver and the phase controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRow {
    pub id: DriverId,
    pub display_name: String,
    pub phase: TripPhase,
    pub last_position: Option<(f64, f64)>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Insert payload for the append-only scan log.
#[derive(Debug, Clone)]
pub struct NewScanEvent<'a> {
    pub id: &'a str,
    pub card_id: &'a str,
    pub student_id: Option<StudentId>,
    pub driver_id: DriverId,
    pub device_direction: Option<Direction>,
    pub direction: Option<Direction>,
    pub trip_day: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
    pub coords: Option<(f64, f64)>,
    pub outcome: ScanOutcome,
    pub reason: Option<&'a str>,
    pub detail: String,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEventRow {
    pub id: String,
    pub card_id: String,
    pub student_id: Option<StudentId>,
    pub driver_id: DriverId,
    pub direction: Option<Direction>,
    pub occurred_at: DateTime<Utc>,
    pub outcome: String,
    pub reason: Option<String>,
    pub detail: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogRow {
    pub id: i64,
    pub student_id: StudentId,
    pub recipient: String,
    pub template_id: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
