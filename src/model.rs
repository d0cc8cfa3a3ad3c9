use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type StudentId = i64;
pub type DriverId = i64;
pub type GuardianId = i64;

/// Leg of a driver's route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Return,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Return => "return",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(Direction::Outbound),
            "return" => Some(Direction::Return),
            _ => None,
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            Direction::Outbound => Direction::Return,
            Direction::Return => Direction::Outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BoardingStatus {
    Waiting,
    Boarded,
    Dropped,
    Absent,
}

impl BoardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardingStatus::Waiting => "waiting",
            BoardingStatus::Boarded => "boarded",
            BoardingStatus::Dropped => "dropped",
            BoardingStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(BoardingStatus::Waiting),
            "boarded" => Some(BoardingStatus::Boarded),
            "dropped" => Some(BoardingStatus::Dropped),
            "absent" => Some(BoardingStatus::Absent),
            _ => None,
        }
    }

    /// `dropped` and `absent` close the record for the day.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BoardingStatus::Dropped | BoardingStatus::Absent)
    }
}

/// Something that can move a boarding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardingEvent {
    Scan(Direction),
    /// A return scan closing the same student's outbound record.
    DropOff,
    AbsenceRequest,
}

impl BoardingEvent {
    /// The transition table. `None` means the event is accepted as a no-op.
    pub fn next_status(&self, current: BoardingStatus) -> Option<BoardingStatus> {
        use BoardingStatus::*;
        match (current, self) {
            (Waiting, BoardingEvent::Scan(_)) => Some(Boarded),
            (Boarded, BoardingEvent::Scan(Direction::Return)) => Some(Dropped),
            (Boarded, BoardingEvent::DropOff) => Some(Dropped),
            (Waiting, BoardingEvent::AbsenceRequest) => Some(Absent),
            _ => None,
        }
    }
}

/// Driver trip phase: off duty, or on duty heading one way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TripPhase {
    OffDuty,
    OnDuty { direction: Direction },
}

impl TripPhase {
    pub fn from_columns(on_duty: bool, direction: Option<&str>) -> Self {
        match (on_duty, direction.and_then(Direction::parse)) {
            (true, Some(direction)) => TripPhase::OnDuty { direction },
            _ => TripPhase::OffDuty,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            TripPhase::OffDuty => None,
            TripPhase::OnDuty { direction } => Some(*direction),
        }
    }

    /// Apply a driver action. `None` when the action is not valid from here.
    pub fn apply(&self, action: PhaseAction) -> Option<TripPhase> {
        match (self, action) {
            (TripPhase::OffDuty, PhaseAction::StartDuty) => Some(TripPhase::OnDuty {
                direction: Direction::Outbound,
            }),
            (TripPhase::OnDuty { direction }, PhaseAction::ReverseDirection) => {
                Some(TripPhase::OnDuty {
                    direction: direction.reversed(),
                })
            }
            (TripPhase::OnDuty { .. }, PhaseAction::EndDuty) => Some(TripPhase::OffDuty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAction {
    StartDuty,
    ReverseDirection,
    EndDuty,
}

impl PhaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseAction::StartDuty => "start_duty",
            PhaseAction::ReverseDirection => "reverse_direction",
            PhaseAction::EndDuty => "end_duty",
        }
    }
}

/// Why a scan was not applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedCard,
    CardUnknown,
    StudentInactive,
    DriverOffDuty,
    DuplicateSuppressed,
    ReferenceError,
    TransientDependencyError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedCard => "malformed_card",
            RejectReason::CardUnknown => "card_unknown",
            RejectReason::StudentInactive => "student_inactive",
            RejectReason::DriverOffDuty => "driver_off_duty",
            RejectReason::DuplicateSuppressed => "duplicate_suppressed",
            RejectReason::ReferenceError => "reference_error",
            RejectReason::TransientDependencyError => "transient_dependency_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Accepted,
    Rejected,
    Suppressed,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Accepted => "accepted",
            ScanOutcome::Rejected => "rejected",
            ScanOutcome::Suppressed => "suppressed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Raw scan as reported by a reader device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub card_id: String,
    pub driver_id: DriverId,
    pub direction: Option<Direction>,
    pub coords: Option<GeoPoint>,
    pub at: DateTime<Utc>,
    /// Opaque device data, stored alongside the scan event untouched.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Dedup and boarding key for a resolved scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RideKey {
    pub student_id: StudentId,
    pub driver_id: DriverId,
    pub trip_day: NaiveDate,
    pub direction: Direction,
}

/// A status change committed to the boarding table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub key: RideKey,
    pub from: BoardingStatus,
    pub to: BoardingStatus,
    pub at: DateTime<Utc>,
}

/// Typed payload stored with each scan event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    Accepted {
        transitions: Vec<Transition>,
        /// Final status of the record in the scan's own direction.
        status: BoardingStatus,
    },
    Suppressed {
        window_seconds: i64,
        status: Option<BoardingStatus>,
    },
    Rejected {
        reason: RejectReason,
        message: String,
    },
}

/// What the inbound boundary hands back for a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReceipt {
    pub scan_id: String,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    pub student_id: Option<StudentId>,
    pub direction: Option<Direction>,
    pub new_status: Option<BoardingStatus>,
    pub transitions: Vec<Transition>,
    pub notifications: Vec<crate::notify::DeliveryReport>,
}

impl ScanReceipt {
    /// Accepted scans and suppressed duplicates both leave the system consistent.
    pub fn is_success(&self) -> bool {
        self.accepted || self.reason == Some(RejectReason::DuplicateSuppressed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(DeliveryStatus::Sending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Student(StudentId),
    Guardian(GuardianId),
}

impl Subject {
    pub fn type_str(&self) -> &'static str {
        match self {
            Subject::Student(_) => "student",
            Subject::Guardian(_) => "guardian",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Subject::Student(id) | Subject::Guardian(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub display_name: String,
    pub active: bool,
}

/// Maps instants onto service trip-days. A trip-day starts at
/// `rollover_hour` local time, so late-night scans stay on the previous day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceClock {
    pub offset: FixedOffset,
    pub rollover_hour: u32,
}

impl ServiceClock {
    pub fn new(utc_offset_minutes: i32, rollover_hour: u32) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        if rollover_hour > 23 {
            return None;
        }
        Some(Self {
            offset,
            rollover_hour,
        })
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
            rollover_hour: 0,
        }
    }

    pub fn trip_day(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.offset);
        (local - Duration::hours(self.rollover_hour as i64)).date_naive()
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }
}

pub fn day_str(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn waiting_reaches_only_boarded_or_absent() {
        let w = BoardingStatus::Waiting;
        assert_eq!(
            BoardingEvent::Scan(Direction::Outbound).next_status(w),
            Some(BoardingStatus::Boarded)
        );
        assert_eq!(
            BoardingEvent::Scan(Direction::Return).next_status(w),
            Some(BoardingStatus::Boarded)
        );
        assert_eq!(
            BoardingEvent::AbsenceRequest.next_status(w),
            Some(BoardingStatus::Absent)
        );
    }

    #[test]
    fn boarded_reaches_only_dropped() {
        let b = BoardingStatus::Boarded;
        assert_eq!(BoardingEvent::Scan(Direction::Outbound).next_status(b), None);
        assert_eq!(
            BoardingEvent::Scan(Direction::Return).next_status(b),
            Some(BoardingStatus::Dropped)
        );
        assert_eq!(BoardingEvent::AbsenceRequest.next_status(b), None);
    }

    #[test]
    fn terminal_states_ignore_everything() {
        let events = [
            BoardingEvent::Scan(Direction::Outbound),
            BoardingEvent::Scan(Direction::Return),
            BoardingEvent::DropOff,
            BoardingEvent::AbsenceRequest,
        ];
        for status in [BoardingStatus::Dropped, BoardingStatus::Absent] {
            assert!(status.is_terminal());
            for ev in events {
                assert_eq!(ev.next_status(status), None, "{status:?} {ev:?}");
            }
        }
    }

    #[test]
    fn drop_off_only_closes_boarded_records() {
        assert_eq!(
            BoardingEvent::DropOff.next_status(BoardingStatus::Boarded),
            Some(BoardingStatus::Dropped)
        );
        assert_eq!(BoardingEvent::DropOff.next_status(BoardingStatus::Waiting), None);
    }

    #[test]
    fn phase_transitions() {
        let off = TripPhase::OffDuty;
        let out = off.apply(PhaseAction::StartDuty).unwrap();
        assert_eq!(out.direction(), Some(Direction::Outbound));
        let back = out.apply(PhaseAction::ReverseDirection).unwrap();
        assert_eq!(back.direction(), Some(Direction::Return));
        assert_eq!(
            back.apply(PhaseAction::ReverseDirection).unwrap().direction(),
            Some(Direction::Outbound)
        );
        assert_eq!(back.apply(PhaseAction::EndDuty), Some(TripPhase::OffDuty));

        assert_eq!(off.apply(PhaseAction::ReverseDirection), None);
        assert_eq!(off.apply(PhaseAction::EndDuty), None);
        assert_eq!(out.apply(PhaseAction::StartDuty), None);
    }

    #[test]
    fn trip_day_rolls_over_at_configured_hour() {
        // UTC+8, day starts at 03:00 local.
        let clock = ServiceClock::new(480, 3).unwrap();
        // 2024-05-02 01:30 local == 2024-05-01 17:30 UTC
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 17, 30, 0).unwrap();
        assert_eq!(clock.trip_day(late), NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        // 2024-05-02 03:00 local
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap();
        assert_eq!(clock.trip_day(start), NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
    }

    #[test]
    fn service_clock_rejects_bad_values() {
        assert!(ServiceClock::new(0, 24).is_none());
        assert!(ServiceClock::new(100_000, 0).is_none());
    }

    #[test]
    fn event_detail_is_tagged() {
        let detail = EventDetail::Rejected {
            reason: RejectReason::CardUnknown,
            message: "no active assignment".into(),
        };
        let v = serde_json::to_value(&detail).unwrap();
        assert_eq!(v["kind"], "rejected");
        assert_eq!(v["reason"], "card_unknown");
    }
}
