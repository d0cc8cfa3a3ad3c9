//! Error taxonomy for the ride-event engine.
use crate::model::{DriverId, PhaseAction, RejectReason, TripPhase};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RideError>;

#[derive(Debug, Error)]
pub enum RideError {
    #[error("malformed card id: {0:?}")]
    MalformedCard(String),
    #[error("card {0} has no active assignment")]
    CardUnknown(String),
    #[error("student {0} is inactive")]
    StudentInactive(i64),
    #[error("driver {0} is off duty")]
    DriverOffDuty(DriverId),
    #[error("duplicate scan suppressed")]
    DuplicateSuppressed,
    #[error("unknown {entity} {id}")]
    ReferenceError { entity: &'static str, id: i64 },
    #[error("delivery to {recipient} failed: {detail}")]
    DeliveryFailed { recipient: String, detail: String },
    #[error("dependency unavailable: {0}")]
    TransientDependency(String),
    #[error("cannot {act} while {from:?}", act = .action.as_str())]
    InvalidPhaseTransition { from: TripPhase, action: PhaseAction },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RideError {
    /// Structured rejection for errors that end a scan without touching state.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            RideError::MalformedCard(_) => Some(RejectReason::MalformedCard),
            RideError::CardUnknown(_) => Some(RejectReason::CardUnknown),
            RideError::StudentInactive(_) => Some(RejectReason::StudentInactive),
            RideError::DriverOffDuty(_) => Some(RejectReason::DriverOffDuty),
            RideError::DuplicateSuppressed => Some(RejectReason::DuplicateSuppressed),
            RideError::ReferenceError { .. } => Some(RejectReason::ReferenceError),
            RideError::TransientDependency(_) => Some(RejectReason::TransientDependencyError),
            _ => None,
        }
    }

    /// Maps a foreign-key failure onto `ReferenceError`, leaving other errors alone.
    pub(crate) fn from_constraint(err: sqlx::Error, entity: &'static str, id: i64) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_foreign_key_violation() {
                return RideError::ReferenceError { entity, id };
            }
        }
        RideError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_map_to_reasons() {
        assert_eq!(
            RideError::CardUnknown("c1".into()).reject_reason(),
            Some(RejectReason::CardUnknown)
        );
        assert_eq!(
            RideError::TransientDependency("timeout".into()).reject_reason(),
            Some(RejectReason::TransientDependencyError)
        );
        assert_eq!(
            RideError::Database(sqlx::Error::RowNotFound).reject_reason(),
            None
        );
    }

    #[test]
    fn phase_error_message_names_action() {
        let err = RideError::InvalidPhaseTransition {
            from: TripPhase::OffDuty,
            action: PhaseAction::ReverseDirection,
        };
        assert!(err.to_string().contains("reverse_direction"));
    }
}
