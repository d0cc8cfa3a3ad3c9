//! Scan resolver: raw card read -> (student, driver, trip-day, direction).
use crate::db::{self, Pool};
use crate::directory::{bounded, CardDirectory};
use crate::error::RideError;
use crate::model::{
    Direction, RejectReason, RideKey, ScanRequest, ServiceClock, Student, StudentId,
};
use crate::phase;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

static CARD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Za-z:_-]{1,64}$").expect("valid card id pattern"));

/// A scan that passed every resolution check.
#[derive(Debug, Clone)]
pub struct ResolvedScan {
    pub card_id: String,
    pub student: Student,
    pub key: RideKey,
}

/// A scan that ends here. Nothing but the audit log is written for it.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
    pub student_id: Option<StudentId>,
}

impl Rejection {
    pub(crate) fn from_error(err: RideError, student_id: Option<StudentId>) -> Self {
        // Errors outside the rejection taxonomy count as a dependency failure.
        let reason = err
            .reject_reason()
            .unwrap_or(RejectReason::TransientDependencyError);
        Self {
            reason,
            message: err.to_string(),
            student_id,
        }
    }
}

pub fn normalize_card_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    CARD_ID.is_match(trimmed).then(|| trimmed.to_string())
}

#[derive(Clone)]
pub struct ScanResolver {
    pool: Pool,
    cards: Arc<dyn CardDirectory>,
    clock: ServiceClock,
    lookup_timeout: Duration,
}

impl ScanResolver {
    pub fn new(
        pool: Pool,
        cards: Arc<dyn CardDirectory>,
        clock: ServiceClock,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            cards,
            clock,
            lookup_timeout,
        }
    }

    pub fn clock(&self) -> ServiceClock {
        self.clock
    }

    /// Resolve in order: card, student, driver, phase at the scan's timestamp.
    #[instrument(skip_all, fields(card_id = %req.card_id, driver_id = req.driver_id))]
    pub async fn resolve(&self, req: &ScanRequest) -> Result<ResolvedScan, Rejection> {
        let card_id = normalize_card_id(&req.card_id).ok_or_else(|| {
            Rejection::from_error(RideError::MalformedCard(req.card_id.clone()), None)
        })?;

        let student_id = bounded(
            self.lookup_timeout,
            "card lookup",
            self.cards.card_holder(&card_id, req.at),
        )
        .await
        .map_err(|err| Rejection::from_error(err, None))?
        .ok_or_else(|| Rejection::from_error(RideError::CardUnknown(card_id.clone()), None))?;

        let student = bounded(
            self.lookup_timeout,
            "student lookup",
            self.cards.student(student_id),
        )
        .await
        .map_err(|err| Rejection::from_error(err, Some(student_id)))?
        .ok_or_else(|| {
            Rejection::from_error(
                RideError::ReferenceError {
                    entity: "student",
                    id: student_id,
                },
                Some(student_id),
            )
        })?;
        if !student.active {
            return Err(Rejection::from_error(
                RideError::StudentInactive(student_id),
                Some(student_id),
            ));
        }

        let direction = self
            .direction_for(req)
            .await
            .map_err(|err| Rejection::from_error(err, Some(student_id)))?;

        let key = RideKey {
            student_id,
            driver_id: req.driver_id,
            trip_day: self.clock.trip_day(req.at),
            direction,
        };
        info!(
            student_id,
            direction = direction.as_str(),
            trip_day = %key.trip_day,
            "scan resolved"
        );
        Ok(ResolvedScan {
            card_id,
            student,
            key,
        })
    }

    /// The driver must be on duty at the scan's own timestamp. A direction
    /// reported by the device wins over the driver's phase.
    async fn direction_for(&self, req: &ScanRequest) -> Result<Direction, RideError> {
        let driver = db::fetch_driver(&self.pool, req.driver_id)
            .await?
            .ok_or(RideError::ReferenceError {
                entity: "driver",
                id: req.driver_id,
            })?;
        let phase = phase::phase_at(&self.pool, &driver, req.at).await?;
        let Some(phase_direction) = phase.direction() else {
            return Err(RideError::DriverOffDuty(req.driver_id));
        };
        Ok(req.direction.unwrap_or(phase_direction))
    }
}
