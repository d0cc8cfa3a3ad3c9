//! Inbound boundary: scans, driver phase changes, positions, absences and resets.
use anyhow::Result as AnyResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::boarding;
use crate::config::Config;
use crate::db::{self, NewScanEvent, NotificationLogRow, Pool};
use crate::directory::{CardDirectory, LinkDirectory, SqlDirectory};
use crate::error::Result;
use crate::guard::DedupGuard;
use crate::model::{
    BoardingStatus, DriverId, EventDetail, PhaseAction, RejectReason, ScanOutcome, ScanReceipt,
    ScanRequest, ServiceClock, StudentId, Transition, TripPhase,
};
use crate::notify::{self, DeliveryReport, Dispatcher, MessageSender};
use crate::phase;
use crate::reset::{self, ResetReport};
use crate::resolver::{Rejection, ResolvedScan, ScanResolver};

/// Result of a leave request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbsenceReceipt {
    pub student_id: StudentId,
    pub trip_day: NaiveDate,
    pub transitions: Vec<Transition>,
    pub notifications: Vec<DeliveryReport>,
}

#[derive(Clone)]
pub struct RideService {
    pool: Pool,
    resolver: ScanResolver,
    guard: DedupGuard,
    dispatcher: Dispatcher,
    clock: ServiceClock,
}

impl RideService {
    pub fn new(
        pool: Pool,
        cards: Arc<dyn CardDirectory>,
        links: Arc<dyn LinkDirectory>,
        sender: Arc<dyn MessageSender>,
        cfg: &Config,
    ) -> Self {
        let clock = cfg.clock();
        let resolver = ScanResolver::new(pool.clone(), cards, clock, cfg.lookup_timeout());
        let dispatcher = Dispatcher::new(
            pool.clone(),
            links,
            sender,
            cfg.templates.clone(),
            clock,
            cfg.lookup_timeout(),
            cfg.delivery_timeout(),
        );
        Self {
            pool,
            resolver,
            guard: DedupGuard::new(cfg.dedup_window()),
            dispatcher,
            clock,
        }
    }

    /// Service wired to the SQLite directory and the configured provider.
    pub fn from_config(pool: Pool, cfg: &Config) -> AnyResult<Self> {
        let directory = Arc::new(SqlDirectory::new(pool.clone()));
        let sender = notify::sender_from_config(cfg)?;
        Ok(Self::new(pool, directory.clone(), directory, sender, cfg))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn clock(&self) -> ServiceClock {
        self.clock
    }

    /// Handle one card read. Every scan ends in exactly one audit row; only
    /// storage failures come back as `Err`.
    #[instrument(skip_all, fields(card_id = %req.card_id, driver_id = req.driver_id))]
    pub async fn record_scan(&self, req: ScanRequest) -> Result<ScanReceipt> {
        let scan_id = Uuid::new_v4().to_string();
        let resolved = match self.resolver.resolve(&req).await {
            Ok(resolved) => resolved,
            Err(rejection) => return self.reject(&scan_id, &req, None, rejection).await,
        };
        let key = resolved.key;
        let at = req.at;

        let mut tx = self.pool.begin().await?;
        if !self
            .guard
            .claim(&mut tx, &resolved.card_id, &key, at)
            .await?
        {
            let status = db::fetch_boarding_record_tx(&mut tx, &key)
                .await?
                .map(|r| r.status);
            let detail = EventDetail::Suppressed {
                window_seconds: self.guard.window().as_secs() as i64,
                status,
            };
            self.audit(
                &mut tx,
                &scan_id,
                &req,
                Some(&resolved),
                ScanOutcome::Suppressed,
                Some(RejectReason::DuplicateSuppressed),
                &detail,
            )
            .await?;
            tx.commit().await?;
            return Ok(ScanReceipt {
                scan_id,
                accepted: false,
                reason: Some(RejectReason::DuplicateSuppressed),
                student_id: Some(key.student_id),
                direction: Some(key.direction),
                new_status: status,
                transitions: Vec::new(),
                notifications: Vec::new(),
            });
        }

        let applied = match boarding::apply_scan_tx(&mut tx, &key, at, Some(&scan_id)).await {
            Ok(applied) => applied,
            Err(err) if err.reject_reason().is_some() => {
                tx.rollback().await?;
                let rejection = Rejection::from_error(err, Some(key.student_id));
                return self.reject(&scan_id, &req, Some(&resolved), rejection).await;
            }
            Err(err) => return Err(err),
        };
        let detail = EventDetail::Accepted {
            transitions: applied.transitions.clone(),
            status: applied.record.status,
        };
        self.audit(
            &mut tx,
            &scan_id,
            &req,
            Some(&resolved),
            ScanOutcome::Accepted,
            None,
            &detail,
        )
        .await?;
        tx.commit().await?;
        info!(
            student_id = key.student_id,
            direction = key.direction.as_str(),
            status = applied.record.status.as_str(),
            changed = applied.transitions.len(),
            "scan accepted"
        );

        if let Some(point) = req.coords {
            if let Err(err) =
                db::update_driver_position(&self.pool, req.driver_id, point.lat, point.lon, at)
                    .await
            {
                warn!(?err, "failed to refresh driver position");
            }
        }

        let notifications = self.notify_all(&applied.transitions).await;
        Ok(ScanReceipt {
            scan_id,
            accepted: true,
            reason: None,
            student_id: Some(key.student_id),
            direction: Some(key.direction),
            new_status: Some(applied.record.status),
            transitions: applied.transitions,
            notifications,
        })
    }

    async fn reject(
        &self,
        scan_id: &str,
        req: &ScanRequest,
        resolved: Option<&ResolvedScan>,
        rejection: Rejection,
    ) -> Result<ScanReceipt> {
        info!(
            reason = rejection.reason.as_str(),
            message = %rejection.message,
            "scan rejected"
        );
        let detail = EventDetail::Rejected {
            reason: rejection.reason,
            message: rejection.message.clone(),
        };
        let mut conn = self.pool.acquire().await?;
        self.audit(
            &mut conn,
            scan_id,
            req,
            resolved,
            ScanOutcome::Rejected,
            Some(rejection.reason),
            &detail,
        )
        .await?;
        Ok(ScanReceipt {
            scan_id: scan_id.to_string(),
            accepted: false,
            reason: Some(rejection.reason),
            student_id: rejection.student_id,
            direction: resolved.map(|r| r.key.direction),
            new_status: None,
            transitions: Vec::new(),
            notifications: Vec::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        conn: &mut SqliteConnection,
        scan_id: &str,
        req: &ScanRequest,
        resolved: Option<&ResolvedScan>,
        outcome: ScanOutcome,
        reason: Option<RejectReason>,
        detail: &EventDetail,
    ) -> Result<()> {
        let card_id = resolved.map_or(req.card_id.as_str(), |r| r.card_id.as_str());
        let metadata = req.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let event = NewScanEvent {
            id: scan_id,
            card_id,
            student_id: resolved.map(|r| r.key.student_id),
            driver_id: req.driver_id,
            device_direction: req.direction,
            direction: resolved.map(|r| r.key.direction),
            trip_day: resolved.map(|r| r.key.trip_day),
            occurred_at: req.at,
            coords: req.coords.map(|p| (p.lat, p.lon)),
            outcome,
            reason: reason.map(|r| r.as_str()),
            detail: serde_json::to_string(detail)?,
            metadata,
        };
        db::insert_scan_event(conn, &event, Utc::now()).await
    }

    /// One fan-out per transition. Failures are logged and reported, never raised.
    async fn notify_all(&self, transitions: &[Transition]) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(transitions.len());
        for transition in transitions {
            match self
                .dispatcher
                .dispatch(transition.key.student_id, transition)
                .await
            {
                Ok(report) => reports.push(report),
                Err(err) => warn!(
                    ?err,
                    student_id = transition.key.student_id,
                    "notification dispatch failed"
                ),
            }
        }
        reports
    }

    pub async fn set_driver_phase(
        &self,
        driver_id: DriverId,
        action: PhaseAction,
        at: DateTime<Utc>,
    ) -> Result<TripPhase> {
        phase::set_driver_phase(&self.pool, driver_id, action, at).await
    }

    pub async fn report_position(
        &self,
        driver_id: DriverId,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        phase::report_position(&self.pool, driver_id, lat, lon, at).await
    }

    /// Out-of-band leave request for `day` (defaults to the trip-day of `at`).
    #[instrument(skip(self))]
    pub async fn request_absence(
        &self,
        student_id: StudentId,
        day: Option<NaiveDate>,
        at: DateTime<Utc>,
    ) -> Result<AbsenceReceipt> {
        let trip_day = day.unwrap_or_else(|| self.clock.trip_day(at));
        let transitions = boarding::apply_absence(&self.pool, student_id, trip_day, at).await?;
        let notifications = match transitions
            .iter()
            .find(|t| t.to == BoardingStatus::Absent)
        {
            // One confirmation per leave request, not one per direction.
            Some(first) => self.notify_all(std::slice::from_ref(first)).await,
            None => Vec::new(),
        };
        Ok(AbsenceReceipt {
            student_id,
            trip_day,
            transitions,
            notifications,
        })
    }

    pub async fn reset_for_day(&self, day: NaiveDate) -> Result<ResetReport> {
        reset::reset_for_day(&self.pool, day, Utc::now()).await
    }

    pub async fn failed_deliveries(&self, since: DateTime<Utc>) -> Result<Vec<NotificationLogRow>> {
        db::failed_deliveries(&self.pool, since).await
    }
}
