//! Read-only views of the administrative directories: card assignments,
//! students, guardians and messaging identity links.
use crate::db::{self, Pool};
use crate::error::{Result, RideError};
use crate::model::{GuardianId, Student, StudentId, Subject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait CardDirectory: Send + Sync {
    /// Student holding `card_id` under an assignment valid at `at`.
    async fn card_holder(&self, card_id: &str, at: DateTime<Utc>) -> Result<Option<StudentId>>;

    async fn student(&self, student_id: StudentId) -> Result<Option<Student>>;
}

#[async_trait]
pub trait LinkDirectory: Send + Sync {
    async fn guardians_of(&self, student_id: StudentId) -> Result<Vec<GuardianId>>;

    /// Active messaging handles for a subject. At most one is expected.
    async fn active_handles(&self, subject: Subject) -> Result<Vec<String>>;
}

/// Both directories backed by the service's own SQLite tables.
#[derive(Debug, Clone)]
pub struct SqlDirectory {
    pool: Pool,
}

impl SqlDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CardDirectory for SqlDirectory {
    async fn card_holder(&self, card_id: &str, at: DateTime<Utc>) -> Result<Option<StudentId>> {
        db::active_card_holder(&self.pool, card_id, at).await
    }

    async fn student(&self, student_id: StudentId) -> Result<Option<Student>> {
        db::fetch_student(&self.pool, student_id).await
    }
}

#[async_trait]
impl LinkDirectory for SqlDirectory {
    async fn guardians_of(&self, student_id: StudentId) -> Result<Vec<GuardianId>> {
        db::active_guardians(&self.pool, student_id).await
    }

    async fn active_handles(&self, subject: Subject) -> Result<Vec<String>> {
        db::active_handles(&self.pool, subject).await
    }
}

/// Run a directory call under `limit`. Timeouts and storage failures both come
/// back as `TransientDependency` so callers can tell them from missing data.
pub async fn bounded<T, F>(limit: Duration, what: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(RideError::Database(err))) => {
            warn!(?err, what, "directory lookup failed");
            Err(RideError::TransientDependency(format!("{what}: {err}")))
        }
        Ok(Err(err)) => Err(err),
        Err(_) => {
            warn!(what, timeout_ms = limit.as_millis() as u64, "directory lookup timed out");
            Err(RideError::TransientDependency(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            )))
        }
    }
}
