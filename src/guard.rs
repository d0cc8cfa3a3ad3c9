//! Dedup/rate guard against rapid repeat scans of the same card.
use crate::db;
use crate::error::Result;
use crate::model::RideKey;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::debug;

/// Suppresses repeats of the same card and resolved key whose timestamp lies
/// within the window of the stored accepted scan, on either side of it.
/// Readers that flush late can deliver older scans, so an earlier timestamp
/// outside the window is still claimed. The decision is one conditional
/// upsert, so racing readers and retried requests cannot both win.
#[derive(Debug, Clone, Copy)]
pub struct DedupGuard {
    window: Duration,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when this scan may proceed; false when it must be suppressed.
    pub async fn claim(
        &self,
        conn: &mut SqliteConnection,
        card_id: &str,
        key: &RideKey,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let claimed = db::claim_scan_guard(conn, card_id, key, at, window_ms).await?;
        if !claimed {
            debug!(
                card_id,
                student_id = key.student_id,
                direction = key.direction.as_str(),
                "repeat scan inside dedup window"
            );
        }
        Ok(claimed)
    }
}
