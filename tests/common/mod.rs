#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ridewatch::config::{self, Config};
use ridewatch::db::{self, Pool};
use ridewatch::directory::SqlDirectory;
use ridewatch::model::{Direction, ScanRequest};
use ridewatch::notify::MessageSender;
use ridewatch::RideService;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

pub const DRIVER: i64 = 7;

pub async fn memory_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// File-backed pool; keep the `TempDir` alive for the test's duration.
pub async fn file_pool() -> (TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/ridewatch.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

/// Example config on a UTC clock with midnight rollover.
pub fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.app.utc_offset_minutes = 0;
    cfg.app.day_rollover_hour = 0;
    cfg.timeouts.lookup_ms = 1_000;
    cfg.timeouts.delivery_ms = 200;
    cfg
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
}

pub fn scan(card: &str, when: DateTime<Utc>) -> ScanRequest {
    ScanRequest {
        card_id: card.to_string(),
        driver_id: DRIVER,
        direction: None,
        coords: None,
        at: when,
        metadata: None,
    }
}

pub fn scan_dir(card: &str, direction: Direction, when: DateTime<Utc>) -> ScanRequest {
    ScanRequest {
        direction: Some(direction),
        ..scan(card, when)
    }
}

pub async fn seed_driver(pool: &Pool, id: i64) {
    sqlx::query("INSERT INTO drivers (id, display_name) VALUES (?, ?)")
        .bind(id)
        .bind(format!("Driver {id}"))
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_student(pool: &Pool, id: i64, name: &str, driver: Option<i64>) {
    sqlx::query("INSERT INTO students (id, display_name, assigned_driver_id) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(driver)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn assign_card(pool: &Pool, card: &str, student: i64) {
    sqlx::query("INSERT INTO card_assignments (card_id, student_id, valid_from_ms) VALUES (?, ?, 0)")
        .bind(card)
        .bind(student)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_guardian(pool: &Pool, id: i64, student: i64) {
    sqlx::query("INSERT INTO guardians (id, display_name) VALUES (?, ?)")
        .bind(id)
        .bind(format!("Guardian {id}"))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO student_guardians (student_id, guardian_id) VALUES (?, ?)")
        .bind(student)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn link(pool: &Pool, subject_type: &str, subject_id: i64, handle: &str) {
    sqlx::query(
        "INSERT INTO identity_links (subject_type, subject_id, handle, linked_at_ms) \
         VALUES (?, ?, ?, 0)",
    )
    .bind(subject_type)
    .bind(subject_id)
    .bind(handle)
    .execute(pool)
    .await
    .unwrap();
}

/// Driver 7, student 1 ("Amy") with card `CARD-1`, a linked student account
/// and two linked guardians.
pub async fn seed_basic(pool: &Pool) {
    seed_driver(pool, DRIVER).await;
    seed_student(pool, 1, "Amy", Some(DRIVER)).await;
    assign_card(pool, "CARD-1", 1).await;
    link(pool, "student", 1, "amy").await;
    seed_guardian(pool, 10, 1).await;
    seed_guardian(pool, 11, 1).await;
    link(pool, "guardian", 10, "mum").await;
    link(pool, "guardian", 11, "dad").await;
}

/// Sender that records every call and fails for configured handles.
#[derive(Clone, Default)]
pub struct RecordingSender {
    failing: Arc<Mutex<HashSet<String>>>,
    slow: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSender {
    pub async fn fail_for(&self, handle: &str) {
        self.failing.lock().await.insert(handle.to_string());
    }

    /// Never answers for `handle`, so the delivery timeout fires.
    pub async fn hang_for(&self, handle: &str) {
        self.slow.lock().await.insert(handle.to_string());
    }

    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }

    pub async fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.calls().await.into_iter().map(|c| c.0).collect();
        handles.sort();
        handles
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_message(&self, handle: &str, text: &str) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((handle.to_string(), text.to_string()));
        if self.slow.lock().await.contains(handle) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing.lock().await.contains(handle) {
            return Err(anyhow!("recipient {handle} unreachable"));
        }
        Ok(())
    }
}

pub fn service(pool: &Pool, sender: &RecordingSender) -> RideService {
    service_with(pool, sender, &test_config())
}

pub fn service_with(pool: &Pool, sender: &RecordingSender, cfg: &Config) -> RideService {
    let directory = Arc::new(SqlDirectory::new(pool.clone()));
    RideService::new(
        pool.clone(),
        directory.clone(),
        directory,
        Arc::new(sender.clone()),
        cfg,
    )
}
