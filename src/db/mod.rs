//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed rows and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into those models.
//!
//! Callers import from `ridewatch::db`; the repository API and the commonly
//! used rows are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{BoardingRecord, DriverRow, NewScanEvent, NotificationLogRow, ScanEventRow};
