pub mod boarding;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod guard;
pub mod model;
pub mod notify;
pub mod phase;
pub mod reset;
pub mod resolver;
pub mod service;

pub use error::{Result, RideError};
pub use service::RideService;
