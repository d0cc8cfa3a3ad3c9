//! Configuration loader and validator for the ride-event service.
use crate::model::ServiceClock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub guard: Guard,
    pub timeouts: Timeouts,
    pub messaging: Messaging,
    pub templates: Templates,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Offset of the service area's local time from UTC.
    pub utc_offset_minutes: i32,
    /// Local hour at which a new trip-day starts.
    pub day_rollover_hour: u32,
    pub reset_poll_seconds: u64,
}

/// Dedup/rate guard settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guard {
    pub dedup_window_seconds: u64,
}

/// Bounds on calls to external dependencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    pub lookup_ms: u64,
    pub delivery_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Telegram,
    Webhook,
}

/// Outbound messaging provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Messaging {
    pub provider: Provider,
    #[serde(default)]
    pub telegram: Option<Telegram>,
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    pub url: String,
    pub token: String,
}

/// Message bodies per transition. Placeholders: `{student}`, `{direction}`,
/// `{time}`, `{date}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Templates {
    pub boarded: String,
    pub dropped: String,
    pub absent_confirmed: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/ridewatch.db", self.app.data_dir))
    }

    pub fn clock(&self) -> ServiceClock {
        // validate() has already range-checked both values.
        ServiceClock::new(self.app.utc_offset_minutes, self.app.day_rollover_hour)
            .unwrap_or_else(ServiceClock::utc)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.guard.dedup_window_seconds)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.lookup_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.delivery_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(ConfigError::Invalid(
            "app.utc_offset_minutes must be within one day",
        ));
    }
    if cfg.app.day_rollover_hour > 23 {
        return Err(ConfigError::Invalid("app.day_rollover_hour must be 0..=23"));
    }
    if cfg.app.reset_poll_seconds == 0 {
        return Err(ConfigError::Invalid("app.reset_poll_seconds must be > 0"));
    }

    if cfg.guard.dedup_window_seconds == 0 {
        return Err(ConfigError::Invalid("guard.dedup_window_seconds must be > 0"));
    }

    if cfg.timeouts.lookup_ms == 0 {
        return Err(ConfigError::Invalid("timeouts.lookup_ms must be > 0"));
    }
    if cfg.timeouts.delivery_ms == 0 {
        return Err(ConfigError::Invalid("timeouts.delivery_ms must be > 0"));
    }

    match cfg.messaging.provider {
        Provider::Telegram => {
            let Some(tg) = &cfg.messaging.telegram else {
                return Err(ConfigError::Invalid("messaging.telegram is required"));
            };
            if tg.bot_token.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "messaging.telegram.bot_token must be non-empty",
                ));
            }
        }
        Provider::Webhook => {
            let Some(hook) = &cfg.messaging.webhook else {
                return Err(ConfigError::Invalid("messaging.webhook is required"));
            };
            if reqwest::Url::parse(hook.url.trim()).is_err() {
                return Err(ConfigError::Invalid("messaging.webhook.url must be a valid URL"));
            }
            if hook.token.trim().is_empty() {
                return Err(ConfigError::Invalid("messaging.webhook.token must be non-empty"));
            }
        }
    }

    let t = &cfg.templates;
    if t.boarded.trim().is_empty() {
        return Err(ConfigError::Invalid("templates.boarded must be non-empty"));
    }
    if t.dropped.trim().is_empty() {
        return Err(ConfigError::Invalid("templates.dropped must be non-empty"));
    }
    if t.absent_confirmed.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "templates.absent_confirmed must be non-empty",
        ));
    }

    Ok(())
}

/// Returns the example YAML shipped with the service.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  utc_offset_minutes: 480
  day_rollover_hour: 3
  reset_poll_seconds: 60

guard:
  dedup_window_seconds: 30

timeouts:
  lookup_ms: 2000
  delivery_ms: 5000

messaging:
  provider: telegram
  telegram:
    bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  webhook:
    url: "https://push.example.com/v1/messages"
    token: "YOUR_PUSH_TOKEN"

templates:
  boarded: "{student} boarded the bus ({direction}) at {time}."
  dropped: "{student} got off the bus at {time}."
  absent_confirmed: "Leave confirmed: {student} will not ride on {date}."
"#
}
