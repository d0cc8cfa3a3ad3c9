//! Notification dispatcher: turns a committed boarding transition into one
//! message per linked account, logging every attempt.
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::{Config, Provider, Templates};
use crate::db::{self, Pool};
use crate::directory::{bounded, LinkDirectory};
use crate::error::{Result, RideError};
use crate::model::{BoardingStatus, DeliveryStatus, ServiceClock, StudentId, Subject, Transition};

pub mod telegram;
pub mod webhook;

pub use telegram::TelegramSender;
pub use webhook::WebhookSender;

/// Outbound messaging channel. `handle` is the recipient's account handle as
/// stored in the identity links.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, handle: &str, text: &str) -> AnyResult<()>;
}

/// Build the configured sender.
pub fn sender_from_config(cfg: &Config) -> AnyResult<Arc<dyn MessageSender>> {
    match cfg.messaging.provider {
        Provider::Telegram => {
            let tg = cfg
                .messaging
                .telegram
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("messaging.telegram is not configured"))?;
            Ok(Arc::new(TelegramSender::new(tg.bot_token.clone())))
        }
        Provider::Webhook => {
            let hook = cfg
                .messaging
                .webhook
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("messaging.webhook is not configured"))?;
            Ok(Arc::new(WebhookSender::new(&hook.url, hook.token.clone())?))
        }
    }
}

/// Outcome for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub recipient: String,
    pub log_id: Option<i64>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

/// Aggregate outcome of one fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeliveryReport {
    pub student_id: StudentId,
    pub template_id: String,
    pub sent: usize,
    pub failed: usize,
    pub deliveries: Vec<Delivery>,
    /// Subjects whose handles could not be looked up.
    pub lookup_errors: Vec<String>,
}

impl DeliveryReport {
    pub fn is_partial(&self) -> bool {
        self.failed > 0 || !self.lookup_errors.is_empty()
    }
}

/// Template id and body for a status a transition lands on.
pub fn template_for(templates: &Templates, to: BoardingStatus) -> Option<(&'static str, &str)> {
    match to {
        BoardingStatus::Boarded => Some(("boarded", templates.boarded.as_str())),
        BoardingStatus::Dropped => Some(("dropped", templates.dropped.as_str())),
        BoardingStatus::Absent => Some(("absent_confirmed", templates.absent_confirmed.as_str())),
        BoardingStatus::Waiting => None,
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left verbatim.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: Pool,
    links: Arc<dyn LinkDirectory>,
    sender: Arc<dyn MessageSender>,
    templates: Templates,
    clock: ServiceClock,
    lookup_timeout: Duration,
    delivery_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        pool: Pool,
        links: Arc<dyn LinkDirectory>,
        sender: Arc<dyn MessageSender>,
        templates: Templates,
        clock: ServiceClock,
        lookup_timeout: Duration,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            links,
            sender,
            templates,
            clock,
            lookup_timeout,
            delivery_timeout,
        }
    }

    /// Fan a transition out to the student and every active guardian.
    /// Recipients are independent: one failure never stops the others.
    #[instrument(skip(self, transition), fields(to = transition.to.as_str()))]
    pub async fn dispatch(
        &self,
        student_id: StudentId,
        transition: &Transition,
    ) -> Result<DeliveryReport> {
        let Some((template_id, template)) = template_for(&self.templates, transition.to) else {
            return Ok(DeliveryReport {
                student_id,
                ..Default::default()
            });
        };

        let student_name = match bounded(
            self.lookup_timeout,
            "student lookup",
            db::fetch_student(&self.pool, student_id),
        )
        .await
        {
            Ok(Some(student)) => student.display_name,
            Ok(None) => {
                return Err(RideError::ReferenceError {
                    entity: "student",
                    id: student_id,
                })
            }
            Err(err) => {
                warn!(?err, student_id, "student name unavailable; using id");
                format!("Student #{student_id}")
            }
        };
        let local = self.clock.local(transition.at);
        let body = render(
            template,
            &[
                ("student", student_name),
                ("direction", transition.key.direction.as_str().to_string()),
                ("time", local.format("%H:%M").to_string()),
                ("date", transition.key.trip_day.format("%Y-%m-%d").to_string()),
            ],
        );

        let (handles, lookup_errors) = self.recipients(student_id).await?;
        let attempts = handles
            .iter()
            .map(|handle| self.deliver(student_id, handle, template_id, &body));
        let deliveries: Vec<Delivery> = join_all(attempts).await;

        let sent = deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::Sent)
            .count();
        let failed = deliveries.len() - sent;
        info!(student_id, template_id, sent, failed, "notification fan-out finished");
        Ok(DeliveryReport {
            student_id,
            template_id: template_id.to_string(),
            sent,
            failed,
            deliveries,
            lookup_errors,
        })
    }

    /// Active handles for the student and their guardians, de-duplicated.
    async fn recipients(&self, student_id: StudentId) -> Result<(Vec<String>, Vec<String>)> {
        let mut subjects = vec![Subject::Student(student_id)];
        let mut lookup_errors = Vec::new();
        match bounded(
            self.lookup_timeout,
            "guardian lookup",
            self.links.guardians_of(student_id),
        )
        .await
        {
            Ok(guardians) => subjects.extend(guardians.into_iter().map(Subject::Guardian)),
            Err(err) => {
                warn!(?err, student_id, "guardian lookup failed");
                lookup_errors.push(format!("guardians of student {student_id}: {err}"));
            }
        }

        let mut seen = HashSet::new();
        let mut handles = Vec::new();
        for subject in subjects {
            match bounded(
                self.lookup_timeout,
                "link lookup",
                self.links.active_handles(subject),
            )
            .await
            {
                Ok(found) => {
                    if found.len() > 1 {
                        warn!(?subject, count = found.len(), "more than one active link");
                    }
                    for handle in found {
                        if seen.insert(handle.clone()) {
                            handles.push(handle);
                        }
                    }
                }
                Err(err) => {
                    warn!(?err, ?subject, "link lookup failed");
                    lookup_errors.push(format!(
                        "{} {}: {err}",
                        subject.type_str(),
                        subject.id()
                    ));
                }
            }
        }
        Ok((handles, lookup_errors))
    }

    /// One logged attempt: `sending` row first, then `sent` or `failed`.
    async fn deliver(
        &self,
        student_id: StudentId,
        handle: &str,
        template_id: &str,
        body: &str,
    ) -> Delivery {
        let log_id = match db::insert_notification_sending(
            &self.pool,
            student_id,
            handle,
            template_id,
            body,
            Utc::now(),
        )
        .await
        {
            Ok(id) => id,
            Err(err) => {
                // No log row, no send: the attempt could not be audited.
                warn!(?err, recipient = handle, "failed to log notification");
                return Delivery {
                    recipient: handle.to_string(),
                    log_id: None,
                    status: DeliveryStatus::Failed,
                    error: Some(err.to_string()),
                };
            }
        };

        let outcome = match tokio::time::timeout(
            self.delivery_timeout,
            self.sender.send_message(handle, body),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.delivery_timeout.as_millis()
            )),
        };

        let (status, error) = match outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(detail) => {
                let err = RideError::DeliveryFailed {
                    recipient: handle.to_string(),
                    detail,
                };
                warn!(%err, log_id, "delivery failed");
                (DeliveryStatus::Failed, Some(err.to_string()))
            }
        };
        if let Err(err) =
            db::finish_notification(&self.pool, log_id, status, error.as_deref(), Utc::now()).await
        {
            warn!(?err, log_id, "failed to close notification log row");
        }
        Delivery {
            recipient: handle.to_string(),
            log_id: Some(log_id),
            status,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    #[test]
    fn render_substitutes_known_placeholders() {
        let out = render(
            "{student} boarded at {time} ({unknown})",
            &[("student", "Amy".into()), ("time", "08:00".into())],
        );
        assert_eq!(out, "Amy boarded at 08:00 ({unknown})");
    }

    #[test]
    fn templates_cover_every_notified_status() {
        let cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
        assert_eq!(
            template_for(&cfg.templates, BoardingStatus::Boarded).map(|t| t.0),
            Some("boarded")
        );
        assert_eq!(
            template_for(&cfg.templates, BoardingStatus::Dropped).map(|t| t.0),
            Some("dropped")
        );
        assert_eq!(
            template_for(&cfg.templates, BoardingStatus::Absent).map(|t| t.0),
            Some("absent_confirmed")
        );
        assert!(template_for(&cfg.templates, BoardingStatus::Waiting).is_none());
    }

    #[test]
    fn sender_from_config_picks_provider() {
        let mut cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
        assert!(sender_from_config(&cfg).is_ok());
        cfg.messaging.provider = Provider::Webhook;
        assert!(sender_from_config(&cfg).is_ok());
        cfg.messaging.webhook = None;
        assert!(sender_from_config(&cfg).is_err());
    }
}
