use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

use super::MessageSender;

/// Delivers by POSTing `{"to": handle, "text": body}` to a push gateway.
#[derive(Clone)]
pub struct WebhookSender {
    http: Client,
    url: Url,
    token: String,
}

impl fmt::Debug for WebhookSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSender")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebhookSender {
    pub fn new(url: &str, token: String) -> Result<Self> {
        let url = Url::parse(url.trim()).context("invalid webhook URL")?;
        let http = Client::builder()
            .user_agent("ridewatch/0.1")
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, url, token })
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.url.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build webhook request")
    }
}

pub fn build_message_body(handle: &str, text: &str) -> Value {
    json!({ "to": handle, "text": text })
}

#[async_trait]
impl MessageSender for WebhookSender {
    async fn send_message(&self, handle: &str, text: &str) -> Result<()> {
        let request = self.build_request(&build_message_body(handle, text))?;
        debug!(url = %request.url(), recipient = handle, "sending webhook message");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach push gateway")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from push gateway: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("push gateway error {}: {}", status, body));
        }
        Ok(())
    }
}
