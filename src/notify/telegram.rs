use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::debug;

use super::MessageSender;

/// Delivers through the Telegram Bot API. Handles are chat ids, optionally
/// written as `tg:<chat id>`.
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }
}

pub fn parse_chat_id(handle: &str) -> Result<ChatId> {
    let raw = handle.trim();
    let raw = raw.strip_prefix("tg:").unwrap_or(raw);
    let id: i64 = raw
        .parse()
        .with_context(|| format!("not a telegram chat id: {handle:?}"))?;
    Ok(ChatId(id))
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_message(&self, handle: &str, text: &str) -> Result<()> {
        let chat_id = parse_chat_id(handle)?;
        debug!(chat_id = chat_id.0, "sending telegram message");
        self.bot
            .send_message(chat_id, text.to_string())
            .await
            .context("telegram send failed")?;
        Ok(())
    }
}
