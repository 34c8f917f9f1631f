// =============================================================================
// Telegram Notifier — sendMessage / editMessageText over the Bot API
// =============================================================================
//
// SECURITY: the bot token is part of the request URL and is never logged.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{MessageHandle, Notifier};

/// Telegram rejects texts above 4096 characters; stay safely below.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Per-request timeout. Notifications must not stall the trading loop.
const REQUEST_TIMEOUT_SECS: u64 = 5;

const API_ROOT: &str = "https://api.telegram.org";

/// Notifier posting to a single Telegram chat.
pub struct TelegramNotifier {
    base_url: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Create a notifier for `chat_id` using `bot_token`.
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        anyhow::ensure!(!bot_token.trim().is_empty(), "bot token is empty");
        anyhow::ensure!(!chat_id.trim().is_empty(), "chat id is empty");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url: format!("{API_ROOT}/bot{}", bot_token.trim()),
            chat_id: chat_id.trim().to_string(),
            client,
        })
    }

    async fn post(&self, method: &str, form: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, method);
        let body: Value = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse telegram {method} response"))?;
        Ok(body)
    }
}

/// Cut `text` to at most `MAX_MESSAGE_CHARS` characters (not bytes).
pub fn truncate_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Extract `result.message_id` from a `sendMessage` reply with `ok: true`.
pub fn parse_message_id(body: &Value) -> Option<MessageHandle> {
    if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    body.get("result")?
        .get("message_id")?
        .as_i64()
        .map(MessageHandle)
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Option<MessageHandle> {
        let form = [
            ("chat_id", self.chat_id.clone()),
            ("text", truncate_message(text).to_string()),
        ];
        match self.post("sendMessage", &form).await {
            Ok(body) => {
                let handle = parse_message_id(&body);
                if handle.is_none() {
                    warn!(response = %body, "telegram sendMessage not acknowledged");
                }
                debug!(message_id = ?handle.map(|h| h.0), "telegram message sent");
                handle
            }
            Err(e) => {
                warn!(error = %e, "telegram sendMessage failed");
                None
            }
        }
    }

    async fn update(&self, handle: MessageHandle, text: &str) {
        let form = [
            ("chat_id", self.chat_id.clone()),
            ("message_id", handle.0.to_string()),
            ("text", truncate_message(text).to_string()),
        ];
        if let Err(e) = self.post("editMessageText", &form).await {
            warn!(message_id = handle.0, error = %e, "telegram editMessageText failed");
        }
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("base_url", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}
