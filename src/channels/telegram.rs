//! Telegram channel: long-polls the Bot API for commands and sends HTML messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{CommandSource, CommandStream, IncomingCommand, Notifier};
use crate::error::ChannelError;
use crate::store::TenantId;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Commands advertised in the client's command menu.
const BOT_COMMANDS: &[(&str, &str)] = &[
    ("add", "Add or update rules: /add mk clean +sell -wtb"),
    ("del", "Delete rules: /del mk"),
    ("list", "Show rules"),
    ("include", "Default include terms for new rules"),
    ("exclude", "Default exclude terms for new rules"),
    ("block", "Block a term globally"),
    ("unblock", "Remove a global block"),
    ("blocklist", "Show global blocks"),
    ("setsummary", "Match summaries on/off"),
    ("setfullword", "Full-word matching on/off"),
    ("setregex", "Regex matching on/off"),
    ("setinterval", "Polling interval: /setinterval 30 60"),
    ("setnotifylimit", "Dedup history size"),
    ("status", "Runtime status"),
    ("help", "Show help"),
];

/// Bot API client shared between the channel and its listener task.
struct BotApi {
    bot_token: SecretString,
    client: reqwest::Client,
    send_timeout: Duration,
}

impl BotApi {
    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Send a text message, splitting at Telegram's length limit.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk, reply_to).await?;
        }
        Ok(())
    }

    /// Send one chunk, HTML first with a plain-text retry.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        let mut html_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(id) = reply_to {
            html_body["reply_to_message_id"] = Value::from(id);
        }

        let html_resp = self.post("sendMessage", &html_body).await?;
        if html_resp.status().is_success() {
            return Ok(());
        }

        let html_status = html_resp.status();
        tracing::warn!(
            status = ?html_status,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(id) = reply_to {
            plain_body["reply_to_message_id"] = Value::from(id);
        }
        let plain_resp = self.post("sendMessage", &plain_body).await?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(send_failed(format!(
                "sendMessage failed (html: {html_status}, plain: {plain_err})"
            )));
        }
        Ok(())
    }

    async fn post(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .timeout(self.send_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout {
                        name: "telegram".into(),
                        timeout: self.send_timeout,
                    }
                } else {
                    send_failed(e.to_string())
                }
            })
    }

    async fn delete_webhook(&self) {
        match self.post("deleteWebhook", &serde_json::json!({})).await {
            Ok(resp) if resp.status().is_success() => tracing::debug!("Telegram webhook cleared"),
            Ok(resp) => tracing::warn!(status = ?resp.status(), "Telegram deleteWebhook failed"),
            Err(e) => tracing::warn!("Telegram deleteWebhook error: {e}"),
        }
    }

    async fn set_commands(&self) {
        let commands: Vec<Value> = BOT_COMMANDS
            .iter()
            .map(|(command, description)| {
                serde_json::json!({ "command": command, "description": description })
            })
            .collect();
        let body = serde_json::json!({ "commands": commands });
        match self.post("setMyCommands", &body).await {
            Ok(resp) if resp.status().is_success() => tracing::info!("Telegram command menu set"),
            Ok(resp) => tracing::warn!(status = ?resp.status(), "Telegram setMyCommands failed"),
            Err(e) => tracing::warn!("Telegram setMyCommands error: {e}"),
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Value, String> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });
        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            // A webhook is still registered somewhere.
            self.delete_webhook().await;
            return Err("getUpdates conflict".into());
        }
        if !resp.status().is_success() {
            return Err(format!("getUpdates returned {}", resp.status()));
        }
        resp.json().await.map_err(|e| e.to_string())
    }
}

/// Telegram channel. Each chat that talks to the bot is its own tenant.
pub struct TelegramChannel {
    api: Arc<BotApi>,
    allowed_chats: Vec<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_chats: Vec<String>, send_timeout: Duration) -> Self {
        Self {
            api: Arc::new(BotApi {
                bot_token,
                client: reqwest::Client::new(),
                send_timeout,
            }),
            allowed_chats,
        }
    }

    /// Check if a chat id is in the allowed list.
    pub fn is_chat_allowed(&self, chat_id: &str) -> bool {
        check_chat_allowed(&self.allowed_chats, chat_id)
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, chat: &TenantId, text: &str) -> Result<(), ChannelError> {
        self.api.send_message(chat.as_str(), text, None).await
    }
}

#[async_trait]
impl CommandSource for TelegramChannel {
    async fn start(&self) -> Result<CommandStream, ChannelError> {
        self.api.delete_webhook().await;
        self.api.set_commands().await;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api = Arc::clone(&self.api);
        let allowed_chats = self.allowed_chats.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for commands...");

            loop {
                let data = match api.get_updates(offset).await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    tracing::warn!("Telegram getUpdates returned no result: {data}");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(command) = command_from_update(update) else {
                        continue;
                    };

                    if !check_chat_allowed(&allowed_chats, command.tenant.as_str()) {
                        tracing::warn!(
                            chat = %command.tenant,
                            "Telegram: ignoring command from unauthorized chat"
                        );
                        continue;
                    }

                    if tx.send(command).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|cmd| (cmd, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn reply(&self, command: &IncomingCommand, text: &str) -> Result<(), ChannelError> {
        self.api
            .send_message(command.tenant.as_str(), text, command.message_id)
            .await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn send_failed(reason: String) -> ChannelError {
    ChannelError::SendFailed {
        name: "telegram".into(),
        reason,
    }
}

/// Extract a command from one getUpdates entry.
fn command_from_update(update: &Value) -> Option<IncomingCommand> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;
    let message_id = message.get("message_id").and_then(Value::as_i64);
    IncomingCommand::parse(TenantId::from(chat_id), text, message_id)
}

fn check_chat_allowed(allowed_chats: &[String], chat_id: &str) -> bool {
    allowed_chats.iter().any(|c| c == "*" || c == chat_id)
}

/// Split a message into chunks of at most `max_len` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let Some((limit, _)) = remaining.char_indices().nth(max_len) else {
            chunks.push(remaining.to_string());
            break;
        };

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
        if remaining.is_empty() {
            break;
        }
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
