//! Telegram Bot API client
//!
//! Outbound messaging plus voice-note download. Sending never fails the
//! caller: every error path logs and reports `false`, because a lost chat
//! message must not abort a state transition. The engine talks to this
//! through the [`ChatChannel`] trait so tests can capture outbound traffic.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;

/// Telegram rejects messages longer than this many characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Outbound messaging seam used by the engine.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Deliver one message; `true` when Telegram accepted it.
    async fn send(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> bool;
    /// Fetch the raw bytes of an uploaded file (voice notes).
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// Reply-keyboard attachment for a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// One button per label, one row per inner vec.
    Reply(Vec<Vec<String>>),
    /// Remove whatever keyboard is currently shown.
    Remove,
}

impl Keyboard {
    /// Single-column keyboard, one row per label.
    pub fn single_column<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Keyboard::Reply(labels.into_iter().map(|l| vec![l.into()]).collect())
    }

    fn to_markup(&self) -> serde_json::Value {
        match self {
            Keyboard::Reply(rows) => serde_json::json!({
                "keyboard": rows,
                "one_time_keyboard": true,
                "resize_keyboard": true,
            }),
            Keyboard::Remove => serde_json::json!({ "remove_keyboard": true }),
        }
    }
}

// ---- Webhook payload types ----

/// Incoming update delivered to the webhook.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<Voice>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Voice {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

// ---- Bot API response envelope ----

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<serde_json::Value>,
}

/// Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    config: TelegramConfig,
    bot_token: String,
    http_client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig, bot_token: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client for Telegram")?;
        Ok(Self {
            config,
            bot_token,
            http_client,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.config.api_base, self.bot_token, file_path
        )
    }

    /// Send one message, clipping and escaping as the Bot API requires.
    ///
    /// A 400 response triggers one retry without the parse mode, since
    /// malformed markup is the usual cause.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> bool {
        match self.try_send(chat_id, text, keyboard).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(chat_id, error = %e, "failed to send Telegram message");
                false
            }
        }
    }

    async fn try_send(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<bool> {
        let clipped = clip_message(text);
        let parse_mode = if self.config.parse_mode.is_empty() {
            None
        } else {
            Some(self.config.parse_mode.as_str())
        };
        let prepared = if parse_mode.is_some() {
            escape_markdown(&clipped)
        } else {
            clipped
        };
        let markup = keyboard.map(|k| k.to_markup());

        debug!(chat_id, chars = prepared.chars().count(), "sending Telegram message");
        let response = self
            .http_client
            .post(self.api_url("sendMessage"))
            .json(&SendMessageRequest {
                chat_id,
                text: &prepared,
                parse_mode,
                reply_markup: markup.clone(),
            })
            .send()
            .await
            .context("sendMessage request failed")?;

        let response = if response.status() == reqwest::StatusCode::BAD_REQUEST
            && parse_mode.is_some()
        {
            let body = response.text().await.unwrap_or_default();
            warn!(chat_id, %body, "Telegram rejected formatted message, retrying as plain text");
            self.http_client
                .post(self.api_url("sendMessage"))
                .json(&SendMessageRequest {
                    chat_id,
                    text: &prepared,
                    parse_mode: None,
                    reply_markup: markup,
                })
                .send()
                .await
                .context("plain-text retry failed")?
        } else {
            response
        };

        let envelope: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .context("failed to parse sendMessage response")?;
        if !envelope.ok {
            error!(
                chat_id,
                code = ?envelope.error_code,
                description = ?envelope.description,
                "Telegram rejected message"
            );
        }
        Ok(envelope.ok)
    }

    async fn file_path(&self, file_id: &str) -> Result<String> {
        let response: TelegramResponse<FileInfo> = self
            .http_client
            .get(self.api_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await
            .context("getFile request failed")?
            .json()
            .await
            .context("failed to parse getFile response")?;

        if !response.ok {
            bail!(
                "getFile rejected: {}",
                response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .result
            .and_then(|info| info.file_path)
            .context("getFile response had no file_path")
    }
}

#[async_trait]
impl ChatChannel for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> bool {
        self.send_message(chat_id, text, keyboard).await
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let path = self.file_path(file_id).await?;
        let bytes = self
            .http_client
            .get(self.file_url(&path))
            .send()
            .await
            .context("file download request failed")?
            .error_for_status()
            .context("file download rejected")?
            .bytes()
            .await
            .context("failed to read file body")?;
        info!(file_id, size = bytes.len(), "downloaded voice file");
        Ok(bytes.to_vec())
    }
}

/// Clip to Telegram's message limit, measured in characters.
fn clip_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    warn!(chars = text.chars().count(), "message too long, clipping");
    let clipped: String = text.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    format!("{clipped}...")
}

/// Escape the Markdown control characters that most often break parsing.
fn escape_markdown(text: &str) -> String {
    text.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace(']', "\\]")
        .replace('`', "\\`")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TelegramClient {
        TelegramClient::new(TelegramConfig::default(), "123456:token".to_string()).unwrap()
    }

    #[test]
    fn api_and_file_urls_embed_the_token() {
        let c = client();
        assert_eq!(
            c.api_url("sendMessage"),
            "https://api.telegram.org/bot123456:token/sendMessage"
        );
        assert_eq!(
            c.file_url("voice/file_1.oga"),
            "https://api.telegram.org/file/bot123456:token/voice/file_1.oga"
        );
    }

    #[test]
    fn long_messages_are_clipped_to_limit() {
        let long = "x".repeat(5000);
        let clipped = clip_message(&long);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);
        assert!(clipped.ends_with("..."));

        let multibyte = "é".repeat(5000);
        let clipped = clip_message(&multibyte);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);

        let short = "hello";
        assert_eq!(clip_message(short), "hello");
    }

    #[test]
    fn markdown_control_characters_are_escaped() {
        assert_eq!(
            escape_markdown("a_b *c* [d] `e`"),
            "a\\_b \\*c\\* \\[d\\] \\`e\\`"
        );
        assert_eq!(escape_markdown("plain text"), "plain text");
    }

    #[test]
    fn keyboard_markup_shapes() {
        let reply = Keyboard::single_column(["Error correction", "Free writing"]);
        let markup = reply.to_markup();
        assert_eq!(
            markup["keyboard"],
            serde_json::json!([["Error correction"], ["Free writing"]])
        );
        assert_eq!(markup["one_time_keyboard"], true);
        assert_eq!(markup["resize_keyboard"], true);

        assert_eq!(
            Keyboard::Remove.to_markup(),
            serde_json::json!({"remove_keyboard": true})
        );
    }

    #[test]
    fn update_deserializes_text_and_voice() {
        let text: Update = serde_json::from_str(
            r#"{"update_id": 7, "message": {"chat": {"id": 42}, "text": "/newtask"}}"#,
        )
        .unwrap();
        let msg = text.message.unwrap();
        assert_eq!(msg.chat.id, 42);
        assert_eq!(msg.text.as_deref(), Some("/newtask"));
        assert!(msg.voice.is_none());

        let voice: Update = serde_json::from_str(
            r#"{"update_id": 8, "message": {"chat": {"id": 42},
                "voice": {"file_id": "abc", "mime_type": "audio/ogg", "duration": 3}}}"#,
        )
        .unwrap();
        let msg = voice.message.unwrap();
        assert_eq!(msg.voice.as_ref().map(|v| v.file_id.as_str()), Some("abc"));

        let bare: Update = serde_json::from_str(r#"{"update_id": 9}"#).unwrap();
        assert!(bare.message.is_none());
    }
}
