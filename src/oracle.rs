//! Oracle client for task generation, answer evaluation, and transcription
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (Gemini's
//! compatibility layer by default). The generator and evaluator depend on the
//! [`TextOracle`] and [`SpeechToText`] traits rather than this client so tests
//! can substitute fakes.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::secrets::{self, SecretStore};

const TRANSCRIBE_PROMPT: &str = "Transcribe this audio recording exactly as spoken. \
Reply with only the transcription, no commentary. \
If the audio is silent or unintelligible, reply with exactly NO_SPEECH.";

const NO_SPEECH_MARKER: &str = "NO_SPEECH";

/// Text-generation seam.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn generate(&self, parts: Vec<ContentPart>) -> Result<String, OracleError>;
}

/// Speech-to-text seam. `Ok(None)` means the audio carried no usable speech.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Option<String>, OracleError>;
}

/// One part of a user message. The compatibility endpoint accepts plain text
/// and inline base64 audio.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "input_audio")]
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, Serialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Inline audio part from raw bytes. `format` is the codec name the
    /// endpoint expects ("ogg", "wav", "mp3").
    pub fn audio(bytes: &[u8], format: &str) -> Self {
        ContentPart::InputAudio {
            input_audio: InputAudio {
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
                format: format.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

impl ChatMessage {
    fn system(text: &str) -> Self {
        Self {
            role: "system",
            content: serde_json::json!(text),
        }
    }

    /// A single text part is sent as a plain string for maximum provider
    /// compatibility; anything else goes as an array of parts.
    fn user(parts: Vec<ContentPart>) -> Self {
        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => serde_json::json!(text),
            _ => serde_json::json!(parts),
        };
        Self {
            role: "user",
            content,
        }
    }
}

/// HTTP client for the chat-completions endpoint.
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    config: OracleConfig,
    api_key: String,
}

impl OracleClient {
    pub fn new(config: OracleConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client for oracle")?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Resolve the API key from the secret store and build a client.
    pub fn from_secrets(config: OracleConfig, store: &Arc<SecretStore>) -> Result<Self> {
        let api_key = store
            .get(secrets::ORACLE_API_KEY)
            .context("oracle API key unavailable")?;
        Self::new(config, api_key)
    }

    async fn complete(&self, parts: Vec<ContentPart>) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::system(&self.config.system_prompt),
                ChatMessage::user(parts),
            ],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
        };

        debug!(model = %self.config.model, "sending oracle request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status,
                message: snippet(&message),
            });
        }

        let body = response.text().await?;
        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| OracleError::Malformed(format!("{} (body: {})", e, snippet(&body))))?;
        extract_content(&raw)
    }
}

#[async_trait]
impl TextOracle for OracleClient {
    async fn generate(&self, parts: Vec<ContentPart>) -> Result<String, OracleError> {
        self.complete(parts).await
    }
}

#[async_trait]
impl SpeechToText for OracleClient {
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Option<String>, OracleError> {
        let parts = vec![
            ContentPart::text(TRANSCRIBE_PROMPT),
            ContentPart::audio(audio, format),
        ];
        match self.complete(parts).await {
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_SPEECH_MARKER) {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(OracleError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Pull the assistant text out of a chat-completions response.
///
/// Providers disagree on the content shape: most return a plain string, some
/// return an array of typed parts. Navigate the raw value instead of strict
/// struct deserialization so either works.
fn extract_content(raw: &serde_json::Value) -> Result<String, OracleError> {
    let content = raw
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .ok_or_else(|| OracleError::Malformed("no choices[0].message.content".to_string()))?;

    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| {
                if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                    part.get("text").and_then(|t| t.as_str()).map(str::to_string)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(OracleError::Empty);
    }
    Ok(text.to_string())
}

/// Keep logged API bodies to a readable size.
fn snippet(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
