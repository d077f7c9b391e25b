//! Configuration management
//!
//! TOML file with per-section defaults; every field can be omitted. Secrets
//! are not stored here: the `[secrets]` section only says where to fetch
//! each one from (environment variable, file, or inline for tests).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::secrets::SecretSource;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Webhook server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Telegram Bot API settings
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Text-generation / transcription oracle settings
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Per-user rate limiting
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Database location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Practice-session knobs (languages, target language)
    #[serde(default)]
    pub practice: PracticeConfig,
    /// Where each named secret is fetched from
    #[serde(default)]
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Overall per-request timeout enforced by the server
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum accepted webhook body size
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_body_limit() -> usize {
    256 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base URL (overridable for tests)
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Per-call timeout for Bot API requests
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
    /// Formatting mode sent with messages; the fallback retry drops it
    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout() -> u64 {
    15
}

fn default_parse_mode() -> String {
    "Markdown".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            timeout_secs: default_telegram_timeout(),
            parse_mode: default_parse_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// OpenAI-compatible chat-completions endpoint base
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,
    /// Model used for generation, evaluation and transcription
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
    /// System preamble prepended to every oracle call
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_oracle_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_oracle_model() -> String {
    "gemini-2.0-flash-001".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_oracle_timeout() -> u64 {
    30
}

fn default_system_prompt() -> String {
    "You are a friendly, encouraging English language tutor.".to_string()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_base_url(),
            model: default_oracle_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_oracle_timeout(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages allowed per user per window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    /// Sliding-window length
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
}

fn default_max_requests() -> usize {
    10
}

fn default_window_minutes() -> i64 {
    5
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_minutes: default_window_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database file; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database path, creating the parent directory if needed.
    pub fn db_path(&self) -> Result<PathBuf> {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => data_dir()?.join("lingotutor.db"),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeConfig {
    /// The language being practiced
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Languages the bot may respond in (offered by /language)
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_target_language() -> String {
    "English".to_string()
}

fn default_languages() -> Vec<String> {
    ["English", "Spanish", "French", "German", "Italian", "Portuguese"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            languages: default_languages(),
        }
    }
}

/// Source for each named secret the bot needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_bot_token_source")]
    pub bot_token: SecretSource,
    #[serde(default = "default_oracle_key_source")]
    pub oracle_api_key: SecretSource,
    /// Chat ids allowed to use the bot (JSON array or one per line)
    #[serde(default = "default_authorized_source")]
    pub authorized_users: SecretSource,
    /// Chat ids with admin rights
    #[serde(default = "default_admin_source")]
    pub admin_users: SecretSource,
    /// Compared against X-Telegram-Bot-Api-Secret-Token; unset skips the check
    #[serde(default = "default_webhook_secret_source")]
    pub webhook_secret: SecretSource,
}

fn default_bot_token_source() -> SecretSource {
    SecretSource::env("TELEGRAM_BOT_TOKEN")
}

fn default_oracle_key_source() -> SecretSource {
    SecretSource::env("GEMINI_API_KEY")
}

fn default_authorized_source() -> SecretSource {
    SecretSource::env("AUTHORIZED_USERS")
}

fn default_admin_source() -> SecretSource {
    SecretSource::env("ADMIN_USERS")
}

fn default_webhook_secret_source() -> SecretSource {
    SecretSource::env("WEBHOOK_SECRET")
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            bot_token: default_bot_token_source(),
            oracle_api_key: default_oracle_key_source(),
            authorized_users: default_authorized_source(),
            admin_users: default_admin_source(),
            webhook_secret: default_webhook_secret_source(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, or from the default
    /// location (writing a fresh default file there if none exists).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))
            }
            None => {
                let path = config_path()?;
                if path.exists() {
                    let contents = std::fs::read_to_string(&path)
                        .context("Failed to read config file")?;
                    toml::from_str(&contents).context("Failed to parse config file")
                } else {
                    let config = Config::default();
                    config.save(&path)?;
                    Ok(config)
                }
            }
        }
    }

    /// Save configuration to the given path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "lingotutor", "lingotutor")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "lingotutor", "lingotutor")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_requests, 10);
        assert_eq!(config.limits.window_minutes, 5);
        assert_eq!(config.telegram.parse_mode, "Markdown");
        assert_eq!(config.practice.target_language, "English");
        assert!(config.practice.languages.contains(&"English".to_string()));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, config.server.port);
        assert_eq!(back.oracle.model, config.oracle.model);
        assert_eq!(back.practice.languages, config.practice.languages);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str("[server]\nport = 9999\n").unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.limits.max_requests, 10);
    }

    #[test]
    fn secret_sources_parse_from_toml() {
        let config: Config = toml::from_str(
            "[secrets]\nbot_token = { file = \"/run/secrets/token\" }\noracle_api_key = { value = \"sk-test\" }\n",
        )
        .unwrap();
        assert!(matches!(config.secrets.bot_token, SecretSource::File { .. }));
        assert!(matches!(config.secrets.oracle_api_key, SecretSource::Inline { .. }));
    }
}
