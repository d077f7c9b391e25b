//! Secret management
//!
//! Every credential the bot needs (bot token, oracle key, user lists,
//! webhook secret) is fetched through one store that caches values
//! in-process after the first read. The cache has an explicit
//! invalidation operation; nothing else ever drops it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Where a secret value comes from.
///
/// Untagged so the config file can say `{ env = "VAR" }`,
/// `{ file = "/path" }` or `{ value = "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretSource {
    Env { env: String },
    File { file: PathBuf },
    Inline { value: String },
}

impl SecretSource {
    pub fn env(var: &str) -> Self {
        SecretSource::Env { env: var.to_string() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        SecretSource::File { file: path.into() }
    }

    pub fn inline(value: &str) -> Self {
        SecretSource::Inline { value: value.to_string() }
    }
}

/// Secret names used across the crate.
pub const BOT_TOKEN: &str = "bot_token";
pub const ORACLE_API_KEY: &str = "oracle_api_key";
pub const AUTHORIZED_USERS: &str = "authorized_users";
pub const ADMIN_USERS: &str = "admin_users";
pub const WEBHOOK_SECRET: &str = "webhook_secret";

/// In-process secret store with a read-through cache.
pub struct SecretStore {
    sources: HashMap<String, SecretSource>,
    cache: Mutex<HashMap<String, String>>,
}

impl SecretStore {
    /// Build the store from the config's `[secrets]` section.
    pub fn from_config(config: &crate::config::SecretsConfig) -> Self {
        let mut sources = HashMap::new();
        sources.insert(BOT_TOKEN.to_string(), config.bot_token.clone());
        sources.insert(ORACLE_API_KEY.to_string(), config.oracle_api_key.clone());
        sources.insert(AUTHORIZED_USERS.to_string(), config.authorized_users.clone());
        sources.insert(ADMIN_USERS.to_string(), config.admin_users.clone());
        sources.insert(WEBHOOK_SECRET.to_string(), config.webhook_secret.clone());
        Self::with_sources(sources)
    }

    /// Build from an arbitrary name → source map (tests).
    pub fn with_sources(sources: HashMap<String, SecretSource>) -> Self {
        Self {
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get a secret value, reading its source on first access.
    pub fn get(&self, name: &str) -> Result<String> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(value) = cache.get(name) {
                return Ok(value.clone());
            }
        }

        let source = self
            .sources
            .get(name)
            .with_context(|| format!("Unknown secret '{}'", name))?;
        let value = retrieve(source)
            .with_context(|| format!("Failed to retrieve secret '{}'", name))?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), value.clone());
        }
        debug!(secret = name, "secret loaded");
        Ok(value)
    }

    /// Get a secret, mapping any retrieval failure to None.
    pub fn get_optional(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(err) => {
                debug!(secret = name, "optional secret unavailable: {err:#}");
                None
            }
        }
    }

    /// Drop one cached value so the next `get` re-reads the source.
    pub fn invalidate(&self, name: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(name);
        }
    }

    /// Overwrite a secret's backing value.
    ///
    /// Only file-backed sources can persist a write; environment-backed
    /// secrets are read-only from inside the process.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let source = self
            .sources
            .get(name)
            .with_context(|| format!("Unknown secret '{}'", name))?;

        match source {
            SecretSource::File { file } => {
                if let Some(parent) = file.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create secrets directory")?;
                }
                std::fs::write(file, value)
                    .with_context(|| format!("Failed to write secret file {}", file.display()))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(file, std::fs::Permissions::from_mode(0o600)).ok();
                }
            }
            SecretSource::Env { env } => {
                bail!("Secret '{}' is backed by environment variable {} and cannot be written", name, env);
            }
            SecretSource::Inline { .. } => {
                warn!(secret = name, "inline secret updated in cache only; edit the config to persist");
            }
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), value.to_string());
        }
        Ok(())
    }
}

fn retrieve(source: &SecretSource) -> Result<String> {
    match source {
        SecretSource::Env { env } => std::env::var(env)
            .with_context(|| format!("Environment variable {} not set", env)),
        SecretSource::File { file } => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read secret file {}", file.display()))
            .map(|s| s.trim().to_string()),
        SecretSource::Inline { value } => Ok(value.clone()),
    }
}
