//! Authorization lists
//!
//! The authorized-user and admin lists live in the secret store so
//! deployments can rotate them without touching the database. The backing
//! value accepts two formats: a JSON array (`["123","456"]`) or one id per
//! line. List reads fail open to empty (deny) rather than erroring.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::warn;

use crate::secrets::{self, SecretStore};

pub struct AuthRegistry {
    secrets: Arc<SecretStore>,
}

impl AuthRegistry {
    pub fn new(secrets: Arc<SecretStore>) -> Self {
        Self { secrets }
    }

    /// Chat ids allowed to talk to the bot.
    pub fn authorized_users(&self) -> Vec<String> {
        self.load_list(secrets::AUTHORIZED_USERS)
    }

    /// Chat ids with admin rights.
    pub fn admin_users(&self) -> Vec<String> {
        self.load_list(secrets::ADMIN_USERS)
    }

    pub fn is_authorized(&self, chat_id: i64) -> bool {
        let id = chat_id.to_string();
        self.authorized_users().iter().any(|u| *u == id)
    }

    pub fn is_admin(&self, chat_id: i64) -> bool {
        let id = chat_id.to_string();
        self.admin_users().iter().any(|u| *u == id)
    }

    /// Add a chat id to the authorized list. Returns false if already present.
    pub fn add_user(&self, user_id: &str) -> Result<bool> {
        let user_id = validate_user_id(user_id)?;
        let mut users = self.authorized_users();
        if users.iter().any(|u| *u == user_id) {
            return Ok(false);
        }
        users.push(user_id);
        self.store_list(secrets::AUTHORIZED_USERS, &users)?;
        Ok(true)
    }

    /// Remove a chat id from the authorized list. Returns false if absent.
    pub fn remove_user(&self, user_id: &str) -> Result<bool> {
        let user_id = validate_user_id(user_id)?;
        let mut users = self.authorized_users();
        let before = users.len();
        users.retain(|u| *u != user_id);
        if users.len() == before {
            return Ok(false);
        }
        self.store_list(secrets::AUTHORIZED_USERS, &users)?;
        Ok(true)
    }

    fn load_list(&self, name: &str) -> Vec<String> {
        match self.secrets.get(name) {
            Ok(raw) => parse_user_list(&raw),
            Err(err) => {
                warn!(secret = name, "user list unavailable, denying by default: {err:#}");
                Vec::new()
            }
        }
    }

    fn store_list(&self, name: &str, users: &[String]) -> Result<()> {
        // Canonical form is one id per line; both formats parse back.
        self.secrets.set(name, &users.join("\n"))
    }
}

/// Parse a list value in either supported format.
fn parse_user_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(trimmed) {
        return items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
    }
    trimmed
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

fn validate_user_id(user_id: &str) -> Result<String> {
    let id = user_id.trim();
    if id.is_empty() || id.parse::<i64>().is_err() {
        bail!("User id must be a numeric chat id, got '{}'", user_id);
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretSource;
    use std::collections::HashMap;

    fn registry_with(raw: &str) -> AuthRegistry {
        let mut sources = HashMap::new();
        sources.insert(secrets::AUTHORIZED_USERS.to_string(), SecretSource::inline(raw));
        sources.insert(secrets::ADMIN_USERS.to_string(), SecretSource::inline("999"));
        AuthRegistry::new(Arc::new(SecretStore::with_sources(sources)))
    }

    #[test]
    fn parses_json_array_format() {
        assert_eq!(parse_user_list(r#"["123", 456]"#), vec!["123", "456"]);
    }

    #[test]
    fn parses_line_separated_format() {
        assert_eq!(parse_user_list("123\n  456 \n\n789"), vec!["123", "456", "789"]);
    }

    #[test]
    fn empty_value_is_empty_list() {
        assert!(parse_user_list("").is_empty());
        assert!(parse_user_list("  \n ").is_empty());
    }

    #[test]
    fn authorization_checks_membership() {
        let registry = registry_with("123\n456");
        assert!(registry.is_authorized(123));
        assert!(!registry.is_authorized(321));
        assert!(registry.is_admin(999));
        assert!(!registry.is_admin(123));
    }

    #[test]
    fn missing_secret_denies_everyone() {
        let registry = AuthRegistry::new(Arc::new(SecretStore::with_sources(HashMap::new())));
        assert!(!registry.is_authorized(123));
        assert!(registry.authorized_users().is_empty());
    }

    #[test]
    fn add_and_remove_round_trip_on_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users");
        std::fs::write(&path, "111").unwrap();

        let mut sources = HashMap::new();
        sources.insert(secrets::AUTHORIZED_USERS.to_string(), SecretSource::file(&path));
        sources.insert(secrets::ADMIN_USERS.to_string(), SecretSource::inline(""));
        let registry = AuthRegistry::new(Arc::new(SecretStore::with_sources(sources)));

        assert!(registry.add_user("222").unwrap());
        assert!(!registry.add_user("222").unwrap(), "duplicate add is a no-op");
        assert!(registry.is_authorized(222));

        assert!(registry.remove_user("111").unwrap());
        assert!(!registry.remove_user("111").unwrap(), "removing absent id is a no-op");
        assert_eq!(registry.authorized_users(), vec!["222"]);
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        let registry = registry_with("123");
        assert!(registry.add_user("not-a-number").is_err());
        assert!(registry.remove_user("").is_err());
    }
}
