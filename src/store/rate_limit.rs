//! Per-user rate limiting
//!
//! A sliding window of request timestamps kept in one document per user.
//! The check fails open: when the database is unreachable it allows the
//! request rather than locking every user out.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Database;
use crate::config::LimitsConfig;
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct RateDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    requests: Vec<DateTime<Utc>>,
}

/// Sliding-window request limiter.
#[derive(Clone)]
pub struct RateLimiter {
    db: Database,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(db: Database, limits: &LimitsConfig) -> Self {
        Self {
            db,
            max_requests: limits.max_requests,
            window: Duration::minutes(limits.window_minutes),
        }
    }

    /// Returns true when the user may proceed, recording the request.
    pub async fn check(&self, user_id: i64) -> bool {
        match self.try_check(user_id, Utc::now()).await {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(user_id, "rate-limit check failed, allowing request: {err}");
                true
            }
        }
    }

    async fn try_check(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.db.lock().await;

        let existing: Option<String> = conn
            .prepare_cached("SELECT doc FROM rate_limits WHERE user_id = ?1")?
            .query_row(params![user_id.to_string()], |row| row.get(0))
            .optional()?;

        let mut doc: RateDoc = match existing {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => RateDoc::default(),
        };

        doc.requests.retain(|t| now.signed_duration_since(*t) < self.window);
        if doc.requests.len() >= self.max_requests {
            return Ok(false);
        }

        doc.requests.push(now);
        if doc.window_start.is_none() {
            doc.window_start = Some(now);
        }

        let raw = serde_json::to_string(&doc)?;
        conn.prepare_cached(
            "INSERT OR REPLACE INTO rate_limits (user_id, doc, updated_at) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![user_id.to_string(), raw, now.to_rfc3339()])?;
        Ok(true)
    }

    #[cfg(test)]
    async fn seed(&self, user_id: i64, doc: &RateDoc) {
        let conn = self.db.lock().await;
        let raw = serde_json::to_string(doc).unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO rate_limits (user_id, doc, updated_at) VALUES (?1, ?2, ?3)",
            params![user_id.to_string(), raw, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_requests: 10,
            window_minutes: 5,
        }
    }

    async fn temp_limiter() -> (tempfile::TempDir, RateLimiter) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).await.unwrap();
        (dir, RateLimiter::new(db, &limits()))
    }

    #[tokio::test]
    async fn new_user_is_allowed_and_tracked() {
        let (_dir, limiter) = temp_limiter().await;
        assert!(limiter.check(1).await);

        let conn = limiter.db.lock().await;
        let doc: String = conn
            .query_row(
                "SELECT doc FROM rate_limits WHERE user_id = '1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let parsed: RateDoc = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed.requests.len(), 1);
        assert!(parsed.window_start.is_some());
    }

    #[tokio::test]
    async fn eleventh_request_in_window_is_denied() {
        let (_dir, limiter) = temp_limiter().await;
        for i in 0..10 {
            assert!(limiter.check(2).await, "request {} should pass", i + 1);
        }
        assert!(!limiter.check(2).await, "request 11 should be denied");
    }

    #[tokio::test]
    async fn old_requests_fall_out_of_the_window() {
        let (_dir, limiter) = temp_limiter().await;
        let stale = Utc::now() - Duration::minutes(6);
        limiter
            .seed(
                3,
                &RateDoc {
                    window_start: Some(stale),
                    requests: vec![stale; 10],
                },
            )
            .await;
        assert!(limiter.check(3).await, "expired entries must not count");
    }

    #[tokio::test]
    async fn users_are_limited_independently() {
        let (_dir, limiter) = temp_limiter().await;
        for _ in 0..10 {
            limiter.check(4).await;
        }
        assert!(!limiter.check(4).await);
        assert!(limiter.check(5).await, "another user is unaffected");
    }
}
