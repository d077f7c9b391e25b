//! Per-item mastery records
//!
//! One JSON document per user: category → item name → [`ItemStats`].
//! Attempt recording is a read-modify-write inside an IMMEDIATE
//! transaction so concurrent webhook deliveries for the same user can
//! never lose counter increments.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, warn};

use super::Database;
use crate::catalog::Category;
use crate::error::StoreError;

/// Each item's attempt history keeps at most this many entries.
pub const HISTORY_CAP: usize = 1000;

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub correct: bool,
}

/// Mastery statistics for one tested item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ItemStats {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub correct: u32,
    /// Always `correct / attempts`; recomputed on every increment.
    #[serde(default)]
    pub mastery_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

impl ItemStats {
    /// Apply one attempt to the stats.
    pub fn record(&mut self, correct: bool, task_id: &str, now: DateTime<Utc>) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
        }
        self.mastery_level = f64::from(self.correct) / f64::from(self.attempts);
        self.last_attempt_timestamp = Some(now);
        self.last_task_id = Some(task_id.to_string());
        self.history.push(AttemptRecord { timestamp: now, correct });
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }
}

/// All mastery data for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProficiencyRecord {
    #[serde(flatten)]
    pub categories: HashMap<Category, HashMap<String, ItemStats>>,
}

impl ProficiencyRecord {
    pub fn is_empty(&self) -> bool {
        self.categories.values().all(|items| items.is_empty())
    }

    /// Items tracked under a category.
    pub fn items(&self, category: Category) -> impl Iterator<Item = (&String, &ItemStats)> {
        self.categories
            .get(&category)
            .into_iter()
            .flat_map(|items| items.iter())
    }

    pub fn stats(&self, category: Category, item: &str) -> Option<&ItemStats> {
        self.categories.get(&category)?.get(item)
    }

    fn stats_mut(&mut self, category: Category, item: &str) -> &mut ItemStats {
        self.categories
            .entry(category)
            .or_default()
            .entry(item.to_string())
            .or_default()
    }

    pub fn total_attempts(&self) -> u64 {
        self.categories
            .values()
            .flat_map(|items| items.values())
            .map(|stats| u64::from(stats.attempts))
            .sum()
    }

    /// Attempt-weighted mastery across every tracked item, 0.0 if no data.
    pub fn overall_mastery(&self) -> f64 {
        let mut weighted = 0.0;
        let mut attempts = 0u64;
        for stats in self.categories.values().flat_map(|items| items.values()) {
            weighted += stats.mastery_level * f64::from(stats.attempts);
            attempts += u64::from(stats.attempts);
        }
        if attempts == 0 {
            0.0
        } else {
            weighted / attempts as f64
        }
    }
}

/// Durable store for [`ProficiencyRecord`] documents.
#[derive(Clone)]
pub struct ProficiencyStore {
    db: Database,
}

impl ProficiencyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load a user's record; absent documents and read failures both yield
    /// an empty record.
    pub async fn get(&self, user_id: i64) -> ProficiencyRecord {
        match self.try_get(user_id).await {
            Ok(record) => record,
            Err(err) => {
                error!(user_id, "proficiency read failed, treating as empty: {err}");
                ProficiencyRecord::default()
            }
        }
    }

    /// Record one attempt on an item. Returns true when the attempt was
    /// stored (or deliberately skipped for a subjective result).
    ///
    /// A `None` correctness means the task was subjective: the call is
    /// accepted but nothing changes. An empty item name is rejected.
    pub async fn record_attempt(
        &self,
        user_id: i64,
        category: Category,
        item: &str,
        is_correct: Option<bool>,
        task_id: &str,
    ) -> bool {
        let item = item.trim();
        if item.is_empty() {
            warn!(user_id, %category, "attempt without an item name, skipping");
            return false;
        }
        let Some(correct) = is_correct else {
            debug!(user_id, %category, item, "subjective result, mastery unchanged");
            return true;
        };

        match self.try_record(user_id, category, item, correct, task_id).await {
            Ok(()) => true,
            Err(err) => {
                error!(user_id, %category, item, "proficiency update failed: {err}");
                false
            }
        }
    }

    /// All user ids with a proficiency document, with their records.
    pub async fn all_users(&self) -> anyhow::Result<Vec<(i64, ProficiencyRecord)>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT user_id, doc FROM proficiency")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut users = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            let Ok(user_id) = id.parse::<i64>() else {
                continue;
            };
            match serde_json::from_str::<ProficiencyRecord>(&doc) {
                Ok(record) => users.push((user_id, record)),
                Err(err) => warn!(user_id, "skipping corrupt proficiency doc: {err}"),
            }
        }
        Ok(users)
    }

    async fn try_get(&self, user_id: i64) -> Result<ProficiencyRecord, StoreError> {
        let conn = self.db.lock().await;
        let doc: Option<String> = conn
            .prepare_cached("SELECT doc FROM proficiency WHERE user_id = ?1")?
            .query_row(params![user_id.to_string()], |row| row.get(0))
            .optional()?;

        match doc {
            Some(doc) => match serde_json::from_str(&doc) {
                Ok(record) => Ok(record),
                Err(err) => {
                    warn!(user_id, "corrupt proficiency doc, treating as empty: {err}");
                    Ok(ProficiencyRecord::default())
                }
            },
            None => Ok(ProficiencyRecord::default()),
        }
    }

    async fn try_record(
        &self,
        user_id: i64,
        category: Category,
        item: &str,
        correct: bool,
        task_id: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .prepare_cached("SELECT doc FROM proficiency WHERE user_id = ?1")?
            .query_row(params![user_id.to_string()], |row| row.get(0))
            .optional()?;

        // A corrupt document is never overwritten from this path; losing an
        // attempt beats wiping a user's whole mastery history.
        let mut record: ProficiencyRecord = match existing {
            Some(doc) => serde_json::from_str(&doc)?,
            None => ProficiencyRecord::default(),
        };

        record.stats_mut(category, item).record(correct, task_id, now);

        let doc = serde_json::to_string(&record)?;
        tx.prepare_cached(
            "INSERT OR REPLACE INTO proficiency (user_id, doc, updated_at) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![user_id.to_string(), doc, now.to_rfc3339()])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, ProficiencyStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).await.unwrap();
        (dir, ProficiencyStore::new(db))
    }

    #[tokio::test]
    async fn mastery_is_the_exact_ratio() {
        let (_dir, store) = temp_store().await;
        for correct in [true, true, false] {
            assert!(
                store
                    .record_attempt(1, Category::Grammar, "Articles", Some(correct), "t1")
                    .await
            );
        }
        let record = store.get(1).await;
        let stats = record.stats(Category::Grammar, "Articles").unwrap();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.correct, 2);
        assert_eq!(stats.mastery_level, 2.0 / 3.0);
        assert_eq!(stats.last_task_id.as_deref(), Some("t1"));
        assert!(stats.last_attempt_timestamp.is_some());
    }

    #[tokio::test]
    async fn subjective_result_changes_nothing() {
        let (_dir, store) = temp_store().await;
        store
            .record_attempt(1, Category::Vocabulary, "cat", Some(true), "t1")
            .await;
        let before = store.get(1).await;

        assert!(
            store
                .record_attempt(1, Category::Vocabulary, "cat", None, "t2")
                .await
        );
        let after = store.get(1).await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn empty_item_name_is_rejected() {
        let (_dir, store) = temp_store().await;
        assert!(
            !store
                .record_attempt(1, Category::Grammar, "  ", Some(true), "t1")
                .await
        );
        assert!(store.get(1).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_attempts_never_lose_increments() {
        let (_dir, store) = temp_store().await;
        let (a, b, c, d) = tokio::join!(
            store.record_attempt(9, Category::Grammar, "Tenses", Some(true), "t1"),
            store.record_attempt(9, Category::Grammar, "Tenses", Some(false), "t2"),
            store.record_attempt(9, Category::Grammar, "Tenses", Some(true), "t3"),
            store.record_attempt(9, Category::Grammar, "Tenses", Some(false), "t4"),
        );
        assert!(a && b && c && d);
        let record = store.get(9).await;
        let stats = record.stats(Category::Grammar, "Tenses").unwrap();
        assert_eq!(stats.attempts, 4);
        assert_eq!(stats.correct, 2);
    }

    #[test]
    fn history_ring_drops_oldest_entries() {
        let mut stats = ItemStats::default();
        let now = Utc::now();
        stats.record(true, "first", now);
        for i in 0..HISTORY_CAP {
            stats.record(false, &format!("t{i}"), now);
        }
        assert_eq!(stats.history.len(), HISTORY_CAP);
        // The single correct attempt was the oldest entry and fell off.
        assert!(stats.history.iter().all(|a| !a.correct));
        assert_eq!(stats.attempts, (HISTORY_CAP + 1) as u32);
        assert_eq!(stats.correct, 1);
    }

    #[test]
    fn record_doc_shape_uses_category_keys() {
        let mut record = ProficiencyRecord::default();
        record.stats_mut(Category::Grammar, "Articles").record(true, "t", Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("grammar_topics").is_some());
        assert_eq!(json["grammar_topics"]["Articles"]["attempts"], 1);
    }

    #[test]
    fn overall_mastery_is_attempt_weighted() {
        let mut record = ProficiencyRecord::default();
        let now = Utc::now();
        // 1 attempt at 100% and 3 attempts at 0% -> 0.25 overall.
        record.stats_mut(Category::Grammar, "a").record(true, "t", now);
        for _ in 0..3 {
            record.stats_mut(Category::Vocabulary, "b").record(false, "t", now);
        }
        assert!((record.overall_mastery() - 0.25).abs() < 1e-9);
        assert_eq!(record.total_attempts(), 4);
    }
}
