//! Per-user interaction state documents
//!
//! One JSON document per user holding the session: which state the
//! conversation is in, the task in flight, preferences, and the
//! recently-tested item lists used to avoid repetition. Updates are
//! partial merges (fields absent from a patch are preserved) and every
//! write stamps a server-assigned timestamp.
//!
//! The store fails open: a read error yields the default (idle) state and
//! a write error reports `false` to the caller instead of propagating.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, warn};

use super::Database;
use crate::catalog::{Difficulty, TaskKind};
use crate::error::StoreError;
use crate::types::TaskInstance;

/// Masterable-kind recent lists keep this many entries.
pub const RECENT_CAP: usize = 15;

/// Where the conversation with one user currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    #[default]
    Idle,
    AwaitingChoice,
    AwaitingAnswer,
    AwaitingDifficultyChoice,
    AwaitingLanguageChoice,
    BlockedDueToError,
}

impl InteractionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionState::Idle => "idle",
            InteractionState::AwaitingChoice => "awaiting_choice",
            InteractionState::AwaitingAnswer => "awaiting_answer",
            InteractionState::AwaitingDifficultyChoice => "awaiting_difficulty_choice",
            InteractionState::AwaitingLanguageChoice => "awaiting_language_choice",
            InteractionState::BlockedDueToError => "blocked_due_to_error",
        }
    }
}

impl fmt::Display for InteractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub interaction_state: InteractionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_task_type: Option<TaskKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_details: Option<TaskInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub difficulty_level: Difficulty,
    #[serde(default = "default_response_language")]
    pub response_language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_grammar_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_vocabulary_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_phrasal_verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_letters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

fn default_response_language() -> String {
    "English".to_string()
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            interaction_state: InteractionState::Idle,
            chosen_task_type: None,
            current_task_details: None,
            task_id: None,
            difficulty_level: Difficulty::default(),
            response_language: default_response_language(),
            recent_grammar_topics: Vec::new(),
            recent_vocabulary_words: Vec::new(),
            recent_phrasal_verbs: Vec::new(),
            recent_letters: Vec::new(),
            last_update: None,
        }
    }
}

impl UserState {
    /// Recently-tested items for a kind (empty for kinds with no list).
    pub fn recent_for_kind(&self, kind: TaskKind) -> &[String] {
        match kind {
            TaskKind::ErrorCorrection => &self.recent_grammar_topics,
            TaskKind::VocabularyMatching => &self.recent_vocabulary_words,
            TaskKind::PhrasalVerb => &self.recent_phrasal_verbs,
            TaskKind::LetterWords => &self.recent_letters,
            TaskKind::VoiceAnalysis | TaskKind::FreeWriting => &[],
        }
    }
}

/// Cap applied to a kind's recent list, if any.
pub fn recent_cap(kind: TaskKind) -> Option<usize> {
    match kind {
        TaskKind::ErrorCorrection | TaskKind::VocabularyMatching | TaskKind::PhrasalVerb => {
            Some(RECENT_CAP)
        }
        // Letters exhaust naturally at 26; open-ended kinds keep no list.
        TaskKind::LetterWords | TaskKind::VoiceAnalysis | TaskKind::FreeWriting => None,
    }
}

/// Fold newly-tested names into a recent list: duplicates move to the end,
/// oldest entries fall off once the cap is hit.
pub fn merge_recent(existing: &[String], new_names: &[&str], cap: Option<usize>) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for name in new_names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        merged.retain(|n| !n.eq_ignore_ascii_case(name));
        merged.push(name.to_string());
    }
    if let Some(cap) = cap {
        if merged.len() > cap {
            merged.drain(..merged.len() - cap);
        }
    }
    merged
}

/// Partial update of a [`UserState`].
///
/// `None` leaves a field untouched; nullable fields use a double option so
/// a patch can also clear them (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub interaction_state: Option<InteractionState>,
    pub chosen_task_type: Option<Option<TaskKind>>,
    pub current_task_details: Option<Option<TaskInstance>>,
    pub task_id: Option<Option<String>>,
    pub difficulty_level: Option<Difficulty>,
    pub response_language: Option<String>,
    pub recent_grammar_topics: Option<Vec<String>>,
    pub recent_vocabulary_words: Option<Vec<String>>,
    pub recent_phrasal_verbs: Option<Vec<String>>,
    pub recent_letters: Option<Vec<String>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: InteractionState) -> Self {
        self.interaction_state = Some(state);
        self
    }

    /// Store a freshly generated task and its id.
    pub fn begin_task(mut self, kind: TaskKind, task: TaskInstance, task_id: String) -> Self {
        self.chosen_task_type = Some(Some(kind));
        self.current_task_details = Some(Some(task));
        self.task_id = Some(Some(task_id));
        self
    }

    /// Clear any task in flight.
    pub fn clear_task(mut self) -> Self {
        self.chosen_task_type = Some(None);
        self.current_task_details = Some(None);
        self.task_id = Some(None);
        self
    }

    pub fn difficulty(mut self, level: Difficulty) -> Self {
        self.difficulty_level = Some(level);
        self
    }

    pub fn language(mut self, language: String) -> Self {
        self.response_language = Some(language);
        self
    }

    /// Replace the recent list for a kind (ignored for kinds without one).
    pub fn recent(mut self, kind: TaskKind, list: Vec<String>) -> Self {
        match kind {
            TaskKind::ErrorCorrection => self.recent_grammar_topics = Some(list),
            TaskKind::VocabularyMatching => self.recent_vocabulary_words = Some(list),
            TaskKind::PhrasalVerb => self.recent_phrasal_verbs = Some(list),
            TaskKind::LetterWords => self.recent_letters = Some(list),
            TaskKind::VoiceAnalysis | TaskKind::FreeWriting => {}
        }
        self
    }

    fn apply(self, state: &mut UserState) {
        if let Some(s) = self.interaction_state {
            state.interaction_state = s;
        }
        if let Some(chosen) = self.chosen_task_type {
            state.chosen_task_type = chosen;
        }
        if let Some(task) = self.current_task_details {
            state.current_task_details = task;
        }
        if let Some(id) = self.task_id {
            state.task_id = id;
        }
        if let Some(level) = self.difficulty_level {
            state.difficulty_level = level;
        }
        if let Some(language) = self.response_language {
            state.response_language = language;
        }
        if let Some(list) = self.recent_grammar_topics {
            state.recent_grammar_topics = list;
        }
        if let Some(list) = self.recent_vocabulary_words {
            state.recent_vocabulary_words = list;
        }
        if let Some(list) = self.recent_phrasal_verbs {
            state.recent_phrasal_verbs = list;
        }
        if let Some(list) = self.recent_letters {
            state.recent_letters = list;
        }
    }
}

/// Durable store for [`UserState`] documents.
#[derive(Clone)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load a user's state; absent documents and read failures both yield
    /// the default state.
    pub async fn get(&self, user_id: i64) -> UserState {
        match self.try_get(user_id).await {
            Ok(state) => state,
            Err(err) => {
                error!(user_id, "state read failed, falling back to default: {err}");
                UserState::default()
            }
        }
    }

    /// Merge a patch into a user's state. Returns true on success.
    pub async fn update(&self, user_id: i64, patch: StatePatch) -> bool {
        match self.try_update(user_id, patch).await {
            Ok(()) => true,
            Err(err) => {
                error!(user_id, "state write failed: {err}");
                false
            }
        }
    }

    /// All user ids with a state document, with their states.
    pub async fn all_users(&self) -> anyhow::Result<Vec<(i64, UserState)>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare_cached("SELECT user_id, doc FROM user_state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut users = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            let Ok(user_id) = id.parse::<i64>() else {
                warn!(user_id = %id, "skipping non-numeric user id in state table");
                continue;
            };
            match serde_json::from_str::<UserState>(&doc) {
                Ok(state) => users.push((user_id, state)),
                Err(err) => warn!(user_id, "skipping corrupt state doc: {err}"),
            }
        }
        Ok(users)
    }

    async fn try_get(&self, user_id: i64) -> Result<UserState, StoreError> {
        let conn = self.db.lock().await;
        let doc: Option<String> = conn
            .prepare_cached("SELECT doc FROM user_state WHERE user_id = ?1")?
            .query_row(params![user_id.to_string()], |row| row.get(0))
            .optional()?;

        match doc {
            Some(doc) => match serde_json::from_str(&doc) {
                Ok(state) => Ok(state),
                Err(err) => {
                    warn!(user_id, "corrupt state doc, treating as absent: {err}");
                    Ok(UserState::default())
                }
            },
            None => Ok(UserState::default()),
        }
    }

    async fn try_update(&self, user_id: i64, patch: StatePatch) -> Result<(), StoreError> {
        let now = Utc::now();
        let conn = self.db.lock().await;

        let existing: Option<String> = conn
            .prepare_cached("SELECT doc FROM user_state WHERE user_id = ?1")?
            .query_row(params![user_id.to_string()], |row| row.get(0))
            .optional()?;

        let mut state = match existing {
            Some(doc) => serde_json::from_str(&doc).unwrap_or_else(|err| {
                warn!(user_id, "corrupt state doc overwritten by update: {err}");
                UserState::default()
            }),
            None => UserState::default(),
        };

        patch.apply(&mut state);
        state.last_update = Some(now);

        let doc = serde_json::to_string(&state)?;
        conn.prepare_cached(
            "INSERT OR REPLACE INTO user_state (user_id, doc, updated_at) VALUES (?1, ?2, ?3)",
        )?
        .execute(params![user_id.to_string(), doc, now.to_rfc3339()])?;
        Ok(())
    }
}
