//! Task generation
//!
//! [`TaskGenerator::generate`] produces one concrete exercise for a chosen
//! kind. Letter-fluency tasks are built locally; every other kind asks the
//! oracle and parses `ITEM:` markers out of the reply. Generation failure is
//! an explicit error so the state machine can stay in `awaiting_choice`.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::{info, warn};

use crate::catalog::{Difficulty, TaskKind};
use crate::error::OracleError;
use crate::learner::{ReviewItem, WeakItem};
use crate::oracle::{ContentPart, TextOracle};
use crate::types::{TaskInstance, TestedItems};

use super::prompts;

/// Retries after the first empty oracle reply.
const EMPTY_RETRIES: usize = 2;

const ITEM_MARKER: &str = "ITEM:";

/// Everything about the user that shapes a generated task.
#[derive(Debug, Clone)]
pub struct GenContext {
    pub difficulty: Difficulty,
    pub response_language: String,
    pub target_language: String,
    /// Recently tested items for this kind, oldest first.
    pub avoid: Vec<String>,
    /// Weak items for this kind, most urgent first.
    pub weak: Vec<WeakItem>,
    /// Review-due items for this kind, lowest mastery first.
    pub review: Vec<ReviewItem>,
    /// Letters recently used by the letter-fluency kind.
    pub recent_letters: Vec<String>,
}

pub struct TaskGenerator {
    oracle: Arc<dyn TextOracle>,
}

impl TaskGenerator {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Produce one task instance for the chosen kind.
    pub async fn generate(
        &self,
        kind: TaskKind,
        ctx: &GenContext,
    ) -> Result<TaskInstance, OracleError> {
        match kind {
            TaskKind::LetterWords => Ok(letter_task(ctx)),
            TaskKind::VoiceAnalysis | TaskKind::FreeWriting => {
                Ok(self.instruction_task(kind, ctx).await)
            }
            _ => self.oracle_task(kind, ctx).await,
        }
    }

    /// Open-ended kinds: the oracle writes the instruction; any failure
    /// falls back to a fixed one, so these kinds never fail generation.
    async fn instruction_task(&self, kind: TaskKind, ctx: &GenContext) -> TaskInstance {
        let prompt = prompts::instruction_prompt(kind, ctx);
        let description = match self.call_with_retries(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %kind, error = %e, "instruction generation failed, using fallback");
                fallback_instruction(kind).to_string()
            }
        };
        TaskInstance::new(kind, description, None)
    }

    async fn oracle_task(
        &self,
        kind: TaskKind,
        ctx: &GenContext,
    ) -> Result<TaskInstance, OracleError> {
        let prompt = prompts::task_prompt(kind, ctx);
        let raw = self.call_with_retries(prompt).await?;
        Ok(parse_oracle_task(kind, &raw))
    }

    async fn call_with_retries(&self, prompt: String) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self
                .oracle
                .generate(vec![ContentPart::text(prompt.clone())])
                .await
            {
                Ok(text) => return Ok(text),
                Err(OracleError::Empty) if attempt < EMPTY_RETRIES => {
                    attempt += 1;
                    info!(attempt, "oracle returned empty text, retrying generation");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Letter-fluency tasks need no oracle: pick a letter the user has not seen
/// recently (any letter once all 26 are used up) and build the fixed drill.
fn letter_task(ctx: &GenContext) -> TaskInstance {
    let used: Vec<char> = ctx
        .recent_letters
        .iter()
        .filter_map(|s| s.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let fresh: Vec<char> = ('A'..='Z').filter(|c| !used.contains(c)).collect();
    let pool: Vec<char> = if fresh.is_empty() {
        ('A'..='Z').collect()
    } else {
        fresh
    };
    let letter = pool.choose(&mut rand::rng()).copied().unwrap_or('A');

    let description = format!(
        "This is a fluency task. List as many {} words as you can starting with the letter '{}' in one minute.",
        ctx.target_language, letter
    );
    let item = format!("words_starting_with_{letter}");
    info!(%letter, "generated letter-fluency task");
    TaskInstance::new(
        TaskKind::LetterWords,
        description,
        Some(TestedItems::One(item)),
    )
}

fn fallback_instruction(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::VoiceAnalysis => {
            "Please record a voice message about any topic you like. I will analyze your spoken language."
        }
        _ => "Please write a few sentences about your day. I will review your writing.",
    }
}

/// `ITEM:`-prefix check that tolerates any casing without slicing into a
/// multi-byte character.
fn item_suffix(line: &str) -> Option<&str> {
    let prefix = line.get(..ITEM_MARKER.len())?;
    if prefix.eq_ignore_ascii_case(ITEM_MARKER) {
        Some(line[ITEM_MARKER.len()..].trim())
    } else {
        None
    }
}

/// Split raw oracle text into tested items and a user-facing description.
fn parse_oracle_task(kind: TaskKind, raw: &str) -> TaskInstance {
    let raw = raw.trim();
    let mut items: Vec<String> = Vec::new();
    let mut rest: Vec<&str> = Vec::new();
    for line in raw.lines() {
        match item_suffix(line) {
            Some(item) if !item.is_empty() => items.push(item.to_string()),
            Some(_) => {}
            None => rest.push(line),
        }
    }

    if kind == TaskKind::VocabularyMatching {
        if items.is_empty() {
            warn!("vocabulary matching reply had no ITEM markers, using raw text");
            return TaskInstance::new(
                kind,
                nonempty_description(raw, ""),
                Some(TestedItems::Many(Vec::new())),
            );
        }
        let mut description =
            String::from("Match the following words with their definitions:\n\n**Words to match:**\n");
        for (i, word) in items.iter().enumerate() {
            description.push_str(&format!("{}. {}\n", i + 1, word));
        }
        description.push_str("\n**Definitions:**\n");
        description.push_str(rest.join("\n").trim());
        return TaskInstance::new(kind, description, Some(TestedItems::Many(items)));
    }

    let description = nonempty_description(rest.join("\n").trim(), raw);
    let tested = items.into_iter().next().map(TestedItems::One);
    TaskInstance::new(kind, description, tested)
}

/// The description shown to the user must never be empty: fall back from the
/// parsed text to the raw reply, and from that to a fixed error line.
fn nonempty_description(parsed: &str, raw: &str) -> String {
    if !parsed.is_empty() {
        parsed.to_string()
    } else if !raw.is_empty() {
        warn!("parsed description was empty, falling back to raw oracle text");
        raw.to_string()
    } else {
        "Error: Could not generate a valid task description.".to_string()
    }
}
