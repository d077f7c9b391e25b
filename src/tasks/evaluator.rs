//! Answer evaluation
//!
//! Scores a user's reply against the stored task instance. The oracle writes
//! the feedback; for scored kinds it also emits a trailing `CORRECTNESS:
//! YES|NO` line that is stripped here and turned into the verdict. Oracle
//! failures downgrade to fixed apologetic feedback, never an error.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::OracleError;
use crate::oracle::{ContentPart, TextOracle};
use crate::store::proficiency::ProficiencyRecord;
use crate::types::TaskInstance;

use super::prompts::{self, EvalPrompt};

const CORRECTNESS_MARKER: &str = "CORRECTNESS:";

/// The user's reply, as the engine normalized it.
#[derive(Debug, Clone)]
pub enum AnswerPayload {
    Text(String),
    Audio { bytes: Vec<u8>, format: String },
}

/// Outcome of one evaluation.
///
/// `correct` is `None` for kinds with no objective verdict; updating
/// proficiency with `None` records nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub feedback: String,
    pub correct: Option<bool>,
}

pub struct AnswerEvaluator {
    oracle: Arc<dyn TextOracle>,
}

impl AnswerEvaluator {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Evaluate one answer. Never fails: every failure mode maps to a
    /// user-facing message with the kind's default verdict.
    pub async fn evaluate(
        &self,
        task: &TaskInstance,
        payload: AnswerPayload,
        record: &ProficiencyRecord,
        response_language: &str,
        target_language: &str,
    ) -> Evaluation {
        let scored = task.kind.scored();
        let failed = |feedback: &str| Evaluation {
            feedback: feedback.to_string(),
            correct: if scored { Some(false) } else { None },
        };

        // Kind/payload mismatches are settled locally, no oracle call.
        let (answer_text, audio) = match payload {
            AnswerPayload::Text(text) => {
                if task.kind.requires_audio() {
                    return failed(
                        "It seems you were supposed to send a voice message for this task, \
                         but I didn't receive any audio.",
                    );
                }
                if text.trim().is_empty() {
                    return failed("I didn't receive your answer for this task. Please try again.");
                }
                (Some(text), None)
            }
            AnswerPayload::Audio { bytes, format } => {
                if !task.kind.requires_audio() {
                    return failed(
                        "I didn't receive your text answer for this task. Please try again.",
                    );
                }
                (None, Some((bytes, format)))
            }
        };

        let prompt = prompts::evaluation_prompt(&EvalPrompt {
            task,
            answer_text: answer_text.as_deref(),
            coaching: coaching_hint(record, task),
            response_language,
            target_language,
        });

        let mut parts = vec![ContentPart::text(prompt)];
        if let Some((bytes, format)) = audio {
            parts.push(ContentPart::audio(&bytes, &format));
        }

        match self.oracle.generate(parts).await {
            Ok(raw) => {
                let (feedback, correct) = parse_correctness(&raw, scored);
                info!(kind = %task.kind, ?correct, "evaluation complete");
                Evaluation { feedback, correct }
            }
            Err(OracleError::Empty) => {
                warn!(kind = %task.kind, "oracle returned no feedback text");
                failed("Sorry, I couldn't generate feedback this time. Please try again.")
            }
            Err(e) => {
                warn!(kind = %task.kind, error = %e, "evaluation failed");
                failed("Sorry, an error occurred while generating feedback. Please try again.")
            }
        }
    }
}

/// Mastery-dependent coaching note for the evaluation prompt.
///
/// Only single-item kinds with prior history qualify: struggling users get
/// extra encouragement, strong users get harder follow-ups.
fn coaching_hint(record: &ProficiencyRecord, task: &TaskInstance) -> Option<String> {
    let category = task.kind.category()?;
    let item = task.specific_item_tested.as_ref()?.single()?;
    let stats = record.stats(category, item)?;
    if stats.attempts <= 1 {
        return None;
    }
    let pct = stats.mastery_level * 100.0;
    if stats.mastery_level < 0.5 {
        Some(format!(
            "Note: The user has practiced this specific topic ({}) {} times with {:.0}% \
             success rate. They seem to find this challenging, so provide extra \
             encouragement and clear explanations.",
            item, stats.attempts, pct
        ))
    } else if stats.mastery_level > 0.8 {
        Some(format!(
            "Note: The user has practiced this specific topic ({}) {} times with {:.0}% \
             success rate. They're doing well with this, so you can provide more \
             challenging feedback or advanced tips.",
            item, stats.attempts, pct
        ))
    } else {
        None
    }
}

/// Strip `CORRECTNESS: YES|NO` lines out of the feedback and derive the
/// verdict. A scored reply without the marker counts as incorrect; unscored
/// kinds always get `None`.
fn parse_correctness(raw: &str, scored: bool) -> (String, Option<bool>) {
    let mut verdict = false;
    let mut kept: Vec<&str> = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_uppercase();
        if upper.starts_with(CORRECTNESS_MARKER) {
            verdict = upper[CORRECTNESS_MARKER.len()..].trim_start().starts_with("YES");
        } else {
            kept.push(line);
        }
    }
    let mut feedback = kept.join("\n").trim().to_string();
    if feedback.is_empty() {
        feedback = "Thanks for your answer!".to_string();
    }
    let correct = if scored { Some(verdict) } else { None };
    (feedback, correct)
}
