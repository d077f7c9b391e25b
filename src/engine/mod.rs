//! Session engine
//!
//! Executes the conversation state machine for one incoming update:
//! authorize, rate-limit, normalize voice input, let [`transition::decide`]
//! pick an [`Action`], then perform the effects (store writes, oracle
//! calls, outbound messages). Every user-visible failure is settled here
//! with an apologetic message; only a truly unexpected error escapes to
//! the caller, after the session was parked in the blocked state.

pub mod transition;

pub use transition::{decide, Action, Command, UserInput};

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::auth::AuthRegistry;
use crate::catalog::{Difficulty, TaskKind};
use crate::config::Config;
use crate::learner::{progress_report, recommend_task_kind, review_candidates, weaknesses};
use crate::oracle::{SpeechToText, TextOracle};
use crate::store::state::{merge_recent, recent_cap};
use crate::store::{
    Database, InteractionState, ProficiencyRecord, ProficiencyStore, RateLimiter, StatePatch,
    StateStore, UserState,
};
use crate::tasks::{AnswerEvaluator, AnswerPayload, GenContext, TaskGenerator};
use crate::telegram::{ChatChannel, Keyboard, Update, Voice};
use crate::types::TaskInstance;

pub const UNAUTHORIZED_NOTICE: &str = "Sorry, you are not authorized to use this bot.";
pub const RATE_LIMITED_NOTICE: &str =
    "⏳ You're sending messages too quickly. Please wait a few minutes and try again.";
pub const VOICE_UNCLEAR_NOTICE: &str =
    "Sorry, I couldn't understand the voice message. Please try typing.";
pub const VOICE_FETCH_FAILED_NOTICE: &str =
    "Sorry, I couldn't download your voice message. Please try again.";
pub const CHOICE_REPROMPT: &str =
    "Hmm, that doesn't look like one of the options. Please choose a task type from the keyboard.";
pub const MISSING_TASK_NOTICE: &str =
    "Sorry, something went wrong. I seem to have forgotten the task I gave you. Send /newtask to get a fresh one.";
pub const RESET_FAILED_NOTICE: &str =
    "Sorry, there was an issue resetting the state. Please try /newtask again.";
pub const PROMPT_SEND_FAILED_NOTICE: &str =
    "State reset, but I had trouble sending the new options. Please try /newtask again later.";
pub const TASK_SAVE_FAILED_NOTICE: &str =
    "Sorry, there was an issue saving your task. Please try /newtask again.";
pub const PREFERENCE_SAVE_FAILED_NOTICE: &str =
    "Sorry, there was an issue saving your preference. Please try again.";
pub const DIFFICULTY_REPROMPT: &str =
    "Please choose Beginner, Intermediate or Advanced from the keyboard.";
pub const LANGUAGE_REPROMPT: &str = "Please choose one of the languages on the keyboard.";
pub const BLOCKED_NOTICE: &str =
    "Sorry, the tutor is temporarily unavailable for this chat. Send /start or /newtask to reset the session.";
pub const IDLE_NOTICE: &str =
    "I'm waiting for the next practice prompt. Send /newtask to start a task, or /help to see all commands.";
pub const FATAL_NOTICE: &str =
    "Sorry, an unexpected error occurred and your session was paused. Send /start to reset.";
pub const HELP_TEXT: &str = "Here's what I can do:\n\n\
/newtask – start a new practice task\n\
/progress – show your learning progress\n\
/difficulty – set the task difficulty\n\
/language – choose the language I reply in\n\
/start – reset the session\n\
/help – show this message";

/// Voice-note bytes attached to an answer for an audio task.
struct AudioAnswer {
    bytes: Vec<u8>,
    format: String,
}

/// Result of the daily broadcast: how many prompts went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub attempted: usize,
    pub delivered: usize,
}

/// Everything one webhook invocation needs, wired once at startup.
pub struct SessionEngine {
    config: Arc<Config>,
    states: StateStore,
    proficiency: ProficiencyStore,
    limiter: RateLimiter,
    auth: AuthRegistry,
    generator: TaskGenerator,
    evaluator: AnswerEvaluator,
    channel: Arc<dyn ChatChannel>,
    transcriber: Arc<dyn SpeechToText>,
}

impl SessionEngine {
    pub fn new(
        config: Arc<Config>,
        db: Database,
        auth: AuthRegistry,
        oracle: Arc<dyn TextOracle>,
        transcriber: Arc<dyn SpeechToText>,
        channel: Arc<dyn ChatChannel>,
    ) -> Self {
        let limiter = RateLimiter::new(db.clone(), &config.limits);
        Self {
            states: StateStore::new(db.clone()),
            proficiency: ProficiencyStore::new(db),
            limiter,
            auth,
            generator: TaskGenerator::new(oracle.clone()),
            evaluator: AnswerEvaluator::new(oracle),
            channel,
            transcriber,
            config,
        }
    }

    /// Handle one webhook update end to end.
    ///
    /// Returns `Err` only for failures no transition accounts for; the
    /// session is parked in the blocked state first and the user told,
    /// best-effort, so the next /start can recover it.
    pub async fn handle_update(&self, update: Update) -> Result<()> {
        let Some(message) = update.message else {
            debug!(update_id = update.update_id, "update without a message, ignoring");
            return Ok(());
        };
        let chat_id = message.chat.id;
        match self.process(chat_id, message.text, message.voice).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(chat_id, "unhandled failure, blocking session: {err:#}");
                let parked = StatePatch::new().state(InteractionState::BlockedDueToError);
                if !self.states.update(chat_id, parked).await {
                    warn!(chat_id, "could not persist blocked state");
                }
                self.channel.send(chat_id, FATAL_NOTICE, None).await;
                Err(err)
            }
        }
    }

    async fn process(&self, chat_id: i64, text: Option<String>, voice: Option<Voice>) -> Result<()> {
        if !self.auth.is_authorized(chat_id) {
            info!(chat_id, "unauthorized chat, refusing");
            self.channel.send(chat_id, UNAUTHORIZED_NOTICE, None).await;
            return Ok(());
        }
        if !self.limiter.check(chat_id).await {
            self.channel.send(chat_id, RATE_LIMITED_NOTICE, None).await;
            return Ok(());
        }

        let state = self.states.get(chat_id).await;
        let Some((input, audio)) = self.normalize(chat_id, &state, text, voice).await else {
            return Ok(());
        };

        let action = decide(&state, &input, &self.config.practice.languages);
        debug!(chat_id, state = %state.interaction_state, ?action, "transition decided");
        self.execute(chat_id, &state, action, input, audio).await
    }

    /// Turn the raw message into a [`UserInput`], resolving voice notes.
    ///
    /// A voice note answering an audio task keeps its bytes for the
    /// evaluator; any other voice note is transcribed and re-enters the
    /// machine as text. `None` means the message was already settled
    /// (nothing usable, or a notice was sent).
    async fn normalize(
        &self,
        chat_id: i64,
        state: &UserState,
        text: Option<String>,
        voice: Option<Voice>,
    ) -> Option<(UserInput, Option<AudioAnswer>)> {
        if let Some(voice) = voice {
            let bytes = match self.channel.download_file(&voice.file_id).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(chat_id, file_id = %voice.file_id, "voice download failed: {err:#}");
                    self.channel.send(chat_id, VOICE_FETCH_FAILED_NOTICE, None).await;
                    return None;
                }
            };
            let format = audio_format(voice.mime_type.as_deref());

            let answering_audio_task = state.interaction_state == InteractionState::AwaitingAnswer
                && state
                    .current_task_details
                    .as_ref()
                    .is_some_and(|task| task.kind.requires_audio());
            if answering_audio_task {
                debug!(chat_id, bytes = bytes.len(), %format, "voice answer for audio task");
                return Some((UserInput::VoiceAnswer, Some(AudioAnswer { bytes, format })));
            }

            return match self.transcriber.transcribe(&bytes, &format).await {
                Ok(Some(transcript)) if !transcript.trim().is_empty() => {
                    info!(chat_id, chars = transcript.chars().count(), "voice note transcribed");
                    Some((UserInput::Text(transcript), None))
                }
                Ok(_) => {
                    self.channel.send(chat_id, VOICE_UNCLEAR_NOTICE, None).await;
                    None
                }
                Err(err) => {
                    warn!(chat_id, "transcription failed: {err}");
                    self.channel.send(chat_id, VOICE_UNCLEAR_NOTICE, None).await;
                    None
                }
            };
        }

        match text {
            Some(text) if !text.trim().is_empty() => Some((UserInput::Text(text), None)),
            _ => {
                debug!(chat_id, "message without text or voice, ignoring");
                None
            }
        }
    }

    async fn execute(
        &self,
        chat_id: i64,
        state: &UserState,
        action: Action,
        input: UserInput,
        audio: Option<AudioAnswer>,
    ) -> Result<()> {
        match action {
            Action::Greet => self.greet(chat_id).await,
            Action::OfferChoice => self.offer_choice(chat_id).await,
            Action::SendProgress => {
                let record = self.proficiency.get(chat_id).await;
                self.channel.send(chat_id, &progress_report(&record), None).await;
                Ok(())
            }
            Action::AskDifficulty => self.ask_difficulty(chat_id).await,
            Action::AskLanguage => self.ask_language(chat_id).await,
            Action::SendHelp => {
                self.channel.send(chat_id, HELP_TEXT, None).await;
                Ok(())
            }
            Action::Generate(kind) => self.start_task(chat_id, state, kind).await,
            Action::RepromptChoice => {
                self.channel.send(chat_id, CHOICE_REPROMPT, None).await;
                Ok(())
            }
            Action::Evaluate => self.finish_answer(chat_id, state, input, audio).await,
            Action::ResetCorrupted => self.reset_corrupted(chat_id).await,
            Action::SetDifficulty(level) => self.set_difficulty(chat_id, level).await,
            Action::RepromptDifficulty => {
                self.channel.send(chat_id, DIFFICULTY_REPROMPT, None).await;
                Ok(())
            }
            Action::SetLanguage(language) => self.set_language(chat_id, language).await,
            Action::RepromptLanguage => {
                self.channel.send(chat_id, LANGUAGE_REPROMPT, None).await;
                Ok(())
            }
            Action::NotifyBlocked => {
                self.channel.send(chat_id, BLOCKED_NOTICE, None).await;
                Ok(())
            }
            Action::NotifyIdle => {
                self.channel.send(chat_id, IDLE_NOTICE, None).await;
                Ok(())
            }
        }
    }

    async fn greet(&self, chat_id: i64) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::Idle).clear_task();
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, RESET_FAILED_NOTICE, None).await;
            return Ok(());
        }
        let greeting = format!(
            "👋 Welcome! I'm your {} practice tutor. Send /newtask to get an exercise, or /help to see everything I can do.",
            self.config.practice.target_language
        );
        self.channel.send(chat_id, &greeting, Some(Keyboard::Remove)).await;
        Ok(())
    }

    async fn offer_choice(&self, chat_id: i64) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::AwaitingChoice).clear_task();
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, RESET_FAILED_NOTICE, None).await;
            return Ok(());
        }
        if !self.send_choice_prompt(chat_id).await {
            self.channel.send(chat_id, PROMPT_SEND_FAILED_NOTICE, None).await;
        }
        Ok(())
    }

    /// Send the numbered task-type menu with its keyboard.
    ///
    /// Also used by the daily broadcast, so delivery is reported back.
    pub async fn send_choice_prompt(&self, chat_id: i64) -> bool {
        let record = self.proficiency.get(chat_id).await;
        let text = choice_prompt(&self.config.practice.target_language, &record);
        let keyboard = Keyboard::single_column(TaskKind::ALL.iter().map(|kind| kind.label()));
        self.channel.send(chat_id, &text, Some(keyboard)).await
    }

    async fn start_task(&self, chat_id: i64, state: &UserState, kind: TaskKind) -> Result<()> {
        let record = self.proficiency.get(chat_id).await;
        let ctx = GenContext {
            difficulty: state.difficulty_level,
            response_language: state.response_language.clone(),
            target_language: self.config.practice.target_language.clone(),
            avoid: state.recent_for_kind(kind).to_vec(),
            weak: weaknesses(&record, kind),
            review: review_candidates(&record, kind, Utc::now()),
            recent_letters: state.recent_letters.clone(),
        };

        let task = match self.generator.generate(kind, &ctx).await {
            Ok(task) => task,
            Err(err) => {
                warn!(chat_id, kind = kind.label(), "task generation failed: {err}");
                let apology = format!(
                    "Sorry, I couldn't generate a '{}' task right now. Please try again or send /newtask.",
                    kind.label()
                );
                self.channel.send(chat_id, &apology, Some(Keyboard::Remove)).await;
                let stay = StatePatch::new().state(InteractionState::AwaitingChoice);
                if !self.states.update(chat_id, stay).await {
                    warn!(chat_id, "could not re-assert the choice state");
                }
                return Ok(());
            }
        };

        let task_id = format!("{}_{}", kind.label(), Utc::now().timestamp());
        info!(chat_id, %task_id, "task generated");

        let mut patch = StatePatch::new()
            .state(InteractionState::AwaitingAnswer)
            .begin_task(kind, task.clone(), task_id);
        // Letters are marked used as soon as they are dealt, otherwise an
        // abandoned task would repeat the same letter next time.
        if kind == TaskKind::LetterWords {
            if let Some(letter) = letter_of(&task) {
                let merged =
                    merge_recent(&state.recent_letters, &[letter.as_str()], recent_cap(kind));
                patch = patch.recent(kind, merged);
            }
        }
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, TASK_SAVE_FAILED_NOTICE, None).await;
            return Ok(());
        }

        self.channel.send(chat_id, &task.description, Some(Keyboard::Remove)).await;
        Ok(())
    }

    async fn finish_answer(
        &self,
        chat_id: i64,
        state: &UserState,
        input: UserInput,
        audio: Option<AudioAnswer>,
    ) -> Result<()> {
        let Some(task) = state.current_task_details.clone() else {
            return self.reset_corrupted(chat_id).await;
        };

        let payload = match (input, audio) {
            (_, Some(AudioAnswer { bytes, format })) => AnswerPayload::Audio { bytes, format },
            (UserInput::Text(text), None) => AnswerPayload::Text(text),
            (UserInput::VoiceAnswer, None) => AnswerPayload::Text(String::new()),
        };

        let record = self.proficiency.get(chat_id).await;
        let evaluation = self
            .evaluator
            .evaluate(
                &task,
                payload,
                &record,
                &state.response_language,
                &self.config.practice.target_language,
            )
            .await;
        self.channel.send(chat_id, &evaluation.feedback, None).await;

        // Mastery only moves for objectively scored kinds with named items.
        let (Some(category), Some(items)) = (task.kind.category(), task.specific_item_tested.as_ref())
        else {
            return Ok(());
        };
        let Some(correct) = evaluation.correct else {
            debug!(chat_id, "subjective verdict, mastery unchanged");
            return Ok(());
        };

        let names = items.names();
        let task_id = state.task_id.as_deref().unwrap_or("unknown");
        for name in &names {
            if !self.proficiency.record_attempt(chat_id, category, name, Some(correct), task_id).await
            {
                warn!(chat_id, item = *name, "attempt was not recorded");
            }
        }

        let merged = merge_recent(state.recent_for_kind(task.kind), &names, recent_cap(task.kind));
        if !self.states.update(chat_id, StatePatch::new().recent(task.kind, merged)).await {
            warn!(chat_id, "recent-item list not updated");
        }
        Ok(())
    }

    async fn reset_corrupted(&self, chat_id: i64) -> Result<()> {
        warn!(chat_id, "awaiting an answer with no stored task, resetting");
        self.channel.send(chat_id, MISSING_TASK_NOTICE, None).await;
        let patch = StatePatch::new().state(InteractionState::Idle).clear_task();
        if !self.states.update(chat_id, patch).await {
            warn!(chat_id, "could not reset the corrupted session");
        }
        Ok(())
    }

    async fn ask_difficulty(&self, chat_id: i64) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::AwaitingDifficultyChoice);
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, RESET_FAILED_NOTICE, None).await;
            return Ok(());
        }
        let keyboard = Keyboard::single_column(Difficulty::ALL.iter().map(|level| level.title()));
        self.channel
            .send(
                chat_id,
                "What difficulty should your tasks be? Choose one from the keyboard below:",
                Some(keyboard),
            )
            .await;
        Ok(())
    }

    async fn set_difficulty(&self, chat_id: i64, level: Difficulty) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::Idle).difficulty(level);
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, PREFERENCE_SAVE_FAILED_NOTICE, None).await;
            return Ok(());
        }
        let confirmation = format!(
            "✅ Difficulty set to {}. Send /newtask to practice at the new level.",
            level.title()
        );
        self.channel.send(chat_id, &confirmation, Some(Keyboard::Remove)).await;
        Ok(())
    }

    async fn ask_language(&self, chat_id: i64) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::AwaitingLanguageChoice);
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, RESET_FAILED_NOTICE, None).await;
            return Ok(());
        }
        let keyboard = Keyboard::single_column(self.config.practice.languages.iter().cloned());
        self.channel
            .send(
                chat_id,
                "Which language should I use for explanations and feedback? Choose one from the keyboard below:",
                Some(keyboard),
            )
            .await;
        Ok(())
    }

    async fn set_language(&self, chat_id: i64, language: String) -> Result<()> {
        let patch = StatePatch::new().state(InteractionState::Idle).language(language.clone());
        if !self.states.update(chat_id, patch).await {
            self.channel.send(chat_id, PREFERENCE_SAVE_FAILED_NOTICE, None).await;
            return Ok(());
        }
        let confirmation = format!("✅ Got it, I'll reply in {language} from now on.");
        self.channel.send(chat_id, &confirmation, Some(Keyboard::Remove)).await;
        Ok(())
    }

    /// Reset every authorized user to the choice state and send the menu.
    ///
    /// Skips entries that are not numeric chat ids. Failures are counted,
    /// not propagated; the caller decides what a fully-failed run means.
    pub async fn broadcast_daily_choice(&self) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome { attempted: 0, delivered: 0 };
        for entry in self.auth.authorized_users() {
            let chat_id: i64 = match entry.trim().parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(user = %entry, "skipping non-numeric authorized user");
                    continue;
                }
            };
            outcome.attempted += 1;

            let patch = StatePatch::new().state(InteractionState::AwaitingChoice).clear_task();
            if !self.states.update(chat_id, patch).await {
                warn!(chat_id, "daily reset failed, skipping send");
                continue;
            }
            if self.send_choice_prompt(chat_id).await {
                outcome.delivered += 1;
            } else {
                warn!(chat_id, "daily choice prompt was not delivered");
            }
        }
        info!(
            delivered = outcome.delivered,
            attempted = outcome.attempted,
            "daily choice broadcast finished"
        );
        outcome
    }
}

/// The numbered task-type menu, with an adaptive suggestion once the user
/// has any history.
fn choice_prompt(target_language: &str, record: &ProficiencyRecord) -> String {
    let mut text = format!(
        "👋 Okay, let's start a new task! What type of {target_language} practice would you like?\nChoose one option from the keyboard below:\n"
    );
    for (index, kind) in TaskKind::ALL.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", index + 1, kind.label()));
    }
    if !record.is_empty() {
        let suggested = recommend_task_kind(record);
        text.push_str(&format!(
            "\n\n💡 **Adaptive Suggestion**: Based on your learning progress, I recommend trying **{}** to focus on areas where you can improve most!",
            suggested.label()
        ));
    }
    text
}

/// "audio/ogg; codecs=opus" -> "ogg"; anything unrecognizable -> "ogg".
fn audio_format(mime: Option<&str>) -> String {
    mime.and_then(|m| m.strip_prefix("audio/"))
        .and_then(|rest| rest.split(';').next())
        .map(|fmt| fmt.trim().to_string())
        .filter(|fmt| !fmt.is_empty())
        .unwrap_or_else(|| "ogg".to_string())
}

/// The letter a fluency task deals, recovered from its tested-item name.
fn letter_of(task: &TaskInstance) -> Option<String> {
    task.specific_item_tested
        .as_ref()?
        .single()?
        .strip_prefix("words_starting_with_")
        .map(|letter| letter.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestedItems;

    #[test]
    fn choice_prompt_numbers_the_catalog() {
        let record = ProficiencyRecord::default();
        let text = choice_prompt("English", &record);
        assert!(text.contains("What type of English practice"));
        assert!(text.contains("1. Error correction"));
        assert!(text.contains("6. Free writing"));
        assert!(!text.contains("Adaptive Suggestion"));
    }

    #[test]
    fn choice_prompt_suggests_once_there_is_history() {
        let mut record = ProficiencyRecord::default();
        record
            .categories
            .entry(crate::catalog::Category::Grammar)
            .or_default()
            .entry("Articles".to_string())
            .or_default()
            .record(false, "t1", Utc::now());
        let text = choice_prompt("English", &record);
        assert!(text.contains("Adaptive Suggestion"));
        assert!(text.contains("**Error correction**"));
    }

    #[test]
    fn audio_format_strips_mime_details() {
        assert_eq!(audio_format(Some("audio/ogg")), "ogg");
        assert_eq!(audio_format(Some("audio/ogg; codecs=opus")), "ogg");
        assert_eq!(audio_format(Some("audio/mpeg")), "mpeg");
        assert_eq!(audio_format(Some("video/mp4")), "ogg");
        assert_eq!(audio_format(None), "ogg");
    }

    #[test]
    fn letter_of_reads_the_dealt_letter() {
        let task = TaskInstance::new(
            TaskKind::LetterWords,
            "List words starting with 'Q'.".to_string(),
            Some(TestedItems::One("words_starting_with_Q".to_string())),
        );
        assert_eq!(letter_of(&task), Some("Q".to_string()));

        let open = TaskInstance::new(TaskKind::FreeWriting, "Write.".to_string(), None);
        assert_eq!(letter_of(&open), None);
    }
}
