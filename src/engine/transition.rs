//! Pure conversation-state transitions
//!
//! [`decide`] maps (current state, incoming input) to the single [`Action`]
//! the session engine should perform. It touches no storage and sends no
//! messages, so every branch of the state machine is unit-testable without
//! fakes. The engine owns the effects; this module owns the rules.

use crate::catalog::{Difficulty, TaskKind};
use crate::store::state::{InteractionState, UserState};

/// A normalized incoming message.
///
/// The engine resolves voice notes before deciding: a voice answer to an
/// audio task arrives as [`UserInput::VoiceAnswer`] (the bytes travel
/// separately), any other voice note is transcribed and arrives as
/// [`UserInput::Text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Text(String),
    VoiceAnswer,
}

/// Slash commands understood in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    NewTask,
    Progress,
    Difficulty,
    Language,
    Help,
}

impl Command {
    /// Match a message against the known commands, case-insensitively.
    pub fn parse(text: &str) -> Option<Command> {
        match text.trim().to_lowercase().as_str() {
            "/start" => Some(Command::Start),
            "/newtask" => Some(Command::NewTask),
            "/progress" => Some(Command::Progress),
            "/difficulty" => Some(Command::Difficulty),
            "/language" => Some(Command::Language),
            "/help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// What the engine should do with the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Greet and reset the session to idle.
    Greet,
    /// Clear any task in flight and show the task-type keyboard.
    OfferChoice,
    /// Send the proficiency report; state unchanged.
    SendProgress,
    /// Show the difficulty keyboard.
    AskDifficulty,
    /// Show the reply-language keyboard.
    AskLanguage,
    /// Send the command summary; state unchanged.
    SendHelp,
    /// A task type was chosen: generate and deliver a task.
    Generate(TaskKind),
    /// The reply matched no catalog entry; ask again.
    RepromptChoice,
    /// Evaluate the stored task against the user's answer.
    Evaluate,
    /// We are awaiting an answer but hold no task; apologize and reset.
    ResetCorrupted,
    /// Persist the chosen difficulty and return to idle.
    SetDifficulty(Difficulty),
    RepromptDifficulty,
    /// Persist the chosen reply language and return to idle.
    SetLanguage(String),
    RepromptLanguage,
    /// Session is blocked; only /start and /newtask get through.
    NotifyBlocked,
    /// Nothing is in flight; point the user at /newtask.
    NotifyIdle,
}

/// Decide what to do with one normalized input.
///
/// `languages` is the configured set of reply languages, used to validate
/// replies while a language choice is pending.
pub fn decide(state: &UserState, input: &UserInput, languages: &[String]) -> Action {
    // Commands cut across every state. A blocked session only honors the
    // two escape hatches; everything else bounces.
    if let UserInput::Text(text) = input {
        if let Some(command) = Command::parse(text) {
            if state.interaction_state == InteractionState::BlockedDueToError {
                return match command {
                    Command::Start => Action::Greet,
                    Command::NewTask => Action::OfferChoice,
                    _ => Action::NotifyBlocked,
                };
            }
            return match command {
                Command::Start => Action::Greet,
                Command::NewTask => Action::OfferChoice,
                Command::Progress => Action::SendProgress,
                Command::Difficulty => Action::AskDifficulty,
                Command::Language => Action::AskLanguage,
                Command::Help => Action::SendHelp,
            };
        }
    }

    match state.interaction_state {
        InteractionState::Idle => Action::NotifyIdle,
        InteractionState::AwaitingChoice => match input {
            UserInput::Text(text) => match TaskKind::match_input(text) {
                Some(kind) => Action::Generate(kind),
                None => Action::RepromptChoice,
            },
            UserInput::VoiceAnswer => Action::RepromptChoice,
        },
        InteractionState::AwaitingAnswer => {
            if state.current_task_details.is_some() {
                Action::Evaluate
            } else {
                Action::ResetCorrupted
            }
        }
        InteractionState::AwaitingDifficultyChoice => match input {
            UserInput::Text(text) => match Difficulty::parse(text) {
                Some(level) => Action::SetDifficulty(level),
                None => Action::RepromptDifficulty,
            },
            UserInput::VoiceAnswer => Action::RepromptDifficulty,
        },
        InteractionState::AwaitingLanguageChoice => match input {
            UserInput::Text(text) => match match_language(text, languages) {
                Some(language) => Action::SetLanguage(language),
                None => Action::RepromptLanguage,
            },
            UserInput::VoiceAnswer => Action::RepromptLanguage,
        },
        InteractionState::BlockedDueToError => Action::NotifyBlocked,
    }
}

/// Find the configured language the reply names, keeping canonical casing.
fn match_language(input: &str, languages: &[String]) -> Option<String> {
    let wanted = input.trim();
    languages
        .iter()
        .find(|lang| lang.eq_ignore_ascii_case(wanted))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskInstance, TestedItems};

    fn state_in(interaction_state: InteractionState) -> UserState {
        UserState {
            interaction_state,
            ..UserState::default()
        }
    }

    fn text(s: &str) -> UserInput {
        UserInput::Text(s.to_string())
    }

    fn languages() -> Vec<String> {
        vec!["English".to_string(), "German".to_string()]
    }

    #[test]
    fn commands_work_from_any_ordinary_state() {
        for st in [
            InteractionState::Idle,
            InteractionState::AwaitingChoice,
            InteractionState::AwaitingAnswer,
            InteractionState::AwaitingDifficultyChoice,
            InteractionState::AwaitingLanguageChoice,
        ] {
            let state = state_in(st);
            assert_eq!(decide(&state, &text("/start"), &languages()), Action::Greet);
            assert_eq!(decide(&state, &text("/newtask"), &languages()), Action::OfferChoice);
            assert_eq!(decide(&state, &text("/progress"), &languages()), Action::SendProgress);
            assert_eq!(decide(&state, &text("/help"), &languages()), Action::SendHelp);
        }
    }

    #[test]
    fn commands_are_case_insensitive() {
        let state = state_in(InteractionState::Idle);
        assert_eq!(decide(&state, &text("/NewTask"), &languages()), Action::OfferChoice);
        assert_eq!(decide(&state, &text("  /START  "), &languages()), Action::Greet);
    }

    #[test]
    fn blocked_state_only_honors_escape_commands() {
        let state = state_in(InteractionState::BlockedDueToError);
        assert_eq!(decide(&state, &text("/start"), &languages()), Action::Greet);
        assert_eq!(decide(&state, &text("/newtask"), &languages()), Action::OfferChoice);
        assert_eq!(decide(&state, &text("/progress"), &languages()), Action::NotifyBlocked);
        assert_eq!(decide(&state, &text("hello"), &languages()), Action::NotifyBlocked);
    }

    #[test]
    fn idle_text_gets_the_waiting_notice() {
        let state = state_in(InteractionState::Idle);
        assert_eq!(decide(&state, &text("hello there"), &languages()), Action::NotifyIdle);
    }

    #[test]
    fn choice_matches_label_and_index() {
        let state = state_in(InteractionState::AwaitingChoice);
        assert_eq!(
            decide(&state, &text("Error correction"), &languages()),
            Action::Generate(TaskKind::ErrorCorrection)
        );
        assert_eq!(
            decide(&state, &text("2"), &languages()),
            Action::Generate(TaskKind::VocabularyMatching)
        );
    }

    #[test]
    fn unmatched_choice_reprompts() {
        let state = state_in(InteractionState::AwaitingChoice);
        assert_eq!(decide(&state, &text("juggling"), &languages()), Action::RepromptChoice);
        assert_eq!(decide(&state, &UserInput::VoiceAnswer, &languages()), Action::RepromptChoice);
    }

    #[test]
    fn answer_with_stored_task_evaluates() {
        let mut state = state_in(InteractionState::AwaitingAnswer);
        state.current_task_details = Some(TaskInstance::new(
            TaskKind::ErrorCorrection,
            "Fix it.".to_string(),
            Some(TestedItems::One("Articles".to_string())),
        ));
        assert_eq!(decide(&state, &text("my answer"), &languages()), Action::Evaluate);
        assert_eq!(decide(&state, &UserInput::VoiceAnswer, &languages()), Action::Evaluate);
    }

    #[test]
    fn answer_without_stored_task_resets() {
        let state = state_in(InteractionState::AwaitingAnswer);
        assert_eq!(decide(&state, &text("my answer"), &languages()), Action::ResetCorrupted);
    }

    #[test]
    fn difficulty_reply_sets_or_reprompts() {
        let state = state_in(InteractionState::AwaitingDifficultyChoice);
        assert_eq!(
            decide(&state, &text("Beginner"), &languages()),
            Action::SetDifficulty(Difficulty::Beginner)
        );
        assert_eq!(
            decide(&state, &text(" intermediate "), &languages()),
            Action::SetDifficulty(Difficulty::Intermediate)
        );
        assert_eq!(decide(&state, &text("expert"), &languages()), Action::RepromptDifficulty);
    }

    #[test]
    fn language_reply_keeps_canonical_casing() {
        let state = state_in(InteractionState::AwaitingLanguageChoice);
        assert_eq!(
            decide(&state, &text("german"), &languages()),
            Action::SetLanguage("German".to_string())
        );
        assert_eq!(decide(&state, &text("Klingon"), &languages()), Action::RepromptLanguage);
    }
}
