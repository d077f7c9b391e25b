//! Prompt assembly for the generation and evaluation oracles.
//!
//! All oracle-facing wording lives here so the generator and evaluator stay
//! free of string soup. The `ITEM:` / `CORRECTNESS:` markers these prompts
//! request are what the parsers in the sibling modules look for.

use crate::catalog::{Difficulty, TaskKind};
use crate::types::TaskInstance;

use super::generator::GenContext;

/// How many weak items the prompt focuses on.
const WEAK_FOCUS: usize = 3;
/// How many review-due items get mentioned when there are no weak items.
const REVIEW_FOCUS: usize = 2;

fn article(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Beginner => "a beginner",
        Difficulty::Intermediate => "an intermediate",
        Difficulty::Advanced => "an advanced",
    }
}

/// Opening section shared by every oracle-generated kind: task framing plus
/// the adaptive focus derived from the user's proficiency.
fn adaptive_base(kind: TaskKind, ctx: &GenContext) -> String {
    let mut base = format!(
        "Generate a {} learning task for {} learner. Task Type: '{}'. ",
        ctx.target_language,
        article(ctx.difficulty),
        kind.label()
    );

    if !ctx.weak.is_empty() {
        let areas: Vec<&str> = ctx
            .weak
            .iter()
            .take(WEAK_FOCUS)
            .map(|item| item.name.as_str())
            .collect();
        base.push_str(&format!(
            "\n\nIMPORTANT: The user has been struggling with these specific areas: {}. \
             Please focus the task on one or more of these weak areas to help them improve. \
             Make the task slightly easier than usual since these are challenging areas for the user.",
            areas.join(", ")
        ));
    } else {
        base.push_str(
            "\n\nThe user has been performing well in this area. \
             Please provide a task that challenges them appropriately.",
        );
        if !ctx.review.is_empty() {
            let areas: Vec<&str> = ctx
                .review
                .iter()
                .take(REVIEW_FOCUS)
                .map(|item| item.name.as_str())
                .collect();
            base.push_str(&format!(
                "\n\nConsider including review of these areas: {}.",
                areas.join(", ")
            ));
        }
    }

    base
}

fn push_directives(prompt: &mut String, ctx: &GenContext) {
    if !ctx.avoid.is_empty() {
        prompt.push_str(&format!(
            "\n\nDo not reuse any of these recently practiced items: {}.",
            ctx.avoid.join(", ")
        ));
    }
    prompt.push_str(&format!("\n\nRespond in {}.", ctx.response_language));
}

/// Full generation prompt for the kinds whose exercises come from the oracle
/// with `ITEM:` markers.
pub(super) fn task_prompt(kind: TaskKind, ctx: &GenContext) -> String {
    let mut prompt = adaptive_base(kind, ctx);
    let lang = &ctx.target_language;
    match kind {
        TaskKind::ErrorCorrection => prompt.push_str(&format!(
            "\n\nFocus on a common {lang} grammatical error (e.g., subject-verb agreement, \
             tense misuse, articles, prepositions). \
             On a NEW line, identify the specific grammar concept being tested, \
             like 'ITEM: [grammar concept name]'. \
             Then, on a NEW line, provide a single sentence containing this error \
             for the user to correct. \
             Example for ITEM: Past Simple Irregular Verb\nSentence: He goed to the park."
        )),
        TaskKind::VocabularyMatching => prompt.push_str(&format!(
            "\n\nProvide 3 related {lang} vocabulary words suitable for the learner. \
             For each word, on a NEW line, identify it like 'ITEM: [word]'. \
             After listing all ITEMs, provide their definitions. \
             The definitions should be presented in a jumbled or randomized order. \
             Do not number the definitions."
        )),
        TaskKind::PhrasalVerb => prompt.push_str(&format!(
            "\n\nChoose one common {lang} idiom or phrasal verb. \
             On a NEW line, identify it clearly, like 'ITEM: [idiom/phrasal verb phrase]'. \
             Then, on subsequent lines, explain its meaning and provide one clear \
             example sentence. \
             Finally, ask the user to write their own sentence using it."
        )),
        // The remaining kinds are built locally or via instruction_prompt.
        TaskKind::LetterWords | TaskKind::VoiceAnalysis | TaskKind::FreeWriting => {}
    }
    push_directives(&mut prompt, ctx);
    prompt
}

/// Generation prompt for the open-ended kinds, where the oracle writes the
/// instruction shown to the user and nothing else.
pub(super) fn instruction_prompt(kind: TaskKind, ctx: &GenContext) -> String {
    let mut prompt = adaptive_base(kind, ctx);
    match kind {
        TaskKind::VoiceAnalysis => prompt.push_str(
            "\n\nAsk the user to record a voice message of any length. \
             The instruction should be to talk about any topic. \
             Output only the instruction for the user.",
        ),
        TaskKind::FreeWriting => prompt.push_str(
            "\n\nSuggest an engaging topic for a short piece of free writing \
             (three to five sentences) and one or two guiding questions. \
             Output only the instruction for the user.",
        ),
        _ => {}
    }
    push_directives(&mut prompt, ctx);
    prompt
}

/// Inputs for the evaluation prompt.
pub(super) struct EvalPrompt<'a> {
    pub task: &'a TaskInstance,
    /// `None` when the answer is a voice recording sent alongside the prompt.
    pub answer_text: Option<&'a str>,
    /// Mastery-dependent coaching note, when the user has history on the item.
    pub coaching: Option<String>,
    pub response_language: &'a str,
    pub target_language: &'a str,
}

/// Feedback prompt sent to the oracle together with the user's answer.
pub(super) fn evaluation_prompt(p: &EvalPrompt<'_>) -> String {
    let mut parts = vec![
        format!(
            "Act as a friendly and supportive {} tutor providing feedback.",
            p.target_language
        ),
        format!(
            "The user was given the following task (type: {}):",
            p.task.kind.label()
        ),
        format!(
            "--- TASK INSTRUCTION START ---\n{}\n--- TASK INSTRUCTION END ---",
            p.task.description
        ),
    ];

    if let Some(coaching) = &p.coaching {
        parts.push(coaching.clone());
    }

    match p.answer_text {
        Some(answer) => {
            parts.push(format!(
                "The user responded with text:\n--- USER RESPONSE START ---\n{}\n--- USER RESPONSE END ---",
                answer
            ));
            parts.push(
                "Please evaluate the user's text response based ONLY on the given task. \
                 Be concise and clear. If correct, acknowledge it positively. \
                 If incorrect, gently point out the error and provide the correction or a hint."
                    .to_string(),
            );
        }
        None => {
            parts.push(format!(
                "The user responded with the attached voice recording. \
                 Please analyze their spoken {} focusing on aspects like: \
                 1. Pronunciation (clarity, specific sounds). \
                 2. Grammar (correct usage of tenses, articles, etc.). \
                 3. Vocabulary (appropriate word choice, idioms, etc.). \
                 4. Fluency (natural flow, pauses, etc.). \
                 Provide specific, actionable feedback and positive encouragement.",
                p.target_language
            ));
        }
    }

    if p.task.kind.scored() {
        parts.push(
            "\nAfter providing feedback, on a new separate line, explicitly state if the \
             user's answer was substantially correct for the main goal of the task by \
             writing 'CORRECTNESS: YES' or 'CORRECTNESS: NO'."
                .to_string(),
        );
    }

    parts.push(format!("Respond in {}.", p.response_language));
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestedItems;

    fn ctx() -> GenContext {
        GenContext {
            difficulty: Difficulty::Advanced,
            response_language: "English".to_string(),
            target_language: "English".to_string(),
            avoid: vec![],
            weak: vec![],
            review: vec![],
            recent_letters: vec![],
        }
    }

    #[test]
    fn weak_items_take_precedence_over_review() {
        let mut c = ctx();
        c.weak = vec![crate::learner::WeakItem {
            name: "Articles".to_string(),
            mastery: 0.2,
            attempts: 4,
            priority: 2.0,
        }];
        c.review = vec![crate::learner::ReviewItem {
            name: "Tenses".to_string(),
            mastery: 0.9,
            last_attempt: None,
        }];
        let prompt = task_prompt(TaskKind::ErrorCorrection, &c);
        assert!(prompt.contains("struggling with these specific areas: Articles"));
        assert!(!prompt.contains("Consider including review"));
    }

    #[test]
    fn review_items_appear_only_without_weaknesses() {
        let mut c = ctx();
        c.review = vec![
            crate::learner::ReviewItem {
                name: "Tenses".to_string(),
                mastery: 0.9,
                last_attempt: None,
            },
            crate::learner::ReviewItem {
                name: "Articles".to_string(),
                mastery: 0.95,
                last_attempt: None,
            },
            crate::learner::ReviewItem {
                name: "Prepositions".to_string(),
                mastery: 1.0,
                last_attempt: None,
            },
        ];
        let prompt = task_prompt(TaskKind::ErrorCorrection, &c);
        assert!(prompt.contains("performing well"));
        // Only the top two review items are mentioned.
        assert!(prompt.contains("review of these areas: Tenses, Articles."));
        assert!(!prompt.contains("Prepositions"));
    }

    #[test]
    fn directives_carry_avoid_list_difficulty_and_language() {
        let mut c = ctx();
        c.difficulty = Difficulty::Beginner;
        c.response_language = "Spanish".to_string();
        c.avoid = vec!["run out".to_string(), "give up".to_string()];
        let prompt = task_prompt(TaskKind::PhrasalVerb, &c);
        assert!(prompt.contains("for a beginner learner"));
        assert!(prompt.contains("recently practiced items: run out, give up."));
        assert!(prompt.contains("Respond in Spanish."));
    }

    #[test]
    fn evaluation_prompt_embeds_task_and_answer() {
        let task = TaskInstance::new(
            TaskKind::ErrorCorrection,
            "Correct: He goed home.".to_string(),
            Some(TestedItems::One("Past Simple Irregular Verb".to_string())),
        );
        let prompt = evaluation_prompt(&EvalPrompt {
            task: &task,
            answer_text: Some("He went home."),
            coaching: None,
            response_language: "English",
            target_language: "English",
        });
        assert!(prompt.contains("Correct: He goed home."));
        assert!(prompt.contains("He went home."));
        assert!(prompt.contains("CORRECTNESS: YES"));
    }

    #[test]
    fn unscored_kinds_get_no_correctness_directive() {
        let task = TaskInstance::new(
            TaskKind::VoiceAnalysis,
            "Record yourself talking about your day.".to_string(),
            None,
        );
        let prompt = evaluation_prompt(&EvalPrompt {
            task: &task,
            answer_text: None,
            coaching: None,
            response_language: "English",
            target_language: "English",
        });
        assert!(prompt.contains("voice recording"));
        assert!(!prompt.contains("CORRECTNESS"));
    }
}
