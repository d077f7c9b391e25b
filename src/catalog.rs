//! Task catalog: the enumerated exercise kinds and their static properties.
//!
//! Everything kind-specific that is data rather than behavior lives in one
//! table here: the user-facing label, the proficiency category (if the kind
//! is masterable), whether the answer must be a voice note, and whether an
//! objective correctness verdict can be assessed.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One exercise kind offered to the user.
///
/// Serialized with its user-facing label so that stored state documents
/// stay readable (`"Error correction"` rather than `ErrorCorrection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "Error correction")]
    ErrorCorrection,
    #[serde(rename = "Vocabulary matching")]
    VocabularyMatching,
    #[serde(rename = "Idiom/Phrasal verb")]
    PhrasalVerb,
    #[serde(rename = "Word starting with letter")]
    LetterWords,
    #[serde(rename = "Voice Recording Analysis")]
    VoiceAnalysis,
    #[serde(rename = "Free writing")]
    FreeWriting,
}

/// Proficiency category a masterable kind maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "grammar_topics")]
    Grammar,
    #[serde(rename = "vocabulary_words")]
    Vocabulary,
    #[serde(rename = "phrasal_verbs")]
    PhrasalVerbs,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Grammar, Category::Vocabulary, Category::PhrasalVerbs];

    /// Key used inside proficiency documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Grammar => "grammar_topics",
            Category::Vocabulary => "vocabulary_words",
            Category::PhrasalVerbs => "phrasal_verbs",
        }
    }

    /// Human-readable heading for reports.
    pub fn title(&self) -> &'static str {
        match self {
            Category::Grammar => "Grammar Topics",
            Category::Vocabulary => "Vocabulary Words",
            Category::PhrasalVerbs => "Phrasal Verbs",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested difficulty for generated tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    #[default]
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] =
        [Difficulty::Beginner, Difficulty::Intermediate, Difficulty::Advanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Keyboard-facing label.
    pub fn title(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        }
    }

    /// Parse a user reply ("Beginner", " advanced ", ...).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static properties of one task kind.
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub kind: TaskKind,
    pub label: &'static str,
    pub category: Option<Category>,
    pub requires_audio: bool,
    pub scored: bool,
}

/// The catalog, in the order shown to users.
pub const CATALOG: [KindSpec; 6] = [
    KindSpec {
        kind: TaskKind::ErrorCorrection,
        label: "Error correction",
        category: Some(Category::Grammar),
        requires_audio: false,
        scored: true,
    },
    KindSpec {
        kind: TaskKind::VocabularyMatching,
        label: "Vocabulary matching",
        category: Some(Category::Vocabulary),
        requires_audio: false,
        scored: true,
    },
    KindSpec {
        kind: TaskKind::PhrasalVerb,
        label: "Idiom/Phrasal verb",
        category: Some(Category::PhrasalVerbs),
        requires_audio: false,
        scored: true,
    },
    KindSpec {
        kind: TaskKind::LetterWords,
        label: "Word starting with letter",
        category: None,
        requires_audio: false,
        scored: false,
    },
    KindSpec {
        kind: TaskKind::VoiceAnalysis,
        label: "Voice Recording Analysis",
        category: None,
        requires_audio: true,
        scored: false,
    },
    KindSpec {
        kind: TaskKind::FreeWriting,
        label: "Free writing",
        category: None,
        requires_audio: false,
        scored: false,
    },
];

static BY_LABEL: Lazy<HashMap<String, TaskKind>> = Lazy::new(|| {
    CATALOG
        .iter()
        .map(|spec| (spec.label.to_lowercase(), spec.kind))
        .collect()
});

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::ErrorCorrection,
        TaskKind::VocabularyMatching,
        TaskKind::PhrasalVerb,
        TaskKind::LetterWords,
        TaskKind::VoiceAnalysis,
        TaskKind::FreeWriting,
    ];

    fn spec(&self) -> &'static KindSpec {
        // CATALOG covers every variant, so this lookup cannot miss.
        CATALOG
            .iter()
            .find(|spec| spec.kind == *self)
            .unwrap_or(&CATALOG[0])
    }

    /// User-facing label, also the prefix of generated task ids.
    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    /// Proficiency category, if this kind is masterable.
    pub fn category(&self) -> Option<Category> {
        self.spec().category
    }

    /// Whether the answer must arrive as a voice note.
    pub fn requires_audio(&self) -> bool {
        self.spec().requires_audio
    }

    /// Whether an objective YES/NO correctness verdict applies.
    pub fn scored(&self) -> bool {
        self.spec().scored
    }

    /// Match a user reply against the catalog: exact label
    /// (case-insensitive) or a 1-based index into the list.
    pub fn match_input(input: &str) -> Option<TaskKind> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(n) = trimmed.parse::<usize>() {
            return CATALOG.get(n.checked_sub(1)?).map(|spec| spec.kind);
        }
        BY_LABEL.get(&trimmed.to_lowercase()).copied()
    }

    /// Kind whose answers count toward the given category.
    pub fn for_category(category: Category) -> TaskKind {
        match category {
            Category::Grammar => TaskKind::ErrorCorrection,
            Category::Vocabulary => TaskKind::VocabularyMatching,
            Category::PhrasalVerbs => TaskKind::PhrasalVerb,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_all_kinds() {
        assert_eq!(CATALOG.len(), TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            assert_eq!(kind.spec().kind, kind);
        }
    }

    #[test]
    fn match_by_label_is_case_insensitive() {
        assert_eq!(TaskKind::match_input("Error correction"), Some(TaskKind::ErrorCorrection));
        assert_eq!(TaskKind::match_input("  error CORRECTION "), Some(TaskKind::ErrorCorrection));
        assert_eq!(TaskKind::match_input("idiom/phrasal verb"), Some(TaskKind::PhrasalVerb));
    }

    #[test]
    fn match_by_one_based_index() {
        assert_eq!(TaskKind::match_input("1"), Some(TaskKind::ErrorCorrection));
        assert_eq!(TaskKind::match_input("2"), Some(TaskKind::VocabularyMatching));
        assert_eq!(TaskKind::match_input("6"), Some(TaskKind::FreeWriting));
        assert_eq!(TaskKind::match_input("0"), None);
        assert_eq!(TaskKind::match_input("7"), None);
    }

    #[test]
    fn unknown_input_matches_nothing() {
        assert_eq!(TaskKind::match_input(""), None);
        assert_eq!(TaskKind::match_input("karaoke"), None);
    }

    #[test]
    fn masterable_kinds_map_to_their_categories() {
        assert_eq!(TaskKind::ErrorCorrection.category(), Some(Category::Grammar));
        assert_eq!(TaskKind::VocabularyMatching.category(), Some(Category::Vocabulary));
        assert_eq!(TaskKind::PhrasalVerb.category(), Some(Category::PhrasalVerbs));
        assert_eq!(TaskKind::LetterWords.category(), None);
        assert_eq!(TaskKind::VoiceAnalysis.category(), None);
        assert_eq!(TaskKind::FreeWriting.category(), None);
    }

    #[test]
    fn only_voice_analysis_requires_audio() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.requires_audio(), kind == TaskKind::VoiceAnalysis);
        }
    }

    #[test]
    fn serde_uses_labels() {
        let json = serde_json::to_string(&TaskKind::ErrorCorrection).unwrap();
        assert_eq!(json, "\"Error correction\"");
        let back: TaskKind = serde_json::from_str("\"Vocabulary matching\"").unwrap();
        assert_eq!(back, TaskKind::VocabularyMatching);
    }

    #[test]
    fn difficulty_parses_and_defaults() {
        assert_eq!(Difficulty::parse(" Beginner "), Some(Difficulty::Beginner));
        assert_eq!(Difficulty::parse("ADVANCED"), Some(Difficulty::Advanced));
        assert_eq!(Difficulty::parse("expert"), None);
        assert_eq!(Difficulty::default(), Difficulty::Advanced);
    }
}
