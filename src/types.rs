//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

use crate::catalog::TaskKind;

/// The item(s) a task instance puts under test.
///
/// Single-item kinds test one name ("Past Perfect"); matching kinds test a
/// whole list of words. Serialized untagged so stored documents hold either
/// a plain string or an array, matching the historical document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestedItems {
    One(String),
    Many(Vec<String>),
}

impl TestedItems {
    /// All tested item names, in order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            TestedItems::One(name) => vec![name.as_str()],
            TestedItems::Many(names) => names.iter().map(|n| n.as_str()).collect(),
        }
    }

    /// The single tested item, if this is not a matching task.
    pub fn single(&self) -> Option<&str> {
        match self {
            TestedItems::One(name) => Some(name.as_str()),
            TestedItems::Many(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TestedItems::One(_) => 1,
            TestedItems::Many(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TestedItems::One(name) => name.is_empty(),
            TestedItems::Many(names) => names.is_empty(),
        }
    }
}

/// One concrete generated exercise.
///
/// Immutable once created: the generator builds it, the state store embeds
/// it in the user's document, and the evaluator reads it back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Text shown to the user.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_item_tested: Option<TestedItems>,
}

impl TaskInstance {
    pub fn new(kind: TaskKind, description: String, items: Option<TestedItems>) -> Self {
        Self {
            kind,
            description,
            specific_item_tested: items,
        }
    }

    /// Tested item names, empty when the task is open-ended.
    pub fn tested_names(&self) -> Vec<&str> {
        self.specific_item_tested
            .as_ref()
            .map(|items| items.names())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tested_items_serialize_untagged() {
        let one = TestedItems::One("Past Perfect".to_string());
        assert_eq!(serde_json::to_string(&one).unwrap(), "\"Past Perfect\"");

        let many = TestedItems::Many(vec!["cat".to_string(), "dog".to_string()]);
        assert_eq!(serde_json::to_string(&many).unwrap(), "[\"cat\",\"dog\"]");

        let back: TestedItems = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(back, TestedItems::One("hello".to_string()));
        let back: TestedItems = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn task_instance_uses_type_key() {
        let task = TaskInstance::new(
            TaskKind::ErrorCorrection,
            "Fix this sentence.".to_string(),
            Some(TestedItems::One("Articles".to_string())),
        );
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "Error correction");
        assert_eq!(json["specific_item_tested"], "Articles");
    }

    #[test]
    fn tested_names_flatten_both_shapes() {
        let task = TaskInstance::new(
            TaskKind::VocabularyMatching,
            "Match the words.".to_string(),
            Some(TestedItems::Many(vec!["cat".into(), "dog".into(), "bird".into()])),
        );
        assert_eq!(task.tested_names(), vec!["cat", "dog", "bird"]);

        let open = TaskInstance::new(TaskKind::FreeWriting, "Write!".to_string(), None);
        assert!(open.tested_names().is_empty());
    }
}
