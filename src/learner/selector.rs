//! Weakness scoring, review scheduling, and task-kind recommendation.

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;

use crate::catalog::{TaskKind, CATALOG};
use crate::store::proficiency::{ItemStats, ProficiencyRecord};

/// Items below this mastery are considered weak.
const WEAK_MASTERY_THRESHOLD: f64 = 0.7;
/// Items need at least this many attempts before weakness is meaningful.
const WEAK_MIN_ATTEMPTS: u32 = 2;

/// Review intervals in days, by mastery band.
const REVIEW_DAYS_LOW: i64 = 3; // mastery < 0.5
const REVIEW_DAYS_MID: i64 = 7; // 0.5 <= mastery < 0.8
const REVIEW_DAYS_HIGH: i64 = 14; // mastery >= 0.8

/// An item the user keeps getting wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct WeakItem {
    pub name: String,
    pub mastery: f64,
    pub attempts: u32,
    /// `(0.7 - mastery) * attempts`: how urgently this needs practice.
    pub priority: f64,
}

/// An item due for spaced-repetition review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub name: String,
    pub mastery: f64,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Weak items for a task kind, most urgent first.
///
/// Items with fewer than two attempts or mastery at/above the threshold
/// are excluded entirely, not merely ranked low.
pub fn weaknesses(record: &ProficiencyRecord, kind: TaskKind) -> Vec<WeakItem> {
    let Some(category) = kind.category() else {
        return Vec::new();
    };

    let mut weak: Vec<WeakItem> = record
        .items(category)
        .filter(|(_, stats)| {
            stats.attempts >= WEAK_MIN_ATTEMPTS && stats.mastery_level < WEAK_MASTERY_THRESHOLD
        })
        .map(|(name, stats)| WeakItem {
            name: name.clone(),
            mastery: stats.mastery_level,
            attempts: stats.attempts,
            priority: (WEAK_MASTERY_THRESHOLD - stats.mastery_level) * f64::from(stats.attempts),
        })
        .collect();

    weak.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    weak
}

/// Whether enough time has passed that this item should be reshown.
///
/// Never-attempted items are always due. Otherwise the interval stretches
/// with mastery: 3 days while shaky, 7 once moderate, 14 when strong.
pub fn is_due_for_review(stats: &ItemStats, now: DateTime<Utc>) -> bool {
    let Some(last) = stats.last_attempt_timestamp else {
        return true;
    };
    let elapsed_days = now.signed_duration_since(last).num_days();
    let threshold = if stats.mastery_level < 0.5 {
        REVIEW_DAYS_LOW
    } else if stats.mastery_level < 0.8 {
        REVIEW_DAYS_MID
    } else {
        REVIEW_DAYS_HIGH
    };
    elapsed_days >= threshold
}

/// Items due for review for a task kind, lowest mastery first.
pub fn review_candidates(
    record: &ProficiencyRecord,
    kind: TaskKind,
    now: DateTime<Utc>,
) -> Vec<ReviewItem> {
    let Some(category) = kind.category() else {
        return Vec::new();
    };

    let mut due: Vec<ReviewItem> = record
        .items(category)
        .filter(|(_, stats)| is_due_for_review(stats, now))
        .map(|(name, stats)| ReviewItem {
            name: name.clone(),
            mastery: stats.mastery_level,
            last_attempt: stats.last_attempt_timestamp,
        })
        .collect();

    due.sort_by(|a, b| a.mastery.total_cmp(&b.mastery));
    due
}

/// Pick the kind the user most needs: the masterable kind with the lowest
/// attempt-weighted average mastery. With no data at all, any kind from
/// the catalog, uniformly at random.
pub fn recommend_task_kind(record: &ProficiencyRecord) -> TaskKind {
    if record.is_empty() {
        return TaskKind::ALL
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(TaskKind::ErrorCorrection);
    }

    CATALOG
        .iter()
        .filter_map(|spec| {
            let category = spec.category?;
            let mut attempts = 0u64;
            let mut weighted = 0.0;
            for (_, stats) in record.items(category) {
                attempts += u64::from(stats.attempts);
                weighted += stats.mastery_level * f64::from(stats.attempts);
            }
            let score = if attempts == 0 { 0.0 } else { weighted / attempts as f64 };
            Some((spec.kind, score))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(kind, _)| kind)
        .unwrap_or(TaskKind::ErrorCorrection)
}
