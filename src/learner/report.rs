//! Progress reporting
//!
//! Renders a user's proficiency record into the `/progress` message, and
//! aggregates operational statistics across all users for the CLI.

use chrono::{DateTime, Duration, Utc};

use crate::catalog::Category;
use crate::store::proficiency::ProficiencyRecord;
use crate::store::state::UserState;

/// Mastery at or above this counts as "mastered" in the report.
const MASTERED_THRESHOLD: f64 = 0.8;
/// How many struggling items to call out per category.
const STRUGGLING_SHOWN: usize = 3;

/// Render the `/progress` reply for one user.
pub fn progress_report(record: &ProficiencyRecord) -> String {
    if record.is_empty() {
        return "📊 You haven't completed any tasks yet. Send /newtask to start practicing!"
            .to_string();
    }

    let mut lines = vec!["📊 Your Learning Progress Report".to_string(), String::new()];
    let mut total_attempts = 0u64;

    for category in Category::ALL {
        let items: Vec<_> = record.items(category).collect();
        if items.is_empty() {
            continue;
        }

        let attempts: u64 = items.iter().map(|(_, s)| u64::from(s.attempts)).sum();
        let weighted: f64 = items
            .iter()
            .map(|(_, s)| s.mastery_level * f64::from(s.attempts))
            .sum();
        let average = if attempts == 0 { 0.0 } else { weighted / attempts as f64 };
        let mastered = items
            .iter()
            .filter(|(_, s)| s.mastery_level >= MASTERED_THRESHOLD)
            .count();

        let mut struggling: Vec<_> = items
            .iter()
            .filter(|(_, s)| s.attempts >= 2 && s.mastery_level < 0.7)
            .collect();
        struggling.sort_by(|a, b| a.1.mastery_level.total_cmp(&b.1.mastery_level));

        total_attempts += attempts;

        lines.push(format!("{}:", category.title()));
        lines.push(format!("  • Items practiced: {}", items.len()));
        lines.push(format!("  • Average mastery: {:.0}%", average * 100.0));
        lines.push(format!("  • Mastered (≥80%): {}", mastered));
        if !struggling.is_empty() {
            let worst = struggling
                .iter()
                .take(STRUGGLING_SHOWN)
                .map(|(name, s)| format!("{} ({:.0}%)", name, s.mastery_level * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("  • Needs work: {}", worst));
        }
        lines.push(String::new());
    }

    lines.push(format!("Total attempts: {}", total_attempts));
    lines.push("Keep practicing! 💪".to_string());
    lines.join("\n")
}

/// Operational aggregate across every user.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub total_users: usize,
    pub active_last_week: usize,
    pub total_attempts: u64,
    pub average_mastery: f64,
}

/// Compute system-wide statistics from all state and proficiency docs.
pub fn system_stats(
    states: &[(i64, UserState)],
    records: &[(i64, ProficiencyRecord)],
    now: DateTime<Utc>,
) -> SystemStats {
    let week = Duration::days(7);
    let active_last_week = states
        .iter()
        .filter(|(_, state)| {
            state
                .last_update
                .map(|t| now.signed_duration_since(t) <= week)
                .unwrap_or(false)
        })
        .count();

    let mut total_attempts = 0u64;
    let mut weighted = 0.0;
    for (_, record) in records {
        let attempts = record.total_attempts();
        weighted += record.overall_mastery() * attempts as f64;
        total_attempts += attempts;
    }
    let average_mastery = if total_attempts == 0 {
        0.0
    } else {
        weighted / total_attempts as f64
    };

    SystemStats {
        total_users: states.len(),
        active_last_week,
        total_attempts,
        average_mastery,
    }
}

impl std::fmt::Display for SystemStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Users:            {}", self.total_users)?;
        writeln!(f, "Active (7 days):  {}", self.active_last_week)?;
        writeln!(f, "Total attempts:   {}", self.total_attempts)?;
        write!(f, "Average mastery:  {:.0}%", self.average_mastery * 100.0)
    }
}
