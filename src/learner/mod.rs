//! Adaptive learning analysis
//!
//! Pure functions over proficiency records: weakness scoring, spaced
//! repetition scheduling, task-kind recommendation, and the user-facing
//! progress report. No I/O happens here; the engine feeds these from the
//! stores.

pub mod report;
pub mod selector;

pub use report::{progress_report, system_stats, SystemStats};
pub use selector::{recommend_task_kind, review_candidates, weaknesses, ReviewItem, WeakItem};
