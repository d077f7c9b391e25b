//! Task generation and answer evaluation
//!
//! The generator turns a chosen kind plus the user's learning context into a
//! concrete [`TaskInstance`](crate::types::TaskInstance); the evaluator turns
//! the stored instance plus the user's reply into feedback and a correctness
//! verdict. Both talk to the oracle through the
//! [`TextOracle`](crate::oracle::TextOracle) seam.

pub mod evaluator;
pub mod generator;
mod prompts;

pub use evaluator::{AnswerEvaluator, AnswerPayload, Evaluation};
pub use generator::{GenContext, TaskGenerator};
