//! Lingotutor - adaptive Telegram language tutor library
//!
//! A webhook-driven practice bot:
//! - Conversation state machine per Telegram chat
//! - Generated exercises (grammar, vocabulary, phrasal verbs, fluency,
//!   speaking, writing) via an OpenAI-compatible chat oracle
//! - Per-item mastery tracking with spaced-repetition review
//! - SQLite-backed state, proficiency, and rate-limit stores
//!
//! # Example
//!
//! ```ignore
//! use lingotutor::config::Config;
//! use lingotutor::store::Database;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let db = Database::open(config.storage.db_path()?).await?;
//!     println!("stores ready");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod learner;
pub mod oracle;
pub mod secrets;
pub mod server;
pub mod store;
pub mod tasks;
pub mod telegram;
pub mod types;

pub use config::Config;
pub use engine::SessionEngine;
pub use server::{start as start_server, ServerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
