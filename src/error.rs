//! Typed errors for the oracle and storage boundaries.
//!
//! Only the seams that callers branch on get their own error types; the
//! rest of the crate propagates `anyhow::Error`. Oracle failures are never
//! allowed to crash a state transition; the engine converts them into
//! user-facing messages.

use thiserror::Error;

/// Failure talking to the text-generation / transcription oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Network-level failure (connect, timeout, TLS).
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("oracle returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The API answered 200 but with no usable text.
    #[error("oracle returned an empty response")]
    Empty,

    /// The response body did not have the expected shape.
    #[error("oracle response could not be parsed: {0}")]
    Malformed(String),
}

/// Failure in the SQLite document stores.
///
/// Store reads fail open (default documents) and writes report `false` to
/// callers, so this type mostly shows up in logs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}
