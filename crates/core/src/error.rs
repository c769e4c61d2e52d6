//! Error types for the Lorekeep domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the pipeline-level errors
//! (stage failures, budget overflow) live next to the code that raises them.

use thiserror::Error;

/// The top-level error type for Lorekeep operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Generation exchange errors ---
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    // --- Payload shape errors ---
    #[error("Payload error: {0}")]
    Payload(#[from] crate::artifact::PayloadError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    RunExists(String),

    #[error("Concurrent modification of {run_id}/{stage}: expected {expected}, found {found}")]
    Conflict {
        run_id: String,
        stage: String,
        expected: String,
        found: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid retrieval hints: {0}")]
    InvalidHints(String),
}

/// Errors crossing the external generation exchange boundary.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The reply was not a well-formed structured object. The same exchange
    /// must be retried; no state was changed.
    #[error("Malformed reply for chunk {chunk}: {reason}")]
    ParseFailure { chunk: usize, reason: String },

    #[error("Exchange transport failed: {0}")]
    Transport(String),

    #[error("Exchange client exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },
}

impl ExchangeError {
    /// Whether the same exchange may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ParseFailure { .. } | Self::Transport(_))
    }
}
