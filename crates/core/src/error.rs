//! Error types for the Strata domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each component has its own bounded-context error enum; the top-level
//! `Error` folds them together for callers of the engine facade.

use thiserror::Error;

/// The top-level error type for all Strata operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Index errors ---
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    // --- Compaction errors ---
    #[error("Compaction error: {0}")]
    Compact(#[from] CompactError),

    // --- Context assembly errors ---
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

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

#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage cannot be reached or opened. Fatal to the
    /// calling request; never retried silently.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted or supplied value is outside its enumerated domain
    /// (e.g. an unknown role string in the turns table).
    #[error("Constraint violation: {field} = {value:?}")]
    ConstraintViolation { field: String, value: String },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("File I/O failed: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    /// A query hit an index known to be mid-rebuild. Retried after backoff
    /// with bounded attempts before being surfaced.
    #[error("Index inconsistent after {attempts} attempt(s): {detail}")]
    Inconsistent { attempts: u32, detail: String },

    /// A turn could not be added to the full-text index. Surfaced, never
    /// swallowed: a lost index record means future retrieval blindness.
    #[error("Indexing failed: {0}")]
    IndexFailed(String),

    #[error("Index query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum CompactError {
    #[error("Fact extraction failed: {0}")]
    Extraction(String),

    #[error("Merge step failed: {0}")]
    Merge(String),

    #[error("Reindex step failed: {0}")]
    Reindex(String),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The token budget is smaller than the smallest unit of available
    /// content. Surfaced instead of returning a misleadingly empty payload.
    #[error(
        "Budget exceeded before any content: smallest unit is {smallest_unit} tokens, budget is {budget}"
    )]
    BudgetExceededBeforeAnyContent { smallest_unit: usize, budget: usize },
}
