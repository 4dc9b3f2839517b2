//! Error taxonomy for the memory engine.
//!
//! Validation, conflict, trust and invariant errors surface to the caller
//! unchanged; the engine never retries them. Transient errors carry a typed
//! marker so callers can decide to retry. Integrity errors halt startup.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Malformed input (empty title/target, short rationale, bad mode)
    #[error("Validation error: {0}")]
    Validation(String),
    /// At-most-one-active violated, or supersede references non-active ids
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A structural invariant was violated (cycle, dangling reference)
    #[error("Invariant violation: {0}")]
    Invariant(String),
    /// Illegal state transition or immutable-field change
    #[error("Transition rejected: {0}")]
    Transition(String),
    /// Write attempted from a source the trust policy disallows
    #[error("Trust boundary violation: {0}")]
    TrustBoundary(String),
    /// Detected during recovery; requires operator action
    #[error("Integrity violation: {0}")]
    Integrity(String),
    /// Lock unavailable or provider timeout; safe to retry
    #[error("Busy: {0}")]
    Busy(String),
    /// Artifact or event not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Artifact document could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),
    /// Revision subsystem failure
    #[error("Audit error: {0}")]
    Audit(#[from] git2::Error),
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Whether the caller may safely retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, MemoryError::Busy(_))
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, MemoryError>;
