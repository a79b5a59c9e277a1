use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid repository id {id:?}: {reason}")]
    InvalidRepositoryId { id: String, reason: String },

    #[error("invalid client id: {0}")]
    InvalidClientId(u32),

    #[error("id space of client {0} is exhausted")]
    IdSpaceExhausted(u32),
}
