//! Error types for canopy-core operations.
//!
//! Every fallible operation in the crate returns [`CoreResult`]. The taxonomy
//! distinguishes recoverable conditions (a missing chunk, a lost
//! compare-and-set race) from corruption ([`CoreError::InvariantViolation`]),
//! which callers should treat as fatal.

use std::io;
use thiserror::Error;

use crate::hash::Hash;

/// Error type for all codec, store, and tree operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Malformed or truncated chunk bytes.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Chunk or dataset head absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or storage layer failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Optimistic head update lost a race. The caller may merge and retry;
    /// the core never loops.
    #[error("head conflict on '{dataset}': expected {expected:?}, found {actual:?}")]
    Conflict {
        dataset: String,
        expected: Option<Hash>,
        actual: Option<Hash>,
    },

    /// A struct value failed validation against its declared type, or an
    /// operation was applied to a value of the wrong kind.
    #[error("schema error: {0}")]
    Schema(String),

    /// Detected inconsistency in stored data (e.g. a subtree count that does
    /// not match its children). Indicates corruption; not recoverable.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Dataset names are non-empty ASCII identifiers.
    #[error("invalid dataset name: {0:?}")]
    InvalidDatasetName(String),

    /// Positional access past the end of a sequence.
    #[error("index {index} out of bounds for sequence of length {len}")]
    OutOfBounds { index: u64, len: u64 },

    /// Lock/mutex poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CoreError::LockPoisoned(err.to_string())
    }
}

/// Result type for canopy-core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
