//! Unified error hierarchy for simvec.
//!
//! Component modules define their own focused error enums
//! ([`HeaderError`](crate::codec::HeaderError) for the value codec,
//! [`SnapshotError`](crate::persistence::SnapshotError) for graph
//! persistence); everything folds into the top-level [`Error`] at the
//! public boundary.
//!
//! Behavioral contract per kind:
//!
//! - validation (`DimensionMismatch`, `InvalidVector`, `Header`, `Config`):
//!   rejected at the boundary, no side effects, not logged;
//! - capacity (`MemoryBudgetExceeded`): refused at admission, retryable
//!   after eviction;
//! - conflict (`DuplicateId`, `IndexAlreadyExists`) and missing
//!   (`NoSuchIndex`, `NoSuchColumn`): no effect;
//! - `Cancelled`: partial work discarded, structures unchanged;
//! - corruption (`Corrupt`, `Snapshot`): fatal for the affected index and
//!   logged at error level; the index fails fast until re-created.

use crate::codec::HeaderError;
use crate::persistence::SnapshotError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The unified simvec error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A vector's length does not match the declared column/index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared by the column or index.
        expected: usize,
        /// Dimension of the offending value.
        actual: usize,
    },

    /// A vector contains NaN or infinite samples, or is otherwise malformed.
    #[error("invalid vector: {0}")]
    InvalidVector(String),

    /// The on-disk value header failed validation.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Invalid configuration (bad parameter, unknown option, unsupported
    /// metric/quantization pairing).
    #[error("invalid config: {0}")]
    Config(String),

    /// Admitting the operation would exceed the configured memory budget.
    #[error("memory budget exceeded: requested {requested} bytes, budget {budget} bytes")]
    MemoryBudgetExceeded {
        /// Estimated bytes the operation would require.
        requested: u64,
        /// Configured budget in bytes.
        budget: u64,
    },

    /// The identifier already exists in the index.
    #[error("duplicate identifier: {id}")]
    DuplicateId {
        /// The conflicting identifier.
        id: u64,
    },

    /// An index already exists on the column.
    #[error("index already exists on {table}.{column}")]
    IndexAlreadyExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// No index is registered for the column.
    #[error("no such index: {table}.{column}")]
    NoSuchIndex {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The referenced column does not exist or is not a vector column.
    #[error("no such vector column: {table}.{column}")]
    NoSuchColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The operation was cancelled through its [`CancelToken`](crate::cancel::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant was violated; the index is poisoned and must be
    /// re-created.
    #[error("index corrupt: {0}")]
    Corrupt(String),

    /// A persisted snapshot failed validation.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Underlying storage I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for error kinds that indicate the index itself is unusable
    /// (as opposed to a rejected input).
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupt(_) | Error::Snapshot(_))
    }
}
