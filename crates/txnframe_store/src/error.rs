//! Error types for document store operations.

use thiserror::Error;

/// Result type for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A document with the same `_id` already exists.
    #[error("duplicate key in {collection}: _id {id}")]
    DuplicateKey {
        /// Collection name.
        collection: String,
        /// Offending id, as JSON text.
        id: String,
    },

    /// The filter document is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The update document is malformed.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// An update tried to change `_id`.
    #[error("the _id field is immutable")]
    ImmutableId,

    /// Commit or abort without a running transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A transaction was started twice.
    #[error("transaction already in progress")]
    TransactionInProgress,

    /// The session has been ended.
    #[error("session is closed")]
    SessionClosed,
}

impl StoreError {
    /// Returns true if the error was caused by the caller's input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidFilter(_) | StoreError::InvalidUpdate(_) | StoreError::ImmutableId
        )
    }
}
