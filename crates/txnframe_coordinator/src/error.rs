//! Error types for the coordinator.

use thiserror::Error;
use txnframe_rpc::RpcError;
use txnframe_store::StoreError;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur in the coordinator.
///
/// The `Display` text of each variant is what clients see in
/// `OpReply::message` or in an error frame.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The request names a transaction with no live session.
    #[error("session not found")]
    SessionNotFound,

    /// A lock request without a transaction id.
    #[error("empty transaction id")]
    EmptyTransactionId,

    /// The opcode is not one the coordinator serves.
    #[error("unknown operation")]
    UnknownOperation,

    /// The sub-transaction was never created by a lock request.
    #[error("unknown sub-transaction")]
    UnknownSubTxn,

    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Document store failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Transport failure.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinatorError {
    /// Returns true if the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            CoordinatorError::SessionNotFound
            | CoordinatorError::EmptyTransactionId
            | CoordinatorError::UnknownOperation
            | CoordinatorError::UnknownSubTxn
            | CoordinatorError::InvalidRequest(_) => true,
            CoordinatorError::Store(err) => err.is_invalid_input(),
            CoordinatorError::Rpc(_) | CoordinatorError::Io(_) => false,
        }
    }
}
