//! Error types for transaction orchestration.

use thiserror::Error;
use txnframe_protocol::ProtocolError;
use txnframe_rpc::RpcError;
use txnframe_store::StoreError;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors produced while orchestrating a sub-transaction.
///
/// The orchestrator records the first error it sees and replays a clone of
/// it from every later phase, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxnError {
    /// A mutation was requested without a transaction id.
    #[error("empty transaction id")]
    EmptyTransactionId,

    /// A session-bound collection was used with another transaction's id.
    #[error("collection is bound to transaction {bound}, not {requested}")]
    TransactionMismatch {
        /// Transaction the collection's session belongs to.
        bound: String,
        /// Transaction the caller passed.
        requested: String,
    },

    /// A phase method was called in the wrong order or twice.
    #[error("{call} called out of order: transaction is {phase}")]
    OutOfOrder {
        /// Method that was called.
        call: &'static str,
        /// Phase the transaction was in.
        phase: &'static str,
    },

    /// The `before` snapshot has a shape fingerprints cannot be taken from.
    #[error("unsupported snapshot: {0}")]
    UnsupportedSnapshot(String),

    /// The coarse prelock was not granted in time.
    #[error("prelock {lock_name} not acquired")]
    PreLockRefused {
        /// Coarse lock path.
        lock_name: String,
    },

    /// Fingerprint locking failed or was refused.
    #[error("lock failed: {0}")]
    LockFailed(String),

    /// Transport failure talking to the coordinator.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// The coordinator rejected a transaction-level request.
    #[error("coordinator error: {0}")]
    Remote(String),

    /// The document driver failed.
    #[error("driver error: {0}")]
    Driver(String),

    /// The context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl TxnError {
    /// Creates a lock failure wrapping the underlying message.
    pub fn lock_failed(message: impl Into<String>) -> Self {
        TxnError::LockFailed(message.into())
    }

    /// Returns true for caller mistakes that retrying cannot fix.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TxnError::EmptyTransactionId
                | TxnError::TransactionMismatch { .. }
                | TxnError::OutOfOrder { .. }
                | TxnError::UnsupportedSnapshot(_)
        )
    }

    /// Returns true if another transaction held a needed lock.
    pub fn is_contention(&self) -> bool {
        matches!(self, TxnError::PreLockRefused { .. } | TxnError::LockFailed(_))
    }

    /// Returns true if the whole sub-transaction may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TxnError::Rpc(err) => err.is_retryable(),
            TxnError::DeadlineExceeded => true,
            other => other.is_contention(),
        }
    }

    /// Returns true if the context ended the operation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TxnError::Cancelled | TxnError::DeadlineExceeded)
    }
}

impl From<StoreError> for TxnError {
    fn from(err: StoreError) -> Self {
        TxnError::Driver(err.to_string())
    }
}

impl From<ProtocolError> for TxnError {
    fn from(err: ProtocolError) -> Self {
        TxnError::Rpc(RpcError::Protocol(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TxnError::EmptyTransactionId.is_usage_error());
        let mismatch = TxnError::TransactionMismatch {
            bound: "a".into(),
            requested: "b".into(),
        };
        assert!(mismatch.is_usage_error());
        assert!(!mismatch.is_retryable());
        assert!(TxnError::lock_failed("busy").is_contention());
        assert!(TxnError::lock_failed("busy").is_retryable());
        assert!(TxnError::Rpc(RpcError::ConnectionClosed).is_retryable());
        assert!(!TxnError::Rpc(RpcError::Remote("bad".into())).is_retryable());
        assert!(!TxnError::Driver("dup".into()).is_retryable());
        assert!(TxnError::Cancelled.is_interrupted());
    }

    #[test]
    fn lock_failure_wraps_message() {
        let err = TxnError::lock_failed("remote error: lock timeout");
        assert_eq!(err.to_string(), "lock failed: remote error: lock timeout");
    }

    #[test]
    fn store_errors_become_driver_errors() {
        let err: TxnError = StoreError::ImmutableId.into();
        assert!(matches!(err, TxnError::Driver(_)));
    }
}
