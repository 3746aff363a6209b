//! Transaction and sub-transaction records.

use crate::ids::{Fingerprints, SubTxnId, TxnId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Started and accepting operations.
    OnProgress,
    /// Committed.
    Committed,
    /// Aborted.
    Aborted,
}

impl TxnStatus {
    /// Returns true if the transaction has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnStatus::OnProgress)
    }
}

/// Transaction metadata owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub txn_id: TxnId,
    /// Request that started the transaction.
    pub request_id: String,
    /// Process instance that started it.
    pub processor: String,
    /// Current status.
    pub status: TxnStatus,
    /// Creation time, unix millis.
    pub created_at: u64,
    /// Last activity, unix millis.
    pub last_time: u64,
}

impl Transaction {
    /// Creates an in-progress transaction record.
    pub fn new(txn_id: TxnId, request_id: impl Into<String>, processor: impl Into<String>) -> Self {
        let now = unix_millis();
        Self {
            txn_id,
            request_id: request_id.into(),
            processor: processor.into(),
            status: TxnStatus::OnProgress,
            created_at: now,
            last_time: now,
        }
    }

    /// Returns the options a client needs to join this transaction.
    pub fn join_option(&self) -> JoinOption {
        JoinOption {
            txn_id: self.txn_id.clone(),
            request_id: self.request_id.clone(),
            processor: self.processor.clone(),
        }
    }
}

/// Options used to start or resume a transaction from a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinOption {
    /// Transaction to join. Ignored when starting a transaction.
    pub txn_id: TxnId,
    /// Request that drives the transaction.
    pub request_id: String,
    /// Free-form id of the calling process, e.g. `10.0.0.1:8080-4242`.
    pub processor: String,
}

impl JoinOption {
    /// Creates join options.
    pub fn new(
        txn_id: impl Into<TxnId>,
        request_id: impl Into<String>,
        processor: impl Into<String>,
    ) -> Self {
        Self {
            txn_id: txn_id.into(),
            request_id: request_id.into(),
            processor: processor.into(),
        }
    }
}

/// Kind of compensating action a recovery process would take for a
/// sub-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollbackKind {
    /// Single document insert.
    InsertOne,
    /// Multi document insert.
    InsertMany,
    /// Single document update.
    UpdateOne,
    /// Multi document update.
    UpdateMany,
    /// Single document delete.
    DeleteOne,
    /// Multi document delete.
    DeleteMany,
    /// Collection drop.
    Drop,
}

/// Rollback material for one elementary mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTxnStatus {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Sub-transaction assigned by the coordinator.
    pub sub_txn_id: SubTxnId,
    /// Locked resources.
    pub fingerprints: Fingerprints,
    /// Kind of compensating action.
    pub rollback: RollbackKind,
    /// State of the affected documents before the mutation.
    pub before: Value,
    /// Intended state after the mutation.
    pub after: Value,
}
