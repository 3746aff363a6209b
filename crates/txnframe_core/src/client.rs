//! Transaction-control client surface.

use crate::error::TxnResult;
use std::future::Future;
use std::sync::Arc;
use txnframe_protocol::{
    command, LockMeta, LockResult, PreLockMeta, PreUnlockMeta, SubTxnId, SubTxnStatus,
    SubTxnSuccessMeta, TxnId, UnlockMeta,
};
use txnframe_rpc::RpcClient;

/// Lock and snapshot calls the orchestrator makes against the coordinator.
///
/// # Implementors
///
/// - [`RpcTxnClient`] - talks to a remote coordinator
/// - [`MockTxnClient`](crate::MockTxnClient) - records calls for tests
pub trait TxnClient: Send + Sync {
    /// Acquires a coarse prelock. `Ok(false)` means it was not granted in time.
    fn pre_lock(&self, meta: &PreLockMeta) -> impl Future<Output = TxnResult<bool>> + Send;

    /// Locks a set of fingerprints and assigns a sub-transaction.
    fn lock(&self, meta: &LockMeta) -> impl Future<Output = TxnResult<LockResult>> + Send;

    /// Releases a prelock.
    fn pre_unlock(&self, meta: &PreUnlockMeta) -> impl Future<Output = TxnResult<()>> + Send;

    /// Releases the fingerprints of one sub-transaction.
    fn unlock(&self, meta: &UnlockMeta) -> impl Future<Output = TxnResult<()>> + Send;

    /// Records rollback material for a sub-transaction.
    fn snapshot(&self, status: &SubTxnStatus) -> impl Future<Output = TxnResult<()>> + Send;

    /// Marks a sub-transaction as applied.
    fn sub_txn_success(
        &self,
        txn_id: &TxnId,
        sub_txn_id: &SubTxnId,
    ) -> impl Future<Output = TxnResult<()>> + Send;
}

/// [`TxnClient`] backed by the coordinator's RPC service.
#[derive(Debug, Clone)]
pub struct RpcTxnClient {
    rpc: Arc<RpcClient>,
}

impl RpcTxnClient {
    /// Wraps a shared RPC client.
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// The underlying RPC client.
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }
}

impl TxnClient for RpcTxnClient {
    async fn pre_lock(&self, meta: &PreLockMeta) -> TxnResult<bool> {
        Ok(self.rpc.call(command::PRE_LOCK, meta).await?)
    }

    async fn lock(&self, meta: &LockMeta) -> TxnResult<LockResult> {
        Ok(self.rpc.call(command::LOCK, meta).await?)
    }

    async fn pre_unlock(&self, meta: &PreUnlockMeta) -> TxnResult<()> {
        Ok(self.rpc.call(command::PRE_UNLOCK, meta).await?)
    }

    async fn unlock(&self, meta: &UnlockMeta) -> TxnResult<()> {
        Ok(self.rpc.call(command::UNLOCK, meta).await?)
    }

    async fn snapshot(&self, status: &SubTxnStatus) -> TxnResult<()> {
        Ok(self.rpc.call(command::SNAPSHOT, status).await?)
    }

    async fn sub_txn_success(&self, txn_id: &TxnId, sub_txn_id: &SubTxnId) -> TxnResult<()> {
        let meta = SubTxnSuccessMeta {
            txn_id: txn_id.clone(),
            sub_txn_id: sub_txn_id.clone(),
        };
        Ok(self.rpc.call(command::SUB_TXN_SUCCESS, &meta).await?)
    }
}
