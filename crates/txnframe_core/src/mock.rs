//! Recording transaction client for tests.

use crate::client::TxnClient;
use crate::error::{TxnError, TxnResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use txnframe_protocol::{
    LockMeta, LockResult, PreLockMeta, PreUnlockMeta, SubTxnId, SubTxnStatus, TxnId, UnlockMeta,
};

/// Selects one [`TxnClient`] method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnOp {
    /// [`TxnClient::pre_lock`]
    PreLock,
    /// [`TxnClient::lock`]
    Lock,
    /// [`TxnClient::pre_unlock`]
    PreUnlock,
    /// [`TxnClient::unlock`]
    Unlock,
    /// [`TxnClient::snapshot`]
    Snapshot,
    /// [`TxnClient::sub_txn_success`]
    SubTxnSuccess,
}

/// One recorded call with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnCall {
    /// A prelock request.
    PreLock(PreLockMeta),
    /// A fingerprint lock request.
    Lock(LockMeta),
    /// A prelock release.
    PreUnlock(PreUnlockMeta),
    /// A fingerprint release.
    Unlock(UnlockMeta),
    /// A snapshot.
    Snapshot(SubTxnStatus),
    /// A success notification.
    SubTxnSuccess {
        /// Owning transaction.
        txn_id: TxnId,
        /// Completed sub-transaction.
        sub_txn_id: SubTxnId,
    },
}

impl TxnCall {
    /// The method this call was made through.
    pub fn op(&self) -> TxnOp {
        match self {
            TxnCall::PreLock(_) => TxnOp::PreLock,
            TxnCall::Lock(_) => TxnOp::Lock,
            TxnCall::PreUnlock(_) => TxnOp::PreUnlock,
            TxnCall::Unlock(_) => TxnOp::Unlock,
            TxnCall::Snapshot(_) => TxnOp::Snapshot,
            TxnCall::SubTxnSuccess { .. } => TxnOp::SubTxnSuccess,
        }
    }
}

/// In-memory [`TxnClient`] that records every call.
///
/// Every lock is granted with a fresh `sub-N` id unless the client was
/// told to refuse it or fail it.
///
/// ```
/// use txnframe_core::{MockTxnClient, TxnError, TxnOp};
///
/// let client = MockTxnClient::new();
/// client.fail(TxnOp::Lock, TxnError::lock_failed("busy"));
/// assert!(client.calls().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MockTxnClient {
    calls: Mutex<Vec<TxnCall>>,
    failures: Mutex<HashMap<TxnOp, TxnError>>,
    delays: Mutex<HashMap<TxnOp, Duration>>,
    refuse_pre_lock: AtomicBool,
    refuse_lock: AtomicBool,
    share: AtomicBool,
    next_sub: AtomicU64,
}

impl MockTxnClient {
    /// Creates a client that grants everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `op` fail with `error`.
    pub fn fail(&self, op: TxnOp, error: TxnError) {
        self.failures.lock().insert(op, error);
    }

    /// Makes every later call of `op` sleep before answering.
    pub fn delay(&self, op: TxnOp, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    /// Answers prelock requests with `false`.
    pub fn refuse_pre_lock(&self) {
        self.refuse_pre_lock.store(true, Ordering::SeqCst);
    }

    /// Answers lock requests with a refusal.
    pub fn refuse_lock(&self) {
        self.refuse_lock.store(true, Ordering::SeqCst);
    }

    /// Sets `can_share` on granted locks.
    pub fn share_locks(&self) {
        self.share.store(true, Ordering::SeqCst);
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<TxnCall> {
        self.calls.lock().clone()
    }

    /// The methods of all recorded calls in order.
    pub fn ops(&self) -> Vec<TxnOp> {
        self.calls.lock().iter().map(TxnCall::op).collect()
    }

    /// Number of calls made through `op`.
    pub fn count(&self, op: TxnOp) -> usize {
        self.calls.lock().iter().filter(|call| call.op() == op).count()
    }

    /// Recorded snapshots in order.
    pub fn snapshots(&self) -> Vec<SubTxnStatus> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TxnCall::Snapshot(status) => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, call: TxnCall) -> TxnResult<()> {
        let op = call.op();
        self.calls.lock().push(call);
        let delay = self.delays.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().get(&op).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl TxnClient for MockTxnClient {
    async fn pre_lock(&self, meta: &PreLockMeta) -> TxnResult<bool> {
        self.enter(TxnCall::PreLock(meta.clone())).await?;
        Ok(!self.refuse_pre_lock.load(Ordering::SeqCst))
    }

    async fn lock(&self, meta: &LockMeta) -> TxnResult<LockResult> {
        self.enter(TxnCall::Lock(meta.clone())).await?;
        if self.refuse_lock.load(Ordering::SeqCst) {
            return Ok(LockResult::refused());
        }
        let n = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LockResult::granted(
            SubTxnId::new(format!("sub-{n}")),
            self.share.load(Ordering::SeqCst),
        ))
    }

    async fn pre_unlock(&self, meta: &PreUnlockMeta) -> TxnResult<()> {
        self.enter(TxnCall::PreUnlock(meta.clone())).await
    }

    async fn unlock(&self, meta: &UnlockMeta) -> TxnResult<()> {
        self.enter(TxnCall::Unlock(meta.clone())).await
    }

    async fn snapshot(&self, status: &SubTxnStatus) -> TxnResult<()> {
        self.enter(TxnCall::Snapshot(status.clone())).await
    }

    async fn sub_txn_success(&self, txn_id: &TxnId, sub_txn_id: &SubTxnId) -> TxnResult<()> {
        self.enter(TxnCall::SubTxnSuccess {
            txn_id: txn_id.clone(),
            sub_txn_id: sub_txn_id.clone(),
        })
        .await
    }
}
