//! In-memory lock table.
//!
//! Two lock levels share one table:
//!
//! - **Prelocks** are named coarse locks (`/cmdb/host`). One transaction
//!   owns a prelock at a time and may take it again; each acquisition
//!   needs a matching release.
//! - **Fingerprint locks** cover single documents. A transaction owns a
//!   fingerprint while any of its sub-transactions holds it. Other
//!   sub-transactions of the same transaction share it.
//!
//! Waiters block on one condition variable that is signalled whenever
//! anything is released.

use crate::error::{CoordinatorError, CoordinatorResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use txnframe_protocol::{
    Fingerprint, Fingerprints, LockMeta, LockResult, PreLockMeta, PreUnlockMeta, SubTxnId,
    SubTxnStatus, SubTxnSuccessMeta, TxnId, UnlockMeta,
};

#[derive(Debug)]
struct PreLockEntry {
    owner: TxnId,
    holds: u32,
}

#[derive(Debug)]
struct FingerprintEntry {
    owner: TxnId,
    holders: HashSet<SubTxnId>,
}

#[derive(Debug)]
struct SubTxn {
    fingerprints: Fingerprints,
    locked: bool,
    snapshot: Option<SubTxnStatus>,
    succeeded: bool,
}

#[derive(Debug)]
struct TxnLocks {
    sub_txns: HashMap<SubTxnId, SubTxn>,
    last_activity: Instant,
}

impl TxnLocks {
    fn new() -> Self {
        Self {
            sub_txns: HashMap::new(),
            last_activity: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pre_locks: HashMap<String, PreLockEntry>,
    fingerprints: HashMap<Fingerprint, FingerprintEntry>,
    txns: HashMap<TxnId, TxnLocks>,
}

impl LockTable {
    fn touch(&mut self, txn_id: &TxnId) -> &mut TxnLocks {
        let locks = self
            .txns
            .entry(txn_id.clone())
            .or_insert_with(TxnLocks::new);
        locks.last_activity = Instant::now();
        locks
    }

    fn try_pre_lock(&mut self, meta: &PreLockMeta) -> bool {
        match self.pre_locks.get_mut(&meta.lock_name) {
            Some(entry) if entry.owner == meta.txn_id => entry.holds += 1,
            Some(_) => return false,
            None => {
                self.pre_locks.insert(
                    meta.lock_name.clone(),
                    PreLockEntry {
                        owner: meta.txn_id.clone(),
                        holds: 1,
                    },
                );
            }
        }
        self.touch(&meta.txn_id);
        true
    }

    fn try_lock(&mut self, meta: &LockMeta) -> Option<LockResult> {
        let mut can_share = false;
        for fingerprint in meta.fingerprints.iter() {
            if let Some(entry) = self.fingerprints.get(fingerprint) {
                if entry.owner != meta.txn_id {
                    return None;
                }
                can_share = true;
            }
        }

        let sub_txn_id = SubTxnId::generate();
        for fingerprint in meta.fingerprints.iter() {
            self.fingerprints
                .entry(fingerprint.clone())
                .or_insert_with(|| FingerprintEntry {
                    owner: meta.txn_id.clone(),
                    holders: HashSet::new(),
                })
                .holders
                .insert(sub_txn_id.clone());
        }
        self.touch(&meta.txn_id).sub_txns.insert(
            sub_txn_id.clone(),
            SubTxn {
                fingerprints: meta.fingerprints.clone(),
                locked: true,
                snapshot: None,
                succeeded: false,
            },
        );
        Some(LockResult::granted(sub_txn_id, can_share))
    }

    fn release_fingerprints(&mut self, sub_txn_id: &SubTxnId, fingerprints: &Fingerprints) {
        for fingerprint in fingerprints.iter() {
            let emptied = match self.fingerprints.get_mut(fingerprint) {
                Some(entry) => {
                    entry.holders.remove(sub_txn_id);
                    entry.holders.is_empty()
                }
                None => false,
            };
            if emptied {
                self.fingerprints.remove(fingerprint);
            }
        }
    }

    fn sub_txn(
        &mut self,
        txn_id: &TxnId,
        sub_txn_id: &SubTxnId,
    ) -> CoordinatorResult<&mut SubTxn> {
        let locks = self
            .txns
            .get_mut(txn_id)
            .ok_or(CoordinatorError::UnknownSubTxn)?;
        locks.last_activity = Instant::now();
        locks
            .sub_txns
            .get_mut(sub_txn_id)
            .ok_or(CoordinatorError::UnknownSubTxn)
    }
}

fn require_txn_id(txn_id: &TxnId) -> CoordinatorResult<()> {
    if txn_id.is_empty() {
        return Err(CoordinatorError::EmptyTransactionId);
    }
    Ok(())
}

/// Lock service shared by all connections.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a prelock, waiting up to `meta.timeout`.
    ///
    /// Returns false if another transaction still holds it at the deadline.
    ///
    /// # Errors
    ///
    /// Fails without waiting if `meta.txn_id` is empty.
    pub fn pre_lock(&self, meta: &PreLockMeta) -> CoordinatorResult<bool> {
        require_txn_id(&meta.txn_id)?;
        let deadline = Instant::now() + meta.timeout;
        let mut table = self.table.lock();
        loop {
            if table.try_pre_lock(meta) {
                debug!(txn_id = %meta.txn_id, lock_name = %meta.lock_name, "prelock granted");
                return Ok(true);
            }
            if self.released.wait_until(&mut table, deadline).timed_out() {
                let granted = table.try_pre_lock(meta);
                if !granted {
                    warn!(txn_id = %meta.txn_id, lock_name = %meta.lock_name, "prelock wait timed out");
                }
                return Ok(granted);
            }
        }
    }

    /// Releases one hold of a prelock. Releasing a prelock the
    /// transaction does not own is a no-op.
    pub fn pre_unlock(&self, meta: &PreUnlockMeta) {
        let mut table = self.table.lock();
        let freed = match table.pre_locks.get_mut(&meta.lock_name) {
            Some(entry) if entry.owner == meta.txn_id => {
                entry.holds = entry.holds.saturating_sub(1);
                entry.holds == 0
            }
            _ => {
                debug!(txn_id = %meta.txn_id, lock_name = %meta.lock_name, "prelock not held");
                return;
            }
        };
        table.touch(&meta.txn_id);
        if freed {
            table.pre_locks.remove(&meta.lock_name);
            self.released.notify_all();
        }
    }

    /// Locks fingerprints for a new sub-transaction, waiting up to
    /// `meta.timeout` for fingerprints owned by other transactions.
    ///
    /// # Errors
    ///
    /// Fails without waiting if `meta.txn_id` is empty.
    pub fn lock(&self, meta: &LockMeta) -> CoordinatorResult<LockResult> {
        require_txn_id(&meta.txn_id)?;
        let deadline = Instant::now() + meta.timeout;
        let mut table = self.table.lock();
        loop {
            if let Some(result) = table.try_lock(meta) {
                debug!(
                    txn_id = %meta.txn_id,
                    fingerprints = meta.fingerprints.len(),
                    can_share = result.can_share,
                    "fingerprints locked"
                );
                return Ok(result);
            }
            if self.released.wait_until(&mut table, deadline).timed_out() {
                return Ok(table.try_lock(meta).unwrap_or_else(|| {
                    warn!(txn_id = %meta.txn_id, "fingerprint lock wait timed out");
                    LockResult::refused()
                }));
            }
        }
    }

    /// Releases the fingerprints of one sub-transaction. Its snapshot is kept.
    pub fn unlock(&self, meta: &UnlockMeta) -> CoordinatorResult<()> {
        let mut table = self.table.lock();
        let sub = table.sub_txn(&meta.txn_id, &meta.sub_txn_id)?;
        if !sub.locked {
            return Ok(());
        }
        sub.locked = false;
        let fingerprints = sub.fingerprints.clone();
        table.release_fingerprints(&meta.sub_txn_id, &fingerprints);
        self.released.notify_all();
        Ok(())
    }

    /// Stores the rollback snapshot of a sub-transaction.
    pub fn snapshot(&self, status: &SubTxnStatus) -> CoordinatorResult<()> {
        let mut table = self.table.lock();
        let sub = table.sub_txn(&status.txn_id, &status.sub_txn_id)?;
        sub.snapshot = Some(status.clone());
        Ok(())
    }

    /// Marks a sub-transaction as applied.
    pub fn sub_txn_success(&self, meta: &SubTxnSuccessMeta) -> CoordinatorResult<()> {
        let mut table = self.table.lock();
        table.sub_txn(&meta.txn_id, &meta.sub_txn_id)?.succeeded = true;
        Ok(())
    }

    /// Drops every lock of a transaction.
    ///
    /// Returns the snapshots of sub-transactions never marked successful,
    /// in no particular order.
    pub fn release_transaction(&self, txn_id: &TxnId) -> Vec<SubTxnStatus> {
        let mut table = self.table.lock();
        let Some(locks) = table.txns.remove(txn_id) else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        for (sub_txn_id, sub) in locks.sub_txns {
            if sub.locked {
                table.release_fingerprints(&sub_txn_id, &sub.fingerprints);
            }
            if !sub.succeeded {
                pending.extend(sub.snapshot);
            }
        }
        table.pre_locks.retain(|_, entry| entry.owner != *txn_id);
        self.released.notify_all();
        pending
    }

    /// Releases transactions with no lock activity for `ttl`.
    pub fn reap_idle(&self, ttl: Duration) -> Vec<TxnId> {
        let idle: Vec<TxnId> = {
            let table = self.table.lock();
            table
                .txns
                .iter()
                .filter(|(_, locks)| locks.last_activity.elapsed() >= ttl)
                .map(|(txn_id, _)| txn_id.clone())
                .collect()
        };
        for txn_id in &idle {
            let pending = self.release_transaction(txn_id);
            warn!(%txn_id, pending = pending.len(), "released idle lock owner");
        }
        idle
    }

    /// Transaction owning a prelock.
    pub fn pre_lock_owner(&self, lock_name: &str) -> Option<TxnId> {
        self.table
            .lock()
            .pre_locks
            .get(lock_name)
            .map(|entry| entry.owner.clone())
    }

    /// Transaction owning a fingerprint.
    pub fn fingerprint_owner(&self, fingerprint: &Fingerprint) -> Option<TxnId> {
        self.table
            .lock()
            .fingerprints
            .get(fingerprint)
            .map(|entry| entry.owner.clone())
    }

    /// Number of transactions with lock state.
    pub fn transaction_count(&self) -> usize {
        self.table.lock().txns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;
    use std::thread;
    use txnframe_protocol::RollbackKind;

    fn pre_lock(txn: &str, name: &str, timeout_ms: u64) -> PreLockMeta {
        PreLockMeta {
            txn_id: TxnId::new(txn),
            lock_name: name.to_string(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn pre_unlock(txn: &str, name: &str) -> PreUnlockMeta {
        PreUnlockMeta {
            txn_id: TxnId::new(txn),
            lock_name: name.to_string(),
        }
    }

    fn lock(txn: &str, ids: &[&str], timeout_ms: u64) -> LockMeta {
        LockMeta {
            txn_id: TxnId::new(txn),
            fingerprints: ids.iter().map(|id| Fingerprint::new(*id)).collect(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn status(txn: &str, sub: &SubTxnId) -> SubTxnStatus {
        SubTxnStatus {
            txn_id: TxnId::new(txn),
            sub_txn_id: sub.clone(),
            fingerprints: Fingerprints::new(),
            rollback: RollbackKind::UpdateOne,
            before: Value::Null,
            after: Value::Null,
        }
    }

    #[test]
    fn prelock_is_exclusive_and_reentrant() {
        let locks = LockManager::new();
        assert!(locks.pre_lock(&pre_lock("a", "/cmdb/host", 0)).unwrap());
        assert!(locks.pre_lock(&pre_lock("a", "/cmdb/host", 0)).unwrap());
        assert!(!locks.pre_lock(&pre_lock("b", "/cmdb/host", 20)).unwrap());

        locks.pre_unlock(&pre_unlock("a", "/cmdb/host"));
        assert_eq!(locks.pre_lock_owner("/cmdb/host"), Some(TxnId::new("a")));
        locks.pre_unlock(&pre_unlock("a", "/cmdb/host"));
        assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);
        assert!(locks.pre_lock(&pre_lock("b", "/cmdb/host", 0)).unwrap());
    }

    #[test]
    fn releasing_unowned_prelock_is_noop() {
        let locks = LockManager::new();
        assert!(locks.pre_lock(&pre_lock("a", "/cmdb/host", 0)).unwrap());
        locks.pre_unlock(&pre_unlock("b", "/cmdb/host"));
        locks.pre_unlock(&pre_unlock("b", "/cmdb/other"));
        assert_eq!(locks.pre_lock_owner("/cmdb/host"), Some(TxnId::new("a")));
    }

    #[test]
    fn prelock_waiter_wakes_on_release() {
        let locks = Arc::new(LockManager::new());
        assert!(locks.pre_lock(&pre_lock("a", "/cmdb/host", 0)).unwrap());

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.pre_lock(&pre_lock("b", "/cmdb/host", 5_000)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        locks.pre_unlock(&pre_unlock("a", "/cmdb/host"));
        assert!(waiter.join().unwrap());
        assert_eq!(locks.pre_lock_owner("/cmdb/host"), Some(TxnId::new("b")));
    }

    #[test]
    fn fingerprints_conflict_across_transactions() {
        let locks = LockManager::new();
        let first = locks.lock(&lock("a", &["x", "y"], 0)).unwrap();
        assert!(first.acquired().is_some());
        assert!(!first.can_share);

        let refused = locks.lock(&lock("b", &["y", "z"], 20)).unwrap();
        assert!(refused.acquired().is_none());
        assert_eq!(locks.fingerprint_owner(&Fingerprint::new("z")), None);
    }

    #[test]
    fn same_transaction_shares_fingerprints() {
        let locks = LockManager::new();
        let first = locks.lock(&lock("a", &["x"], 0)).unwrap();
        let second = locks.lock(&lock("a", &["x", "y"], 0)).unwrap();
        assert!(second.locked);
        assert!(second.can_share);
        assert_ne!(first.sub_txn_id, second.sub_txn_id);

        let first_id = first.sub_txn_id.unwrap();
        locks
            .unlock(&UnlockMeta {
                txn_id: TxnId::new("a"),
                sub_txn_id: first_id,
            })
            .unwrap();
        assert_eq!(
            locks.fingerprint_owner(&Fingerprint::new("x")),
            Some(TxnId::new("a"))
        );
    }

    #[test]
    fn unlock_frees_fingerprints_for_waiters() {
        let locks = Arc::new(LockManager::new());
        let held = locks.lock(&lock("a", &["x"], 0)).unwrap().sub_txn_id.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.lock(&lock("b", &["x"], 5_000)).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        locks
            .unlock(&UnlockMeta {
                txn_id: TxnId::new("a"),
                sub_txn_id: held,
            })
            .unwrap();
        assert!(waiter.join().unwrap().locked);
    }

    #[test]
    fn empty_fingerprints_still_create_sub_transaction() {
        let locks = LockManager::new();
        let result = locks.lock(&lock("a", &[], 0)).unwrap();
        let sub = result.acquired().cloned().unwrap();
        locks.snapshot(&status("a", &sub)).unwrap();
    }

    #[test]
    fn snapshot_requires_known_sub_transaction() {
        let locks = LockManager::new();
        let err = locks
            .snapshot(&status("a", &SubTxnId::new("nope")))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown sub-transaction");
    }

    #[test]
    fn release_returns_unfinished_snapshots() {
        let locks = LockManager::new();
        assert!(locks.pre_lock(&pre_lock("a", "/cmdb/host", 0)).unwrap());
        let done = locks.lock(&lock("a", &["x"], 0)).unwrap().sub_txn_id.unwrap();
        let open = locks.lock(&lock("a", &["y"], 0)).unwrap().sub_txn_id.unwrap();
        locks.snapshot(&status("a", &done)).unwrap();
        locks.snapshot(&status("a", &open)).unwrap();
        locks
            .sub_txn_success(&SubTxnSuccessMeta {
                txn_id: TxnId::new("a"),
                sub_txn_id: done,
            })
            .unwrap();

        let pending = locks.release_transaction(&TxnId::new("a"));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sub_txn_id, open);
        assert_eq!(locks.fingerprint_owner(&Fingerprint::new("x")), None);
        assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);
        assert_eq!(locks.transaction_count(), 0);
    }

    #[test]
    fn empty_transaction_id_is_rejected() {
        let locks = LockManager::new();
        let err = locks.pre_lock(&pre_lock("", "/cmdb/host", 0)).unwrap_err();
        assert!(matches!(err, CoordinatorError::EmptyTransactionId));
        let err = locks.lock(&lock("", &["h1"], 0)).unwrap_err();
        assert!(matches!(err, CoordinatorError::EmptyTransactionId));

        assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);
        assert_eq!(locks.fingerprint_owner(&Fingerprint::new("h1")), None);
        assert_eq!(locks.transaction_count(), 0);
    }

    #[test]
    fn reap_idle_releases_stale_owners() {
        let locks = LockManager::new();
        locks.lock(&lock("a", &["x"], 0)).unwrap();
        assert!(locks.reap_idle(Duration::from_secs(60)).is_empty());
        thread::sleep(Duration::from_millis(20));
        let reaped = locks.reap_idle(Duration::from_millis(10));
        assert_eq!(reaped, vec![TxnId::new("a")]);
        assert!(locks.lock(&lock("b", &["x"], 0)).unwrap().locked);
    }
}
