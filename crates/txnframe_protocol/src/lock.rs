//! Lock protocol metadata exchanged with the coordinator.
//!
//! Locking is two-level: a coarse named *prelock* serializes fingerprint
//! discovery, then a fine-grained lock over the discovered fingerprints
//! scopes the actual mutation.

use crate::ids::{Fingerprints, SubTxnId, TxnId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request to acquire a coarse prelock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreLockMeta {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Coarse lock path, e.g. `/cmdb/host`.
    pub lock_name: String,
    /// How long the coordinator may wait for a contested prelock.
    #[serde(with = "millis")]
    pub timeout: Duration,
}

/// Request to release a coarse prelock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreUnlockMeta {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Coarse lock path.
    pub lock_name: String,
}

/// Request to lock a set of fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Exact lock scope.
    pub fingerprints: Fingerprints,
    /// How long the coordinator may wait for contested fingerprints.
    #[serde(with = "millis")]
    pub timeout: Duration,
}

/// Request to release the fingerprints of one sub-transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockMeta {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Sub-transaction whose locks are released.
    pub sub_txn_id: SubTxnId,
}

/// Outcome of a fingerprint lock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockResult {
    /// Assigned only when the lock was granted.
    pub sub_txn_id: Option<SubTxnId>,
    /// Whether the fingerprints are now held.
    pub locked: bool,
    /// Some fingerprints were already held by another sub-transaction of
    /// the same parent transaction.
    pub can_share: bool,
}

impl LockResult {
    /// A granted lock.
    pub fn granted(sub_txn_id: SubTxnId, can_share: bool) -> Self {
        Self {
            sub_txn_id: Some(sub_txn_id),
            locked: true,
            can_share,
        }
    }

    /// A refused lock.
    pub fn refused() -> Self {
        Self {
            sub_txn_id: None,
            locked: false,
            can_share: false,
        }
    }

    /// Returns the sub-transaction id if the lock was granted.
    pub fn acquired(&self) -> Option<&SubTxnId> {
        if self.locked {
            self.sub_txn_id.as_ref()
        } else {
            None
        }
    }
}

/// Notification that a sub-transaction's mutation was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTxnSuccessMeta {
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Completed sub-transaction.
    pub sub_txn_id: SubTxnId,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_travels_as_millis() {
        let meta = PreLockMeta {
            txn_id: TxnId::new("txn-1"),
            lock_name: "/cmdb/host".into(),
            timeout: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["timeout"], 1500);

        let back: PreLockMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn refused_lock_has_no_sub_txn() {
        let result = LockResult::refused();
        assert!(result.acquired().is_none());

        let granted = LockResult::granted(SubTxnId::new("s1"), true);
        assert_eq!(granted.acquired().map(SubTxnId::as_str), Some("s1"));
        assert!(granted.can_share);
    }

    #[test]
    fn unlocked_result_with_id_is_not_acquired() {
        let odd = LockResult {
            sub_txn_id: Some(SubTxnId::new("s1")),
            locked: false,
            can_share: false,
        };
        assert!(odd.acquired().is_none());
    }
}
