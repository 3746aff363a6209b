//! Per-mutation transaction orchestrator.
//!
//! A [`Txn`] drives one elementary mutation through three phases:
//!
//! 1. [`Txn::try_acquire`] takes the coarse prelock of the collection.
//! 2. [`Txn::prepare`] reads the affected documents, locks their
//!    fingerprints, releases the prelock and records a snapshot.
//! 3. [`Txn::commit`] applies the mutation and reports success.
//!
//! The first error is recorded and every later phase returns it without
//! calling out. Once the prelock was granted it is released exactly once,
//! whatever happens afterwards.

use crate::client::TxnClient;
use crate::config::TxnConfig;
use crate::context::Context;
use crate::error::{TxnError, TxnResult};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};
use txnframe_protocol::{
    Document, Fingerprint, Fingerprints, LockMeta, PreLockMeta, PreUnlockMeta, RollbackKind,
    SubTxnId, SubTxnStatus, TxnId, ID_FIELD,
};

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing called yet.
    New,
    /// `try_acquire` was called.
    Tried,
    /// `prepare` was called.
    Prepared,
    /// `commit` was called.
    Committed,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::Tried => "tried",
            Phase::Prepared => "prepared",
            Phase::Committed => "committed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of the prepare callback: what to snapshot for rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct Preparation {
    /// Compensating action kind.
    pub rollback: RollbackKind,
    /// Affected documents before the mutation. Fingerprints come from here.
    pub before: Value,
    /// Intended state after the mutation.
    pub after: Value,
}

impl Preparation {
    /// Creates a preparation.
    pub fn new(rollback: RollbackKind, before: Value, after: Value) -> Self {
        Self {
            rollback,
            before,
            after,
        }
    }
}

/// Drives one sub-transaction against a [`TxnClient`].
pub struct Txn<'a, C> {
    client: &'a C,
    config: &'a TxnConfig,
    ctx: Context,
    phase: Phase,
    txn_id: TxnId,
    pre_lock_name: String,
    pre_locked: bool,
    sub_txn_id: Option<SubTxnId>,
    err: Option<TxnError>,
}

impl<'a, C: TxnClient> Txn<'a, C> {
    /// Creates an orchestrator in the [`Phase::New`] phase.
    pub fn new(client: &'a C, config: &'a TxnConfig) -> Self {
        Self {
            client,
            config,
            ctx: Context::background(),
            phase: Phase::New,
            txn_id: TxnId::default(),
            pre_lock_name: String::new(),
            pre_locked: false,
            sub_txn_id: None,
            err: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The recorded error, if any phase failed.
    pub fn error(&self) -> Option<&TxnError> {
        self.err.as_ref()
    }

    /// Sub-transaction assigned by a successful lock.
    pub fn sub_txn_id(&self) -> Option<&SubTxnId> {
        self.sub_txn_id.as_ref()
    }

    /// Returns true while the prelock is held.
    pub fn holds_pre_lock(&self) -> bool {
        self.pre_locked
    }

    /// Acquires the prelock `pre_lock_name` for `txn_id`.
    pub async fn try_acquire(
        &mut self,
        ctx: &Context,
        txn_id: &TxnId,
        pre_lock_name: &str,
    ) -> TxnResult<()> {
        self.advance("try_acquire", Phase::New, Phase::Tried)?;
        self.ctx = ctx.clone();
        self.txn_id = txn_id.clone();
        self.pre_lock_name = pre_lock_name.to_string();

        if txn_id.is_empty() {
            return Err(self.fail(TxnError::EmptyTransactionId));
        }

        let meta = PreLockMeta {
            txn_id: txn_id.clone(),
            lock_name: self.pre_lock_name.clone(),
            timeout: self.config.lock_timeout,
        };
        debug!(%txn_id, lock_name = pre_lock_name, "acquiring prelock");
        let granted = self.ctx.run(self.client.pre_lock(&meta)).await;
        match granted {
            Ok(true) => {
                self.pre_locked = true;
                Ok(())
            }
            Ok(false) => Err(self.fail(TxnError::PreLockRefused {
                lock_name: self.pre_lock_name.clone(),
            })),
            Err(err) => {
                if err.is_interrupted() {
                    // The coordinator may have granted it after we stopped waiting.
                    self.pre_locked = true;
                    let _ = self.release_pre_lock().await;
                }
                Err(self.fail(err))
            }
        }
    }

    /// Runs `prepare`, locks the fingerprints of its `before` snapshot,
    /// releases the prelock and records the snapshot.
    pub async fn prepare<F, Fut>(&mut self, prepare: F) -> TxnResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TxnResult<Preparation>>,
    {
        self.advance("prepare", Phase::Tried, Phase::Prepared)?;
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let prepared = self.prepare_locked(prepare).await;
        match prepared {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.release_pre_lock().await;
                Err(self.fail(err))
            }
        }
    }

    async fn prepare_locked<F, Fut>(&mut self, prepare: F) -> TxnResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TxnResult<Preparation>>,
    {
        let preparation = self.ctx.run(prepare()).await?;
        let fingerprints = fingerprints_of(&preparation.before)?;

        let meta = LockMeta {
            txn_id: self.txn_id.clone(),
            fingerprints: fingerprints.clone(),
            timeout: self.config.lock_timeout,
        };
        debug!(txn_id = %self.txn_id, fingerprints = fingerprints.len(), "locking fingerprints");
        let result = self
            .ctx
            .run(self.client.lock(&meta))
            .await
            .map_err(|err| match err {
                TxnError::Cancelled | TxnError::DeadlineExceeded => err,
                other => TxnError::lock_failed(other.to_string()),
            })?;
        let Some(sub_txn_id) = result.acquired().cloned() else {
            warn!(txn_id = %self.txn_id, "fingerprint lock refused");
            return Err(TxnError::lock_failed(
                "fingerprints are held by another transaction",
            ));
        };
        if result.can_share {
            debug!(txn_id = %self.txn_id, %sub_txn_id, "sharing fingerprints within transaction");
        }

        self.release_pre_lock().await?;

        let status = SubTxnStatus {
            txn_id: self.txn_id.clone(),
            sub_txn_id: sub_txn_id.clone(),
            fingerprints,
            rollback: preparation.rollback,
            before: preparation.before,
            after: preparation.after,
        };
        self.ctx.run(self.client.snapshot(&status)).await?;
        debug!(txn_id = %self.txn_id, %sub_txn_id, "snapshot recorded");
        self.sub_txn_id = Some(sub_txn_id);
        Ok(())
    }

    /// Applies the mutation and marks the sub-transaction as succeeded.
    ///
    /// The success notification is sent only if `commit` succeeded. It uses
    /// a fresh context so an expiring caller context cannot leave an applied
    /// mutation looking unfinished.
    pub async fn commit<T, F, Fut>(&mut self, commit: F) -> TxnResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TxnResult<T>>,
    {
        self.advance("commit", Phase::Prepared, Phase::Committed)?;
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let released = self.release_pre_lock().await;
        if let Err(err) = released {
            return Err(self.fail(err));
        }
        let Some(sub_txn_id) = self.sub_txn_id.clone() else {
            return Err(self.fail(TxnError::OutOfOrder {
                call: "commit",
                phase: "unlocked",
            }));
        };

        let applied = self.ctx.run(commit()).await;
        let value = match applied {
            Ok(value) => value,
            Err(err) => {
                warn!(txn_id = %self.txn_id, %sub_txn_id, error = %err, "mutation failed, snapshot kept");
                return Err(self.fail(err));
            }
        };

        let notify = Context::with_timeout(self.config.release_timeout);
        let notified = notify
            .run(self.client.sub_txn_success(&self.txn_id, &sub_txn_id))
            .await;
        if let Err(err) = notified {
            return Err(self.fail(err));
        }
        debug!(txn_id = %self.txn_id, %sub_txn_id, "sub-transaction succeeded");
        Ok(value)
    }

    fn advance(&mut self, call: &'static str, from: Phase, to: Phase) -> TxnResult<()> {
        if self.phase != from {
            return Err(TxnError::OutOfOrder {
                call,
                phase: self.phase.name(),
            });
        }
        self.phase = to;
        Ok(())
    }

    fn fail(&mut self, err: TxnError) -> TxnError {
        if self.err.is_none() {
            self.err = Some(err.clone());
        }
        err
    }

    async fn release_pre_lock(&mut self) -> TxnResult<()> {
        if !self.pre_locked {
            return Ok(());
        }
        self.pre_locked = false;
        let meta = PreUnlockMeta {
            txn_id: self.txn_id.clone(),
            lock_name: self.pre_lock_name.clone(),
        };
        let ctx = Context::with_timeout(self.config.release_timeout);
        let result = ctx.run(self.client.pre_unlock(&meta)).await;
        match &result {
            Ok(()) => debug!(txn_id = %self.txn_id, lock_name = %self.pre_lock_name, "prelock released"),
            Err(err) => {
                warn!(txn_id = %self.txn_id, lock_name = %self.pre_lock_name, error = %err, "prelock release failed")
            }
        }
        result
    }
}

impl<C> fmt::Debug for Txn<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("phase", &self.phase)
            .field("txn_id", &self.txn_id)
            .field("pre_lock_name", &self.pre_lock_name)
            .field("pre_locked", &self.pre_locked)
            .field("sub_txn_id", &self.sub_txn_id)
            .field("err", &self.err)
            .finish()
    }
}

/// Extracts lock fingerprints from a `before` snapshot.
///
/// `null` yields none, a document yields its `_id`, a list of documents
/// yields each `_id` in order.
pub fn fingerprints_of(before: &Value) -> TxnResult<Fingerprints> {
    match before {
        Value::Null => Ok(Fingerprints::new()),
        Value::Object(doc) => Ok(std::iter::once(fingerprint_of(doc)?).collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(doc) => fingerprint_of(doc),
                other => Err(TxnError::UnsupportedSnapshot(format!(
                    "list element is {}, expected a document",
                    kind(other)
                ))),
            })
            .collect(),
        other => Err(TxnError::UnsupportedSnapshot(format!(
            "{} is neither a document nor a list of documents",
            kind(other)
        ))),
    }
}

fn fingerprint_of(doc: &Document) -> TxnResult<Fingerprint> {
    match doc.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(Fingerprint::new(id.clone())),
        Some(Value::Null) | None => Err(TxnError::UnsupportedSnapshot(
            "document without _id".to_string(),
        )),
        Some(other) => Ok(Fingerprint::new(other.to_string())),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a document",
    }
}
