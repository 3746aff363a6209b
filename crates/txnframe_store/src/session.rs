//! Sessions and session transactions.
//!
//! Writes through a [`SessionCollection`] are applied immediately. While a
//! transaction is running each change is recorded in an undo log; commit
//! discards the log and abort replays it in reverse.

use crate::collection::DocCollection;
use crate::error::{StoreError, StoreResult};
use crate::memory::{Change, CollectionData, MemoryCollection, MemoryDatabase};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use txnframe_protocol::{
    DeleteResult, Document, FindAndModifyOptions, FindOptions, Index, UpdateResult,
};

#[derive(Debug)]
enum SessionState {
    Idle,
    InTransaction { undo: Vec<(String, Change)> },
    Ended,
}

#[derive(Debug)]
struct SessionInner {
    db: MemoryDatabase,
    state: Mutex<SessionState>,
}

/// A session on a [`MemoryDatabase`].
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct MemorySession {
    inner: Arc<SessionInner>,
}

impl MemorySession {
    pub(crate) fn new(db: MemoryDatabase) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                db,
                state: Mutex::new(SessionState::Idle),
            }),
        }
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already running or the session ended.
    pub fn start_transaction(&self) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            SessionState::Idle => {
                *state = SessionState::InTransaction { undo: Vec::new() };
                Ok(())
            }
            SessionState::InTransaction { .. } => Err(StoreError::TransactionInProgress),
            SessionState::Ended => Err(StoreError::SessionClosed),
        }
    }

    /// Commits the running transaction.
    pub fn commit_transaction(&self) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        match &*state {
            SessionState::InTransaction { undo } => {
                debug!(changes = undo.len(), "committing session transaction");
                *state = SessionState::Idle;
                Ok(())
            }
            SessionState::Idle => Err(StoreError::NoTransaction),
            SessionState::Ended => Err(StoreError::SessionClosed),
        }
    }

    /// Aborts the running transaction, undoing its writes. Returns the
    /// number of undone changes.
    pub fn abort_transaction(&self) -> StoreResult<usize> {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, SessionState::Idle) {
            SessionState::InTransaction { undo } => {
                let undone = undo.len();
                for (collection, change) in undo.into_iter().rev() {
                    self.inner.db.undo(&collection, change);
                }
                debug!(undone, "aborted session transaction");
                Ok(undone)
            }
            SessionState::Idle => Err(StoreError::NoTransaction),
            SessionState::Ended => {
                *state = SessionState::Ended;
                Err(StoreError::SessionClosed)
            }
        }
    }

    /// Ends the session, aborting a running transaction.
    pub fn end(&self) {
        if self.in_transaction() {
            let _ = self.abort_transaction();
        }
        *self.inner.state.lock() = SessionState::Ended;
    }

    /// Returns true while a transaction is running.
    pub fn in_transaction(&self) -> bool {
        matches!(*self.inner.state.lock(), SessionState::InTransaction { .. })
    }

    /// Returns a collection handle bound to this session.
    pub fn collection(&self, name: impl Into<String>) -> SessionCollection {
        SessionCollection {
            session: self.clone(),
            plain: self.inner.db.collection(name),
        }
    }

    fn record(&self, collection: &str, write: impl FnOnce() -> Vec<Change>) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        if matches!(*state, SessionState::Ended) {
            return Err(StoreError::SessionClosed);
        }
        let changes = write();
        if let SessionState::InTransaction { undo } = &mut *state {
            undo.extend(changes.into_iter().map(|c| (collection.to_string(), c)));
        }
        Ok(())
    }
}

/// Handle to one collection, bound to a [`MemorySession`].
#[derive(Debug, Clone)]
pub struct SessionCollection {
    session: MemorySession,
    plain: MemoryCollection,
}

impl SessionCollection {
    fn apply<R>(
        &self,
        f: impl FnOnce(&mut CollectionData, &str, &mut Vec<Change>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut outcome = None;
        self.session.record(self.plain.name(), || {
            let (result, changes) = self.plain.write(f);
            outcome = Some(result);
            changes
        })?;
        outcome.unwrap_or(Err(StoreError::SessionClosed))
    }
}

impl DocCollection for SessionCollection {
    fn name(&self) -> &str {
        self.plain.name()
    }

    fn count(&self, filter: &Document) -> StoreResult<u64> {
        self.plain.count(filter)
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        self.plain.find(filter, options)
    }

    fn insert_one(&self, doc: Document) -> StoreResult<Value> {
        self.apply(|data, name, changes| data.insert(name, doc, changes))
    }

    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<Vec<Value>> {
        self.apply(|data, name, changes| {
            docs.into_iter()
                .map(|doc| data.insert(name, doc, changes))
                .collect()
        })
    }

    fn update_one(&self, filter: &Document, update: &Document) -> StoreResult<UpdateResult> {
        self.apply(|data, _, changes| data.update(filter, update, false, changes))
    }

    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<UpdateResult> {
        self.apply(|data, _, changes| data.update(filter, update, true, changes))
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<DeleteResult> {
        self.apply(|data, _, changes| data.delete(filter, false, changes))
    }

    fn delete_many(&self, filter: &Document) -> StoreResult<DeleteResult> {
        self.apply(|data, _, changes| data.delete(filter, true, changes))
    }

    fn find_and_modify(
        &self,
        filter: &Document,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>> {
        self.apply(|data, name, changes| {
            data.find_and_modify(name, filter, update, options, changes)
        })
    }

    fn drop_collection(&self) -> StoreResult<()> {
        self.session
            .record(self.plain.name(), || self.plain.drop_recorded())
    }

    fn indexes(&self) -> StoreResult<Vec<Index>> {
        self.plain.indexes()
    }

    fn create_index(&self, index: Index) -> StoreResult<()> {
        self.apply(|data, _, changes| {
            data.create_index(index, changes);
            Ok(())
        })
    }
}
