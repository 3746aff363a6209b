//! Coordinator sessions.
//!
//! A session wraps one store session with a running transaction and the
//! [`Transaction`] record handed back to clients. Sessions are keyed by
//! transaction id.

use crate::error::{CoordinatorError, CoordinatorResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use txnframe_protocol::{unix_millis, Transaction, TxnId, TxnStatus};
use txnframe_store::{MemoryDatabase, MemorySession, SessionCollection};

/// One live transaction session.
#[derive(Debug)]
pub struct Session {
    transaction: Mutex<Transaction>,
    store: MemorySession,
    last_active: Mutex<Instant>,
}

impl Session {
    /// Current transaction record.
    pub fn transaction(&self) -> Transaction {
        self.transaction.lock().clone()
    }

    /// Transaction id.
    pub fn txn_id(&self) -> TxnId {
        self.transaction.lock().txn_id.clone()
    }

    /// A collection whose writes join this session's transaction.
    pub fn collection(&self, name: &str) -> SessionCollection {
        self.store.collection(name)
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
        self.transaction.lock().last_time = unix_millis();
    }

    fn finish(&self, status: TxnStatus) -> Transaction {
        self.store.end();
        let mut transaction = self.transaction.lock();
        transaction.status = status;
        transaction.last_time = unix_millis();
        transaction.clone()
    }
}

/// Registry of live sessions.
#[derive(Debug)]
pub struct SessionManager {
    db: MemoryDatabase,
    sessions: RwLock<HashMap<TxnId, Arc<Session>>>,
}

impl SessionManager {
    /// Creates an empty registry over `db`.
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            db,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a store transaction under a freshly minted transaction id.
    pub fn create_session(
        &self,
        request_id: impl Into<String>,
        processor: impl Into<String>,
    ) -> CoordinatorResult<Arc<Session>> {
        let store = self.db.start_session();
        store.start_transaction()?;
        let transaction = Transaction::new(TxnId::generate(), request_id, processor);
        let txn_id = transaction.txn_id.clone();
        let session = Arc::new(Session {
            transaction: Mutex::new(transaction),
            store,
            last_active: Mutex::new(Instant::now()),
        });
        self.sessions.write().insert(txn_id.clone(), Arc::clone(&session));
        info!(%txn_id, "session created");
        Ok(session)
    }

    /// Looks up a session and marks it active.
    pub fn get(&self, txn_id: &TxnId) -> CoordinatorResult<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .get(txn_id)
            .cloned()
            .ok_or(CoordinatorError::SessionNotFound)?;
        session.touch();
        Ok(session)
    }

    /// Removes a session without finishing its transaction.
    pub fn remove(&self, txn_id: &TxnId) -> Option<Arc<Session>> {
        self.sessions.write().remove(txn_id)
    }

    /// Commits and removes a session.
    pub fn commit(&self, txn_id: &TxnId) -> CoordinatorResult<Transaction> {
        let session = self.remove(txn_id).ok_or(CoordinatorError::SessionNotFound)?;
        session.store.commit_transaction()?;
        let transaction = session.finish(TxnStatus::Committed);
        info!(%txn_id, "session committed");
        Ok(transaction)
    }

    /// Aborts and removes a session, undoing its writes.
    pub fn abort(&self, txn_id: &TxnId) -> CoordinatorResult<Transaction> {
        let session = self.remove(txn_id).ok_or(CoordinatorError::SessionNotFound)?;
        let undone = session.store.abort_transaction()?;
        let transaction = session.finish(TxnStatus::Aborted);
        info!(%txn_id, undone, "session aborted");
        Ok(transaction)
    }

    /// Ids of sessions idle for at least `ttl`.
    pub fn expired(&self, ttl: Duration) -> Vec<TxnId> {
        let expired: Vec<TxnId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.idle_for() >= ttl)
            .map(|(txn_id, _)| txn_id.clone())
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "found expired sessions");
        }
        expired
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txnframe_protocol::Document;
    use txnframe_store::DocCollection;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn create_and_commit() {
        let db = MemoryDatabase::new("cmdb");
        let sessions = SessionManager::new(db.clone());
        let session = sessions.create_session("req-1", "proc").unwrap();
        let txn_id = session.txn_id();
        assert!(!txn_id.is_empty());
        assert_eq!(session.transaction().status, TxnStatus::OnProgress);

        session
            .collection("host")
            .insert_one(doc(json!({"_id": "a"})))
            .unwrap();
        let transaction = sessions.commit(&txn_id).unwrap();
        assert_eq!(transaction.status, TxnStatus::Committed);
        assert_eq!(db.collection("host").count(&Document::new()).unwrap(), 1);
        assert!(sessions.is_empty());
    }

    #[test]
    fn abort_undoes_writes() {
        let db = MemoryDatabase::new("cmdb");
        let sessions = SessionManager::new(db.clone());
        let txn_id = sessions.create_session("", "proc").unwrap().txn_id();

        let session = sessions.get(&txn_id).unwrap();
        session
            .collection("host")
            .insert_one(doc(json!({"_id": "a"})))
            .unwrap();
        let transaction = sessions.abort(&txn_id).unwrap();
        assert_eq!(transaction.status, TxnStatus::Aborted);
        assert_eq!(db.collection("host").count(&Document::new()).unwrap(), 0);
    }

    #[test]
    fn unknown_session() {
        let sessions = SessionManager::new(MemoryDatabase::new("cmdb"));
        let missing = TxnId::new("missing");
        assert!(matches!(
            sessions.get(&missing),
            Err(CoordinatorError::SessionNotFound)
        ));
        assert!(matches!(
            sessions.commit(&missing),
            Err(CoordinatorError::SessionNotFound)
        ));
    }

    #[test]
    fn expiry() {
        let sessions = SessionManager::new(MemoryDatabase::new("cmdb"));
        let txn_id = sessions.create_session("", "proc").unwrap().txn_id();
        assert!(sessions.expired(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sessions.expired(Duration::from_millis(10)), vec![txn_id]);
        assert_eq!(sessions.len(), 1);
    }
}
