//! Command handlers of the coordinator.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::lock::LockManager;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use txnframe_protocol::{
    command, CollectionRequest, DbRequest, Index, LockMeta, OpCode, OpReply,
    PreLockMeta, PreUnlockMeta, SequenceRequest, SubTxnStatus, SubTxnSuccessMeta, TxnId,
    UnlockMeta,
};
use txnframe_rpc::Router;
use txnframe_store::{DocCollection, MemoryDatabase};

/// Coordinator state and the handlers registered for each command.
#[derive(Debug)]
pub struct TxnService {
    db: MemoryDatabase,
    processor: String,
    sessions: SessionManager,
    locks: LockManager,
}

impl TxnService {
    /// Creates a service over `db`, stamping `processor` on transactions
    /// whose starter did not name one.
    pub fn new(db: MemoryDatabase, processor: impl Into<String>) -> Self {
        Self {
            sessions: SessionManager::new(db.clone()),
            db,
            processor: processor.into(),
            locks: LockManager::new(),
        }
    }

    /// The served database.
    pub fn db(&self) -> &MemoryDatabase {
        &self.db
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Lock table.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Builds the command registry.
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();

        let svc = Arc::clone(self);
        router.route(command::DB_OPERATION, move |req: DbRequest| {
            Ok::<_, String>(svc.handle_db_operation(req))
        });
        let svc = Arc::clone(self);
        router.route(command::PRE_LOCK, move |meta: PreLockMeta| {
            svc.locks.pre_lock(&meta).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::PRE_UNLOCK, move |meta: PreUnlockMeta| {
            svc.locks.pre_unlock(&meta);
            Ok::<_, String>(())
        });
        let svc = Arc::clone(self);
        router.route(command::LOCK, move |meta: LockMeta| {
            svc.locks.lock(&meta).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::UNLOCK, move |meta: UnlockMeta| {
            svc.locks.unlock(&meta).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::SNAPSHOT, move |status: SubTxnStatus| {
            svc.locks.snapshot(&status).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::SUB_TXN_SUCCESS, move |meta: SubTxnSuccessMeta| {
            svc.locks.sub_txn_success(&meta).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::NEXT_SEQUENCE, move |req: SequenceRequest| {
            Ok::<_, String>(svc.db.next_sequence(&req.name))
        });
        let svc = Arc::clone(self);
        router.route(command::INDEXES, move |req: CollectionRequest| {
            svc.indexes(&req).map_err(|e| e.to_string())
        });
        let svc = Arc::clone(self);
        router.route(command::DROP_COLLECTION, move |req: CollectionRequest| {
            svc.drop_collection(&req).map_err(|e| e.to_string())
        });

        router
    }

    /// Executes a `DBOperation` request. Failures are reported in the reply.
    pub fn handle_db_operation(&self, request: DbRequest) -> OpReply {
        match self.db_operation(&request) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(op = request.header.op_code, error = %err, "db operation failed");
                OpReply::error(err.to_string())
            }
        }
    }

    fn db_operation(&self, request: &DbRequest) -> CoordinatorResult<OpReply> {
        let op = request.op_code().ok_or(CoordinatorError::UnknownOperation)?;
        match op {
            OpCode::StartTransaction => self.start_transaction(request),
            OpCode::Commit => {
                let txn_id = session_id(request)?;
                let transaction = self.sessions.commit(txn_id)?;
                self.locks.release_transaction(txn_id);
                Ok(OpReply::success().with_transaction(transaction))
            }
            OpCode::Abort => {
                let txn_id = session_id(request)?;
                let transaction = self.sessions.abort(txn_id)?;
                let pending = self.locks.release_transaction(txn_id);
                if !pending.is_empty() {
                    warn!(%txn_id, pending = pending.len(), "aborted with unfinished sub-transactions");
                }
                Ok(OpReply::success().with_transaction(transaction))
            }
            data_op => match request.header.session_id() {
                Some(txn_id) => {
                    let session = self.sessions.get(txn_id)?;
                    execute(&session.collection(&request.collection), data_op, request)
                }
                None => execute(&self.db.collection(&request.collection), data_op, request),
            },
        }
    }

    fn start_transaction(&self, request: &DbRequest) -> CoordinatorResult<OpReply> {
        let processor = if request.header.processor.is_empty() {
            self.processor.as_str()
        } else {
            request.header.processor.as_str()
        };
        let session = self
            .sessions
            .create_session(request.header.request_id.as_str(), processor)?;
        Ok(OpReply::success().with_transaction(session.transaction()))
    }

    fn indexes(&self, request: &CollectionRequest) -> CoordinatorResult<Vec<Index>> {
        Ok(self.db.collection(&request.collection).indexes()?)
    }

    fn drop_collection(&self, request: &CollectionRequest) -> CoordinatorResult<()> {
        self.db.collection(&request.collection).drop_collection()?;
        info!(collection = %request.collection, "collection dropped");
        Ok(())
    }

    /// Aborts sessions idle for `ttl` and releases idle lock owners.
    /// Returns the number of sessions aborted.
    pub fn reap(&self, ttl: Duration) -> usize {
        let expired = self.sessions.expired(ttl);
        for txn_id in &expired {
            match self.sessions.abort(txn_id) {
                Ok(_) => warn!(%txn_id, "aborted idle session"),
                Err(err) => debug!(%txn_id, error = %err, "idle session already finished"),
            }
            self.locks.release_transaction(txn_id);
        }
        self.locks.reap_idle(ttl);
        expired.len()
    }
}

fn session_id(request: &DbRequest) -> CoordinatorResult<&TxnId> {
    request
        .header
        .session_id()
        .ok_or(CoordinatorError::SessionNotFound)
}

fn execute(
    collection: &dyn DocCollection,
    op: OpCode,
    request: &DbRequest,
) -> CoordinatorResult<OpReply> {
    let reply = match op {
        OpCode::Insert => {
            let ids = collection.insert_many(request.documents.clone())?;
            OpReply::success().with_count(ids.len() as u64)
        }
        OpCode::Update => {
            let result = if request.multi {
                collection.update_many(&request.selector, &request.update)?
            } else {
                collection.update_one(&request.selector, &request.update)?
            };
            let mut reply = OpReply::success();
            reply.matched = result.matched;
            reply.modified = result.modified;
            reply
        }
        OpCode::Delete => {
            let result = if request.multi {
                collection.delete_many(&request.selector)?
            } else {
                collection.delete_one(&request.selector)?
            };
            OpReply::success().with_count(result.deleted)
        }
        OpCode::Find => {
            let documents = collection.find(&request.selector, &request.find)?;
            OpReply::success()
                .with_count(documents.len() as u64)
                .with_documents(documents)
        }
        OpCode::FindAndModify => {
            let found = collection.find_and_modify(
                &request.selector,
                &request.update,
                request.modify,
            )?;
            OpReply::success().with_documents(found.into_iter().collect())
        }
        OpCode::Count => OpReply::success().with_count(collection.count(&request.selector)?),
        OpCode::StartTransaction | OpCode::Commit | OpCode::Abort => {
            return Err(CoordinatorError::UnknownOperation)
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txnframe_protocol::{Document, JoinOption, TxnStatus};

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn service() -> TxnService {
        TxnService::new(MemoryDatabase::new("cmdb"), "127.0.0.1:7070-1")
    }

    fn start(svc: &TxnService) -> JoinOption {
        let mut request = DbRequest::new(OpCode::StartTransaction, "");
        request.header.request_id = "req-1".into();
        let reply = svc.handle_db_operation(request);
        assert!(reply.ok, "{}", reply.message);
        reply.transaction.unwrap().join_option()
    }

    #[test]
    fn unknown_session_is_reported_in_reply() {
        let svc = service();
        let request = DbRequest::new(OpCode::Insert, "host")
            .with_join(&JoinOption::new("no-such-txn", "", ""))
            .with_documents(vec![doc(json!({"_id": "a"}))]);
        let reply = svc.handle_db_operation(request);
        assert!(!reply.ok);
        assert_eq!(reply.message, "session not found");
        assert_eq!(svc.db().collection("host").count(&Document::new()).unwrap(), 0);
    }

    #[test]
    fn unknown_opcode_is_reported_in_reply() {
        let svc = service();
        let mut request = DbRequest::new(OpCode::Find, "host");
        request.header.op_code = 99;
        let reply = svc.handle_db_operation(request);
        assert!(!reply.ok);
        assert_eq!(reply.message, "unknown operation");
    }

    #[test]
    fn start_transaction_fills_processor() {
        let svc = service();
        let join = start(&svc);
        assert_eq!(join.processor, "127.0.0.1:7070-1");
        assert_eq!(join.request_id, "req-1");
        assert_eq!(svc.sessions().len(), 1);
    }

    #[test]
    fn session_writes_commit() {
        let svc = service();
        let join = start(&svc);
        let insert = DbRequest::new(OpCode::Insert, "host")
            .with_join(&join)
            .with_documents(vec![doc(json!({"_id": "a"})), doc(json!({"_id": "b"}))]);
        let reply = svc.handle_db_operation(insert);
        assert!(reply.ok);
        assert_eq!(reply.count, 2);

        let commit = DbRequest::new(OpCode::Commit, "").with_join(&join);
        let reply = svc.handle_db_operation(commit);
        assert_eq!(reply.transaction.unwrap().status, TxnStatus::Committed);
        assert_eq!(svc.db().collection("host").count(&Document::new()).unwrap(), 2);
        assert!(svc.sessions().is_empty());
    }

    #[test]
    fn session_writes_abort() {
        let svc = service();
        let join = start(&svc);
        let insert = DbRequest::new(OpCode::Insert, "host")
            .with_join(&join)
            .with_documents(vec![doc(json!({"_id": "a"}))]);
        assert!(svc.handle_db_operation(insert).ok);

        let abort = DbRequest::new(OpCode::Abort, "").with_join(&join);
        let reply = svc.handle_db_operation(abort);
        assert!(reply.ok);
        assert_eq!(svc.db().collection("host").count(&Document::new()).unwrap(), 0);

        let again = DbRequest::new(OpCode::Abort, "").with_join(&join);
        assert_eq!(svc.handle_db_operation(again).message, "session not found");
    }

    #[test]
    fn data_operations_without_session() {
        let svc = service();
        let insert = DbRequest::new(OpCode::Insert, "host").with_documents(vec![
            doc(json!({"_id": "a", "env": "prod"})),
            doc(json!({"_id": "b", "env": "prod"})),
            doc(json!({"_id": "c", "env": "dev"})),
        ]);
        assert!(svc.handle_db_operation(insert).ok);

        let update = DbRequest::new(OpCode::Update, "host")
            .with_selector(doc(json!({"env": "prod"})))
            .with_update(doc(json!({"$set": {"owner": "ops"}})))
            .with_multi(true);
        let reply = svc.handle_db_operation(update);
        assert_eq!((reply.matched, reply.modified), (2, 2));

        let count = DbRequest::new(OpCode::Count, "host")
            .with_selector(doc(json!({"owner": "ops"})));
        assert_eq!(svc.handle_db_operation(count).count, 2);

        let find = DbRequest::new(OpCode::Find, "host").with_selector(doc(json!({"env": "dev"})));
        let reply = svc.handle_db_operation(find);
        assert_eq!(reply.documents.len(), 1);

        let modify = DbRequest::new(OpCode::FindAndModify, "host")
            .with_selector(doc(json!({"_id": "c"})))
            .with_update(doc(json!({"$set": {"env": "test"}})));
        let reply = svc.handle_db_operation(modify);
        assert_eq!(reply.documents[0]["env"], json!("dev"));

        let delete = DbRequest::new(OpCode::Delete, "host")
            .with_selector(doc(json!({"env": "prod"})))
            .with_multi(false);
        assert_eq!(svc.handle_db_operation(delete).count, 1);
    }

    #[test]
    fn store_errors_are_reported_in_reply() {
        let svc = service();
        let insert = || {
            DbRequest::new(OpCode::Insert, "host").with_documents(vec![doc(json!({"_id": "a"}))])
        };
        assert!(svc.handle_db_operation(insert()).ok);
        let reply = svc.handle_db_operation(insert());
        assert!(!reply.ok);
        assert!(!reply.message.is_empty());
    }

    #[test]
    fn commit_releases_locks() {
        let svc = service();
        let join = start(&svc);
        let meta = LockMeta {
            txn_id: join.txn_id.clone(),
            fingerprints: std::iter::once(txnframe_protocol::Fingerprint::new("a")).collect(),
            timeout: Duration::ZERO,
        };
        assert!(svc.locks().lock(&meta).unwrap().locked);

        let commit = DbRequest::new(OpCode::Commit, "").with_join(&join);
        assert!(svc.handle_db_operation(commit).ok);
        assert_eq!(svc.locks().transaction_count(), 0);
    }

    #[test]
    fn reap_aborts_idle_sessions() {
        let svc = service();
        let join = start(&svc);
        let insert = DbRequest::new(OpCode::Insert, "host")
            .with_join(&join)
            .with_documents(vec![doc(json!({"_id": "a"}))]);
        assert!(svc.handle_db_operation(insert).ok);

        assert_eq!(svc.reap(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(svc.reap(Duration::from_millis(10)), 1);
        assert!(svc.sessions().is_empty());
        assert_eq!(svc.db().collection("host").count(&Document::new()).unwrap(), 0);
    }

    #[test]
    fn lock_commands_reject_empty_transaction_id() {
        let svc = Arc::new(service());
        let router = svc.router();
        let codec = txnframe_protocol::Codec::Json;
        let meta = PreLockMeta {
            txn_id: TxnId::default(),
            lock_name: "/cmdb/host".into(),
            timeout: Duration::ZERO,
        };
        let payload = codec.encode(&meta).unwrap();
        assert_eq!(
            router.dispatch(command::PRE_LOCK, codec, &payload),
            Err("empty transaction id".to_string())
        );
        assert_eq!(svc.locks().pre_lock_owner("/cmdb/host"), None);
    }

    #[test]
    fn router_registers_every_command() {
        let svc = Arc::new(service());
        let router = svc.router();
        for cmd in [
            command::DB_OPERATION,
            command::PRE_LOCK,
            command::PRE_UNLOCK,
            command::LOCK,
            command::UNLOCK,
            command::SNAPSHOT,
            command::SUB_TXN_SUCCESS,
            command::NEXT_SEQUENCE,
            command::INDEXES,
            command::DROP_COLLECTION,
        ] {
            assert!(router.contains(cmd), "{cmd} not registered");
        }
    }
}
