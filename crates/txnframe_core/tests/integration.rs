//! End-to-end scenarios for transactional collections.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use txnframe_coordinator::{Coordinator, CoordinatorConfig, TxnService};
use txnframe_core::{
    Context, DalClient, DalConfig, DocumentDriver, LocalDriver, MockTxnClient, TxnCollection,
    TxnConfig, TxnError, TxnOp,
};
use txnframe_protocol::{
    Document, Fingerprint, FindAndModifyOptions, FindOptions, JoinOption, PreLockMeta,
    PreUnlockMeta, TxnId, TxnStatus,
};
use txnframe_store::{DocCollection, MemoryCollection, MemoryDatabase};

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("not a document: {other}"),
    }
}

struct Running {
    addr: SocketAddr,
    service: Arc<TxnService>,
    _stop: oneshot::Sender<()>,
}

async fn start_coordinator() -> Running {
    let config = CoordinatorConfig::new("127.0.0.1:0".parse().unwrap());
    let coordinator = Coordinator::bind(config).await.unwrap();
    let addr = coordinator.local_addr();
    let service = Arc::clone(coordinator.service());
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(coordinator.serve(async move {
        let _ = stopped.await;
    }));
    Running {
        addr,
        service,
        _stop: stop,
    }
}

fn dal_config(addr: SocketAddr) -> DalConfig {
    DalConfig::new(addr.to_string()).with_txn(
        TxnConfig::new()
            .with_lock_timeout(Duration::from_millis(100))
            .with_release_timeout(Duration::from_secs(1)),
    )
}

fn mock_collection(
    name: &str,
) -> (
    Arc<MockTxnClient>,
    MemoryDatabase,
    TxnCollection<MockTxnClient, LocalDriver<MemoryCollection>>,
) {
    let client = Arc::new(MockTxnClient::new());
    let db = MemoryDatabase::new("cmdb");
    let coll = TxnCollection::new(
        Arc::clone(&client),
        LocalDriver::new(db.collection(name)),
        TxnConfig::default(),
    );
    (client, db, coll)
}

// ---- lock protocol against a recording client ----

#[tokio::test]
async fn insert_one_prelocks_collection_path() {
    let (client, _db, coll) = mock_collection("uri_test");
    coll.insert_one(
        &Context::background(),
        &TxnId::new("txn-1"),
        &doc(json!({"uri": "/x"})),
    )
    .await
    .unwrap();

    assert_eq!(
        client.ops(),
        vec![
            TxnOp::PreLock,
            TxnOp::Lock,
            TxnOp::PreUnlock,
            TxnOp::Snapshot,
            TxnOp::SubTxnSuccess
        ]
    );
    match &client.calls()[0] {
        txnframe_core::TxnCall::PreLock(meta) => {
            assert_eq!(meta.txn_id, TxnId::new("txn-1"));
            assert_eq!(meta.lock_name, "/cmdb/uri_test");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn empty_transaction_id_makes_no_calls() {
    let (client, _db, coll) = mock_collection("host");
    let err = coll
        .delete_many(&Context::background(), &TxnId::new(""), &Document::new())
        .await
        .unwrap_err();
    assert_eq!(err, TxnError::EmptyTransactionId);
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn failure_at_each_step_keeps_the_protocol() {
    use TxnOp::*;
    let all = vec![PreLock, Lock, PreUnlock, Snapshot, SubTxnSuccess];
    let cases: Vec<(Option<TxnOp>, Vec<TxnOp>, bool)> = vec![
        (None, all.clone(), true),
        (Some(PreLock), vec![PreLock], false),
        (Some(Lock), vec![PreLock, Lock, PreUnlock], false),
        (Some(PreUnlock), vec![PreLock, Lock, PreUnlock], false),
        (Some(Snapshot), vec![PreLock, Lock, PreUnlock, Snapshot], false),
        (Some(SubTxnSuccess), all.clone(), true),
    ];

    for (failing, expected, applied) in cases {
        let (client, db, coll) = mock_collection("host");
        if let Some(op) = failing {
            client.fail(op, TxnError::Remote("injected".into()));
        }
        let result = coll
            .insert_one(
                &Context::background(),
                &TxnId::new("t"),
                &doc(json!({"_id": "a"})),
            )
            .await;

        assert_eq!(result.is_ok(), failing.is_none(), "case {failing:?}");
        assert_eq!(client.ops(), expected, "case {failing:?}");
        let stored = db.collection("host").count(&Document::new()).unwrap();
        assert_eq!(stored == 1, applied, "case {failing:?}");
    }
}

#[tokio::test]
async fn driver_failure_is_not_reported_successful() {
    let (client, db, coll) = mock_collection("host");
    db.collection("host")
        .insert_one(doc(json!({"_id": "a"})))
        .unwrap();
    let err = coll
        .insert_one(
            &Context::background(),
            &TxnId::new("t"),
            &doc(json!({"_id": "a"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TxnError::Driver(_)));
    assert_eq!(client.count(TxnOp::Snapshot), 1);
    assert_eq!(client.count(TxnOp::SubTxnSuccess), 0);
}

// ---- against a running coordinator ----

#[tokio::test]
async fn transactional_update_records_snapshot_on_coordinator() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ctx = Context::background();

    dal.collection("host")
        .insert_one(&doc(json!({"_id": "h1", "ip": "10.0.0.1"})))
        .await
        .unwrap();

    let hosts = dal.txn_collection("host");
    assert_eq!(hosts.pre_lock_name(), "/cmdb/host");
    let txn_id = TxnId::new("txn-upd");
    let result = hosts
        .update_one(
            &ctx,
            &txn_id,
            &doc(json!({"_id": "h1"})),
            &doc(json!({"$set": {"ip": "10.0.0.2"}})),
        )
        .await
        .unwrap();
    assert_eq!(result.modified, 1);

    let locks = running.service.locks();
    assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);
    assert_eq!(
        locks.fingerprint_owner(&Fingerprint::new("h1")),
        Some(txn_id.clone())
    );
    assert!(locks.release_transaction(&txn_id).is_empty());

    let stored = hosts
        .find_one(&ctx, &doc(json!({"_id": "h1"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["ip"], json!("10.0.0.2"));
}

#[tokio::test]
async fn other_transaction_is_refused_locked_documents() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ctx = Context::background();
    dal.collection("host")
        .insert_many(&[doc(json!({"_id": "h1"})), doc(json!({"_id": "h2"}))])
        .await
        .unwrap();

    let hosts = dal.txn_collection("host");
    hosts
        .update_one(
            &ctx,
            &TxnId::new("owner"),
            &doc(json!({"_id": "h1"})),
            &doc(json!({"$set": {"owner": true}})),
        )
        .await
        .unwrap();

    let err = hosts
        .update_many(
            &ctx,
            &TxnId::new("intruder"),
            &Document::new(),
            &doc(json!({"$set": {"seen": true}})),
        )
        .await
        .unwrap_err();
    assert!(err.is_contention(), "{err}");
    let untouched = hosts
        .find_one(&ctx, &doc(json!({"_id": "h2"})))
        .await
        .unwrap()
        .unwrap();
    assert!(untouched.get("seen").is_none());
    assert_eq!(running.service.locks().pre_lock_owner("/cmdb/host"), None);

    // The owner shares its own fingerprints.
    hosts
        .update_many(
            &ctx,
            &TxnId::new("owner"),
            &Document::new(),
            &doc(json!({"$set": {"seen": true}})),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_writers_serialize_on_prelock() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();

    // One client per writer: requests on one connection are served in order.
    let mut tasks = Vec::new();
    for i in 0..8 {
        let dal = DalClient::new(dal_config(running.addr));
        tasks.push(tokio::spawn(async move {
            let hosts = dal.txn_collection("host");
            hosts
                .insert_one(
                    &Context::background(),
                    &TxnId::new(format!("txn-{i}")),
                    &doc(json!({"_id": format!("h{i}")})),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let count = dal.collection("host").count(&Document::new()).await.unwrap();
    assert_eq!(count, 8);
    assert_eq!(running.service.locks().pre_lock_owner("/cmdb/host"), None);
}

#[tokio::test]
async fn expired_prelock_wait_leaves_no_prelock() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let locks = running.service.locks();
    let blocker = TxnId::new("blocker");
    assert!(locks.pre_lock(&PreLockMeta {
        txn_id: blocker.clone(),
        lock_name: "/cmdb/host".into(),
        timeout: Duration::ZERO,
    })
    .unwrap());

    let ctx = Context::with_timeout(Duration::from_millis(30));
    let err = dal
        .txn_collection("host")
        .insert_one(&ctx, &TxnId::new("t"), &doc(json!({"_id": "a"})))
        .await
        .unwrap_err();
    assert_eq!(err, TxnError::DeadlineExceeded);

    // Let the coordinator finish the abandoned wait.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(locks.pre_lock_owner("/cmdb/host"), Some(blocker.clone()));
    locks.pre_unlock(&PreUnlockMeta {
        txn_id: blocker,
        lock_name: "/cmdb/host".into(),
    });
    assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);
    assert_eq!(dal.collection("host").count(&Document::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_context_never_mutates() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();

    let err = dal
        .txn_collection("host")
        .insert_one(&ctx, &TxnId::new("t"), &doc(json!({"_id": "a"})))
        .await
        .unwrap_err();
    assert_eq!(err, TxnError::Cancelled);
    assert_eq!(running.service.locks().pre_lock_owner("/cmdb/host"), None);
    assert_eq!(dal.collection("host").count(&Document::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn session_commit_and_abort() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ctx = Context::background();

    let tx = dal
        .start_transaction(&ctx, JoinOption::new("", "req-1", ""))
        .await
        .unwrap();
    assert!(!tx.txn_id().is_empty());
    tx.collection("host")
        .insert_one(&doc(json!({"_id": "kept"})))
        .await
        .unwrap();
    let committed = tx.commit(&ctx).await.unwrap();
    assert_eq!(committed.status, TxnStatus::Committed);
    assert_eq!(committed.request_id, "req-1");

    let tx = dal.start_transaction(&ctx, JoinOption::default()).await.unwrap();
    let resumed = dal.join_transaction(tx.join_option().clone());
    resumed
        .collection("host")
        .insert_one(&doc(json!({"_id": "dropped"})))
        .await
        .unwrap();
    assert_eq!(tx.abort(&ctx).await.unwrap().status, TxnStatus::Aborted);

    let ids: Vec<Value> = dal
        .collection("host")
        .find(&Document::new(), &FindOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d["_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("kept")]);
    assert!(running.service.sessions().is_empty());

    let err = tx.commit(&ctx).await.unwrap_err();
    assert_eq!(err, TxnError::Remote("session not found".into()));
}

#[tokio::test]
async fn session_txn_collection_abort_undoes_locked_writes() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ctx = Context::background();
    let locks = running.service.locks();

    let tx = dal.start_transaction(&ctx, JoinOption::default()).await.unwrap();
    let hosts = tx.txn_collection("host");
    assert_eq!(hosts.pre_lock_name(), "/cmdb/host");
    hosts
        .insert_one(&ctx, tx.txn_id(), &doc(json!({"_id": "dropped"})))
        .await
        .unwrap();
    assert_eq!(locks.transaction_count(), 1);

    let err = hosts
        .insert_one(&ctx, &TxnId::new("made-up"), &doc(json!({"_id": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, TxnError::TransactionMismatch { .. }), "{err}");
    assert!(err.is_usage_error());

    assert_eq!(tx.abort(&ctx).await.unwrap().status, TxnStatus::Aborted);
    assert_eq!(dal.collection("host").count(&Document::new()).await.unwrap(), 0);
    assert_eq!(locks.transaction_count(), 0);
    assert_eq!(locks.pre_lock_owner("/cmdb/host"), None);

    let tx = dal.start_transaction(&ctx, JoinOption::default()).await.unwrap();
    tx.txn_collection("host")
        .insert_one(&ctx, tx.txn_id(), &doc(json!({"uri": "/kept"})))
        .await
        .unwrap();
    assert_eq!(tx.commit(&ctx).await.unwrap().status, TxnStatus::Committed);

    let kept = dal
        .collection("host")
        .find(&Document::new(), &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0]["uri"], json!("/kept"));
    assert!(kept[0]["_id"].is_string());
    assert_eq!(locks.transaction_count(), 0);
    assert!(running.service.sessions().is_empty());
}

#[tokio::test]
async fn unknown_session_is_a_driver_error() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ghost = dal.join_transaction(JoinOption::new("no-such-txn", "", ""));
    let err = ghost
        .collection("host")
        .insert_one(&doc(json!({"_id": "a"})))
        .await
        .unwrap_err();
    assert_eq!(err, TxnError::Driver("session not found".into()));
}

#[tokio::test]
async fn remote_collection_surface() {
    let running = start_coordinator().await;
    let dal = DalClient::connect(dal_config(running.addr)).await.unwrap();
    let ctx = Context::background();
    let hosts = dal.collection("host");

    assert_eq!(dal.next_sequence(&ctx, "host_id").await.unwrap(), 1);
    assert_eq!(dal.next_sequence(&ctx, "host_id").await.unwrap(), 2);

    hosts
        .insert_many(&[
            doc(json!({"_id": "a", "n": 1})),
            doc(json!({"_id": "b", "n": 2})),
        ])
        .await
        .unwrap();
    let modified = hosts
        .find_and_modify(
            &doc(json!({"_id": "a"})),
            &doc(json!({"$inc": {"n": 10}})),
            FindAndModifyOptions {
                upsert: false,
                return_new: true,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(modified["n"], json!(11));
    assert_eq!(hosts.delete_many(&Document::new()).await.unwrap().deleted, 2);
    assert!(hosts.indexes().await.unwrap().is_empty());
    hosts.drop_collection().await.unwrap();

    dal.ping().await.unwrap();
    dal.close().await.unwrap();
}
