//! Data access client for a remote coordinator.

use crate::client::RpcTxnClient;
use crate::collection::TxnCollection;
use crate::config::{DalConfig, TxnConfig};
use crate::context::Context;
use crate::error::{TxnError, TxnResult};
use crate::remote::{call_db, RemoteCollection};
use std::sync::Arc;
use tracing::info;
use txnframe_protocol::{
    command, DbRequest, JoinOption, OpCode, SequenceRequest, Transaction, TxnId,
};
use txnframe_rpc::RpcClient;

/// Entry point for applications talking to a coordinator.
///
/// Clones share one connection, and the coordinator serves the requests
/// of one connection in order. Writers that may wait on each other's
/// locks need separate clients.
///
/// ```no_run
/// use txnframe_core::{Context, DalClient, DalConfig};
/// use txnframe_protocol::JoinOption;
///
/// # async fn demo() -> txnframe_core::TxnResult<()> {
/// let dal = DalClient::connect(DalConfig::new("127.0.0.1:7070")).await?;
/// let ctx = Context::background();
/// let tx = dal.start_transaction(&ctx, JoinOption::default()).await?;
/// let hosts = tx.collection("host");
/// tx.commit(&ctx).await?;
/// # let _ = hosts;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DalClient {
    rpc: Arc<RpcClient>,
    txn_client: Arc<RpcTxnClient>,
    config: DalConfig,
}

impl DalClient {
    /// Creates a client that connects on first use.
    pub fn new(config: DalConfig) -> Self {
        let rpc = Arc::new(RpcClient::new(config.addr.clone(), config.rpc.clone()));
        let txn_client = Arc::new(RpcTxnClient::new(Arc::clone(&rpc)));
        Self {
            rpc,
            txn_client,
            config,
        }
    }

    /// Creates a client and checks the coordinator answers.
    pub async fn connect(config: DalConfig) -> TxnResult<Self> {
        let client = Self::new(config);
        client.ping().await?;
        Ok(client)
    }

    /// Client configuration.
    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    /// A non-transactional collection.
    pub fn collection(&self, name: &str) -> RemoteCollection {
        RemoteCollection::new(Arc::clone(&self.rpc), name, None)
    }

    /// A collection whose mutations are coordinated through the lock service.
    ///
    /// Writes apply directly and stay in place if the caller's transaction
    /// is later abandoned. Use [`TxDalClient::txn_collection`] to have
    /// an abort undo them.
    pub fn txn_collection(&self, name: &str) -> TxnCollection<RpcTxnClient, RemoteCollection> {
        TxnCollection::new(
            Arc::clone(&self.txn_client),
            self.collection(name),
            self.config.txn.clone(),
        )
    }

    /// Starts a coordinator session and returns a client bound to it.
    ///
    /// `option.txn_id` is ignored; the coordinator mints the id. An empty
    /// `option.processor` is replaced by this client's processor tag.
    pub async fn start_transaction(
        &self,
        ctx: &Context,
        option: JoinOption,
    ) -> TxnResult<TxDalClient> {
        let processor = if option.processor.is_empty() {
            self.config.processor.clone()
        } else {
            option.processor
        };
        let mut request = DbRequest::new(OpCode::StartTransaction, "");
        request.header.request_id = option.request_id;
        request.header.processor = processor;

        let reply = ctx.run(call_db(&self.rpc, &request)).await?;
        if !reply.ok {
            return Err(TxnError::Remote(reply.message));
        }
        let transaction = reply
            .transaction
            .ok_or_else(|| TxnError::Remote("reply carries no transaction".to_string()))?;
        info!(txn_id = %transaction.txn_id, processor = %transaction.processor, "transaction started");
        Ok(self.join_transaction(transaction.join_option()))
    }

    /// Resumes an existing transaction without contacting the coordinator.
    pub fn join_transaction(&self, option: JoinOption) -> TxDalClient {
        TxDalClient {
            rpc: Arc::clone(&self.rpc),
            txn_client: Arc::clone(&self.txn_client),
            txn: self.config.txn.clone(),
            join: option,
        }
    }

    /// Allocates the next value of sequence `name`.
    pub async fn next_sequence(&self, ctx: &Context, name: &str) -> TxnResult<u64> {
        let request = SequenceRequest {
            name: name.to_string(),
        };
        ctx.run(async { Ok(self.rpc.call(command::NEXT_SEQUENCE, &request).await?) })
            .await
    }

    /// Checks the coordinator answers.
    pub async fn ping(&self) -> TxnResult<()> {
        Ok(self.rpc.ping().await?)
    }

    /// Closes the connection.
    pub async fn close(&self) -> TxnResult<()> {
        Ok(self.rpc.close().await?)
    }
}

/// Client bound to one coordinator session.
#[derive(Debug, Clone)]
pub struct TxDalClient {
    rpc: Arc<RpcClient>,
    txn_client: Arc<RpcTxnClient>,
    txn: TxnConfig,
    join: JoinOption,
}

impl TxDalClient {
    /// Transaction id.
    pub fn txn_id(&self) -> &TxnId {
        &self.join.txn_id
    }

    /// Options another process needs to join this transaction.
    pub fn join_option(&self) -> &JoinOption {
        &self.join
    }

    /// A collection whose operations run inside this transaction.
    pub fn collection(&self, name: &str) -> RemoteCollection {
        RemoteCollection::new(Arc::clone(&self.rpc), name, Some(self.join.clone()))
    }

    /// A lock-coordinated collection whose writes run inside this session.
    ///
    /// Mutations must pass [`txn_id`](Self::txn_id); any other id fails
    /// with [`TxnError::TransactionMismatch`]. Aborting the session undoes
    /// the writes and releases their locks.
    pub fn txn_collection(&self, name: &str) -> TxnCollection<RpcTxnClient, RemoteCollection> {
        TxnCollection::new(
            Arc::clone(&self.txn_client),
            self.collection(name),
            self.txn.clone(),
        )
    }

    /// Commits the session.
    pub async fn commit(&self, ctx: &Context) -> TxnResult<Transaction> {
        self.finish(ctx, OpCode::Commit).await
    }

    /// Aborts the session, undoing its writes.
    pub async fn abort(&self, ctx: &Context) -> TxnResult<Transaction> {
        self.finish(ctx, OpCode::Abort).await
    }

    async fn finish(&self, ctx: &Context, op: OpCode) -> TxnResult<Transaction> {
        let request = DbRequest::new(op, "").with_join(&self.join);
        let reply = ctx.run(call_db(&self.rpc, &request)).await?;
        if !reply.ok {
            return Err(TxnError::Remote(reply.message));
        }
        let transaction = reply
            .transaction
            .ok_or_else(|| TxnError::Remote("reply carries no transaction".to_string()))?;
        info!(txn_id = %transaction.txn_id, status = ?transaction.status, "transaction finished");
        Ok(transaction)
    }
}
