//! Collections served by the coordinator.

use crate::driver::DocumentDriver;
use crate::error::{TxnError, TxnResult};
use std::sync::Arc;
use tracing::debug;
use txnframe_protocol::{
    command, CollectionRequest, DbRequest, DeleteResult, Document, FindAndModifyOptions,
    FindOptions, Index, JoinOption, OpCode, OpReply, TxnId, UpdateResult,
};
use txnframe_rpc::RpcClient;

/// A collection accessed through the coordinator's `DBOperation` command.
///
/// When bound to a transaction every request carries its [`JoinOption`],
/// so the coordinator runs it inside that session.
#[derive(Debug, Clone)]
pub struct RemoteCollection {
    rpc: Arc<RpcClient>,
    name: String,
    join: Option<JoinOption>,
}

impl RemoteCollection {
    pub(crate) fn new(
        rpc: Arc<RpcClient>,
        name: impl Into<String>,
        join: Option<JoinOption>,
    ) -> Self {
        Self {
            rpc,
            name: name.into(),
            join,
        }
    }

    /// The transaction this collection is bound to, if any.
    pub fn join_option(&self) -> Option<&JoinOption> {
        self.join.as_ref()
    }

    /// Updates the first match and returns it, before or after the update.
    pub async fn find_and_modify(
        &self,
        filter: &Document,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> TxnResult<Option<Document>> {
        let request = self
            .request(OpCode::FindAndModify)
            .with_selector(filter.clone())
            .with_update(update.clone())
            .with_modify_options(options);
        let reply = self.execute(request).await?;
        Ok(reply.documents.into_iter().next())
    }

    fn request(&self, op: OpCode) -> DbRequest {
        let request = DbRequest::new(op, &self.name);
        match &self.join {
            Some(join) => request.with_join(join),
            None => request,
        }
    }

    async fn update(
        &self,
        filter: &Document,
        update: &Document,
        multi: bool,
    ) -> TxnResult<UpdateResult> {
        let request = self
            .request(OpCode::Update)
            .with_selector(filter.clone())
            .with_update(update.clone())
            .with_multi(multi);
        let reply = self.execute(request).await?;
        Ok(UpdateResult {
            matched: reply.matched,
            modified: reply.modified,
        })
    }

    async fn delete(&self, filter: &Document, multi: bool) -> TxnResult<DeleteResult> {
        let request = self
            .request(OpCode::Delete)
            .with_selector(filter.clone())
            .with_multi(multi);
        let reply = self.execute(request).await?;
        Ok(DeleteResult {
            deleted: reply.count,
        })
    }

    async fn execute(&self, request: DbRequest) -> TxnResult<OpReply> {
        debug!(collection = %self.name, op = request.header.op_code, "db operation");
        let reply = call_db(&self.rpc, &request).await?;
        if reply.ok {
            Ok(reply)
        } else {
            Err(TxnError::Driver(reply.message))
        }
    }
}

pub(crate) async fn call_db(rpc: &RpcClient, request: &DbRequest) -> TxnResult<OpReply> {
    Ok(rpc.call(command::DB_OPERATION, request).await?)
}

impl DocumentDriver for RemoteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn bound_txn_id(&self) -> Option<&TxnId> {
        self.join.as_ref().map(|join| &join.txn_id)
    }

    async fn count(&self, filter: &Document) -> TxnResult<u64> {
        let request = self.request(OpCode::Count).with_selector(filter.clone());
        Ok(self.execute(request).await?.count)
    }

    async fn find(&self, filter: &Document, options: &FindOptions) -> TxnResult<Vec<Document>> {
        let request = self
            .request(OpCode::Find)
            .with_selector(filter.clone())
            .with_find_options(options.clone());
        Ok(self.execute(request).await?.documents)
    }

    async fn find_one(&self, filter: &Document) -> TxnResult<Option<Document>> {
        let options = FindOptions::new().with_limit(1);
        Ok(self.find(filter, &options).await?.into_iter().next())
    }

    async fn insert_one(&self, doc: &Document) -> TxnResult<()> {
        self.insert_many(std::slice::from_ref(doc)).await
    }

    async fn insert_many(&self, docs: &[Document]) -> TxnResult<()> {
        let request = self.request(OpCode::Insert).with_documents(docs.to_vec());
        self.execute(request).await?;
        Ok(())
    }

    async fn update_one(&self, filter: &Document, update: &Document) -> TxnResult<UpdateResult> {
        self.update(filter, update, false).await
    }

    async fn update_many(&self, filter: &Document, update: &Document) -> TxnResult<UpdateResult> {
        self.update(filter, update, true).await
    }

    async fn delete_one(&self, filter: &Document) -> TxnResult<DeleteResult> {
        self.delete(filter, false).await
    }

    async fn delete_many(&self, filter: &Document) -> TxnResult<DeleteResult> {
        self.delete(filter, true).await
    }

    async fn drop_collection(&self) -> TxnResult<()> {
        let request = CollectionRequest {
            collection: self.name.clone(),
        };
        Ok(self.rpc.call(command::DROP_COLLECTION, &request).await?)
    }

    async fn indexes(&self) -> TxnResult<Vec<Index>> {
        let request = CollectionRequest {
            collection: self.name.clone(),
        };
        Ok(self.rpc.call(command::INDEXES, &request).await?)
    }
}
