//! Transactional collection wrapper.

use crate::client::TxnClient;
use crate::config::TxnConfig;
use crate::context::Context;
use crate::driver::DocumentDriver;
use crate::error::{TxnError, TxnResult};
use crate::txn::{Preparation, Txn};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use txnframe_protocol::{
    DeleteResult, Document, FindOptions, Index, RollbackKind, TxnId, UpdateResult, ID_FIELD,
};

/// A collection whose mutations run as sub-transactions of a caller-supplied
/// transaction.
///
/// Reads and `drop_collection` go straight to the driver. Every insert,
/// update or delete takes the collection prelock `/<db>/<collection>`,
/// snapshots the affected documents, locks their ids and only then mutates.
///
/// | Operation | Rollback kind | `before` | `after` |
/// |---|---|---|---|
/// | `insert_one` | `InsertOne` | null | the document |
/// | `insert_many` | `InsertMany` | null | the documents |
/// | `update_one` | `UpdateOne` | first match | null |
/// | `update_many` | `UpdateMany` | all matches | the update |
/// | `delete_one` | `DeleteOne` | first match | null |
/// | `delete_many` | `DeleteMany` | all matches | null |
#[derive(Debug)]
pub struct TxnCollection<C, D> {
    client: Arc<C>,
    driver: D,
    config: TxnConfig,
    pre_lock_name: String,
}

impl<C: TxnClient, D: DocumentDriver> TxnCollection<C, D> {
    /// Wraps `driver`, coordinating through `client`.
    pub fn new(client: Arc<C>, driver: D, config: TxnConfig) -> Self {
        let pre_lock_name = config.pre_lock_name(driver.name());
        Self {
            client,
            driver,
            config,
            pre_lock_name,
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Prelock path serializing writers of this collection.
    pub fn pre_lock_name(&self) -> &str {
        &self.pre_lock_name
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Counts documents matching `filter`.
    pub async fn count(&self, ctx: &Context, filter: &Document) -> TxnResult<u64> {
        ctx.run(self.driver.count(filter)).await
    }

    /// Returns documents matching `filter`.
    pub async fn find(
        &self,
        ctx: &Context,
        filter: &Document,
        options: &FindOptions,
    ) -> TxnResult<Vec<Document>> {
        ctx.run(self.driver.find(filter, options)).await
    }

    /// Returns the first document matching `filter`.
    pub async fn find_one(&self, ctx: &Context, filter: &Document) -> TxnResult<Option<Document>> {
        ctx.run(self.driver.find_one(filter)).await
    }

    /// Drops the collection. Not transactional.
    pub async fn drop_collection(&self, ctx: &Context) -> TxnResult<()> {
        ctx.run(self.driver.drop_collection()).await
    }

    /// Lists index metadata.
    pub async fn indexes(&self, ctx: &Context) -> TxnResult<Vec<Index>> {
        ctx.run(self.driver.indexes()).await
    }

    /// Inserts one document within `txn_id`.
    ///
    /// A missing `_id` is generated here so the snapshot records the id
    /// the driver stores.
    pub async fn insert_one(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        doc: &Document,
    ) -> TxnResult<()> {
        let doc = &with_id(doc);
        self.run(
            ctx,
            txn_id,
            || async {
                Ok(Preparation::new(
                    RollbackKind::InsertOne,
                    Value::Null,
                    Value::Object(doc.clone()),
                ))
            },
            || self.driver.insert_one(doc),
        )
        .await
    }

    /// Inserts documents within `txn_id`.
    pub async fn insert_many(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        docs: &[Document],
    ) -> TxnResult<()> {
        let docs: Vec<Document> = docs.iter().map(with_id).collect();
        self.run(
            ctx,
            txn_id,
            || async {
                Ok(Preparation::new(
                    RollbackKind::InsertMany,
                    Value::Null,
                    documents(docs.clone()),
                ))
            },
            || self.driver.insert_many(&docs),
        )
        .await
    }

    /// Updates the first document matching `filter` within `txn_id`.
    pub async fn update_one(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        filter: &Document,
        update: &Document,
    ) -> TxnResult<UpdateResult> {
        self.run(
            ctx,
            txn_id,
            || async {
                let before = self.driver.find_one(filter).await?;
                Ok(Preparation::new(
                    RollbackKind::UpdateOne,
                    before.map_or(Value::Null, Value::Object),
                    Value::Null,
                ))
            },
            || self.driver.update_one(filter, update),
        )
        .await
    }

    /// Updates every document matching `filter` within `txn_id`.
    pub async fn update_many(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        filter: &Document,
        update: &Document,
    ) -> TxnResult<UpdateResult> {
        self.run(
            ctx,
            txn_id,
            || async {
                let before = self.driver.find(filter, &FindOptions::new()).await?;
                Ok(Preparation::new(
                    RollbackKind::UpdateMany,
                    documents(before),
                    Value::Object(update.clone()),
                ))
            },
            || self.driver.update_many(filter, update),
        )
        .await
    }

    /// Deletes the first document matching `filter` within `txn_id`.
    pub async fn delete_one(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        filter: &Document,
    ) -> TxnResult<DeleteResult> {
        self.run(
            ctx,
            txn_id,
            || async {
                let before = self.driver.find_one(filter).await?;
                Ok(Preparation::new(
                    RollbackKind::DeleteOne,
                    before.map_or(Value::Null, Value::Object),
                    Value::Null,
                ))
            },
            || self.driver.delete_one(filter),
        )
        .await
    }

    /// Deletes every document matching `filter` within `txn_id`.
    pub async fn delete_many(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        filter: &Document,
    ) -> TxnResult<DeleteResult> {
        self.run(
            ctx,
            txn_id,
            || async {
                let before = self.driver.find(filter, &FindOptions::new()).await?;
                Ok(Preparation::new(
                    RollbackKind::DeleteMany,
                    documents(before),
                    Value::Null,
                ))
            },
            || self.driver.delete_many(filter),
        )
        .await
    }

    async fn run<T, P, PFut, M, MFut>(
        &self,
        ctx: &Context,
        txn_id: &TxnId,
        prepare: P,
        mutate: M,
    ) -> TxnResult<T>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = TxnResult<Preparation>>,
        M: FnOnce() -> MFut,
        MFut: Future<Output = TxnResult<T>>,
    {
        if txn_id.is_empty() {
            return Err(TxnError::EmptyTransactionId);
        }
        if let Some(bound) = self.driver.bound_txn_id() {
            if bound != txn_id {
                return Err(TxnError::TransactionMismatch {
                    bound: bound.to_string(),
                    requested: txn_id.to_string(),
                });
            }
        }
        let mut txn = Txn::new(self.client.as_ref(), &self.config);
        txn.try_acquire(ctx, txn_id, &self.pre_lock_name).await?;
        txn.prepare(prepare).await?;
        txn.commit(mutate).await
    }
}

fn with_id(doc: &Document) -> Document {
    let mut doc = doc.clone();
    if !matches!(doc.get(ID_FIELD), Some(id) if !id.is_null()) {
        let id = uuid::Uuid::new_v4().simple().to_string();
        doc.insert(ID_FIELD.to_string(), Value::String(id));
    }
    doc
}

fn documents(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(Value::Object).collect())
}
