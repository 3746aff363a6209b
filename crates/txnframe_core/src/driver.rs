//! Async document driver abstraction.

use crate::error::TxnResult;
use std::future::Future;
use txnframe_protocol::{DeleteResult, Document, FindOptions, Index, TxnId, UpdateResult};
use txnframe_store::DocCollection;

/// Collection operations a [`TxnCollection`](crate::TxnCollection) builds on.
///
/// # Implementors
///
/// - [`LocalDriver`] - any in-process [`DocCollection`]
/// - [`RemoteCollection`](crate::RemoteCollection) - a collection served by the coordinator
pub trait DocumentDriver: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Transaction every request of this driver runs in, if it is bound to one.
    fn bound_txn_id(&self) -> Option<&TxnId> {
        None
    }

    /// Counts documents matching `filter`.
    fn count(&self, filter: &Document) -> impl Future<Output = TxnResult<u64>> + Send;

    /// Returns documents matching `filter`.
    fn find(
        &self,
        filter: &Document,
        options: &FindOptions,
    ) -> impl Future<Output = TxnResult<Vec<Document>>> + Send;

    /// Returns the first document matching `filter`.
    fn find_one(&self, filter: &Document)
        -> impl Future<Output = TxnResult<Option<Document>>> + Send;

    /// Inserts one document.
    fn insert_one(&self, doc: &Document) -> impl Future<Output = TxnResult<()>> + Send;

    /// Inserts documents in order.
    fn insert_many(&self, docs: &[Document]) -> impl Future<Output = TxnResult<()>> + Send;

    /// Updates the first document matching `filter`.
    fn update_one(
        &self,
        filter: &Document,
        update: &Document,
    ) -> impl Future<Output = TxnResult<UpdateResult>> + Send;

    /// Updates every document matching `filter`.
    fn update_many(
        &self,
        filter: &Document,
        update: &Document,
    ) -> impl Future<Output = TxnResult<UpdateResult>> + Send;

    /// Deletes the first document matching `filter`.
    fn delete_one(&self, filter: &Document) -> impl Future<Output = TxnResult<DeleteResult>> + Send;

    /// Deletes every document matching `filter`.
    fn delete_many(&self, filter: &Document)
        -> impl Future<Output = TxnResult<DeleteResult>> + Send;

    /// Drops the collection.
    fn drop_collection(&self) -> impl Future<Output = TxnResult<()>> + Send;

    /// Lists index metadata.
    fn indexes(&self) -> impl Future<Output = TxnResult<Vec<Index>>> + Send;
}

/// Adapts a synchronous in-process [`DocCollection`] to [`DocumentDriver`].
#[derive(Debug, Clone)]
pub struct LocalDriver<C> {
    inner: C,
}

impl<C: DocCollection> LocalDriver<C> {
    /// Wraps a collection.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// The wrapped collection.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: DocCollection> DocumentDriver for LocalDriver<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn count(&self, filter: &Document) -> TxnResult<u64> {
        Ok(self.inner.count(filter)?)
    }

    async fn find(&self, filter: &Document, options: &FindOptions) -> TxnResult<Vec<Document>> {
        Ok(self.inner.find(filter, options)?)
    }

    async fn find_one(&self, filter: &Document) -> TxnResult<Option<Document>> {
        Ok(self.inner.find_one(filter)?)
    }

    async fn insert_one(&self, doc: &Document) -> TxnResult<()> {
        self.inner.insert_one(doc.clone())?;
        Ok(())
    }

    async fn insert_many(&self, docs: &[Document]) -> TxnResult<()> {
        self.inner.insert_many(docs.to_vec())?;
        Ok(())
    }

    async fn update_one(&self, filter: &Document, update: &Document) -> TxnResult<UpdateResult> {
        Ok(self.inner.update_one(filter, update)?)
    }

    async fn update_many(&self, filter: &Document, update: &Document) -> TxnResult<UpdateResult> {
        Ok(self.inner.update_many(filter, update)?)
    }

    async fn delete_one(&self, filter: &Document) -> TxnResult<DeleteResult> {
        Ok(self.inner.delete_one(filter)?)
    }

    async fn delete_many(&self, filter: &Document) -> TxnResult<DeleteResult> {
        Ok(self.inner.delete_many(filter)?)
    }

    async fn drop_collection(&self) -> TxnResult<()> {
        Ok(self.inner.drop_collection()?)
    }

    async fn indexes(&self) -> TxnResult<Vec<Index>> {
        Ok(self.inner.indexes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txnframe_store::MemoryDatabase;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn local_driver_delegates() {
        let db = MemoryDatabase::new("cmdb");
        let driver = LocalDriver::new(db.collection("host"));
        assert_eq!(driver.name(), "host");

        driver
            .insert_many(&[doc(json!({"_id": "a", "n": 1})), doc(json!({"_id": "b", "n": 2}))])
            .await
            .unwrap();
        assert_eq!(driver.count(&Document::new()).await.unwrap(), 2);

        let updated = driver
            .update_one(&doc(json!({"_id": "a"})), &doc(json!({"$inc": {"n": 10}})))
            .await
            .unwrap();
        assert_eq!(updated.modified, 1);
        let a = driver.find_one(&doc(json!({"_id": "a"}))).await.unwrap().unwrap();
        assert_eq!(a["n"], json!(11));

        let deleted = driver.delete_many(&Document::new()).await.unwrap();
        assert_eq!(deleted.deleted, 2);
    }

    #[tokio::test]
    async fn store_errors_surface_as_driver_errors() {
        let db = MemoryDatabase::new("cmdb");
        let driver = LocalDriver::new(db.collection("host"));
        driver.insert_one(&doc(json!({"_id": "a"}))).await.unwrap();
        let err = driver.insert_one(&doc(json!({"_id": "a"}))).await.unwrap_err();
        assert!(matches!(err, crate::TxnError::Driver(_)));
    }
}
