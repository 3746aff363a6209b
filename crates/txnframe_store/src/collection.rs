//! Document collection driver trait.

use crate::error::StoreResult;
use serde_json::Value;
use txnframe_protocol::{
    DeleteResult, Document, FindAndModifyOptions, FindOptions, Index, UpdateResult,
};

/// Operations a document database driver offers on one collection.
///
/// The coordinator executes every data opcode through this trait, either
/// on a plain collection or on a collection bound to a session
/// transaction.
///
/// # Implementors
///
/// - [`crate::MemoryCollection`] - non-transactional access
/// - [`crate::SessionCollection`] - access inside a session transaction
pub trait DocCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Counts documents matching `filter`.
    fn count(&self, filter: &Document) -> StoreResult<u64>;

    /// Returns documents matching `filter`.
    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        let options = FindOptions::new().with_limit(1);
        Ok(self.find(filter, &options)?.into_iter().next())
    }

    /// Inserts one document, assigning an `_id` if it has none. Returns the id.
    fn insert_one(&self, doc: Document) -> StoreResult<Value>;

    /// Inserts documents in order, stopping at the first failure.
    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<Vec<Value>>;

    /// Updates the first document matching `filter`.
    fn update_one(&self, filter: &Document, update: &Document) -> StoreResult<UpdateResult>;

    /// Updates every document matching `filter`. Either all matches are
    /// updated or none.
    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<UpdateResult>;

    /// Deletes the first document matching `filter`.
    fn delete_one(&self, filter: &Document) -> StoreResult<DeleteResult>;

    /// Deletes every document matching `filter`.
    fn delete_many(&self, filter: &Document) -> StoreResult<DeleteResult>;

    /// Updates the first match and returns it, before or after the update.
    fn find_and_modify(
        &self,
        filter: &Document,
        update: &Document,
        options: FindAndModifyOptions,
    ) -> StoreResult<Option<Document>>;

    /// Removes the collection with all its documents and indexes.
    fn drop_collection(&self) -> StoreResult<()>;

    /// Lists index metadata.
    fn indexes(&self) -> StoreResult<Vec<Index>>;

    /// Adds or replaces an index by name.
    fn create_index(&self, index: Index) -> StoreResult<()>;
}
