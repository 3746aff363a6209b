//! In-memory document database.

use crate::collection::DocCollection;
use crate::error::{StoreError, StoreResult};
use crate::filter::{lookup, matches, sort_cmp, values_equal};
use crate::session::MemorySession;
use crate::update::apply_update;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use txnframe_protocol::{
    DeleteResult, Document, FindAndModifyOptions, FindOptions, Index, SortOrder, UpdateResult,
    ID_FIELD,
};

/// A mutation applied to a collection, kept so that it can be undone.
#[derive(Debug)]
pub(crate) enum Change {
    Inserted { id: Value },
    Updated { before: Document },
    Deleted { position: usize, doc: Document },
    IndexChanged { name: String, previous: Option<Index> },
    Dropped { data: CollectionData },
}

/// Documents and index metadata of one collection, in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<Index>,
}

impl CollectionData {
    fn position_of(&self, id: &Value) -> Option<usize> {
        self.docs
            .iter()
            .position(|d| d.get(ID_FIELD).is_some_and(|v| values_equal(v, id)))
    }

    fn matching(&self, filter: &Document) -> StoreResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (i, doc) in self.docs.iter().enumerate() {
            if matches(doc, filter)? {
                positions.push(i);
            }
        }
        Ok(positions)
    }

    pub(crate) fn count(&self, filter: &Document) -> StoreResult<u64> {
        Ok(self.matching(filter)?.len() as u64)
    }

    pub(crate) fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        let mut found: Vec<&Document> = self
            .matching(filter)?
            .into_iter()
            .map(|i| &self.docs[i])
            .collect();
        if !options.sort.is_empty() {
            found.sort_by(|a, b| {
                for key in &options.sort {
                    let ordering = sort_cmp(lookup(a, &key.field), lookup(b, &key.field));
                    let ordering = match key.order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| project(doc, &options.fields))
            .collect())
    }

    pub(crate) fn insert(
        &mut self,
        collection: &str,
        mut doc: Document,
        changes: &mut Vec<Change>,
    ) -> StoreResult<Value> {
        let id = match doc.get(ID_FIELD) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = Value::String(uuid::Uuid::new_v4().simple().to_string());
                doc.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        if self.position_of(&id).is_some() {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.docs.push(doc);
        changes.push(Change::Inserted { id: id.clone() });
        Ok(id)
    }

    pub(crate) fn update(
        &mut self,
        filter: &Document,
        update: &Document,
        multi: bool,
        changes: &mut Vec<Change>,
    ) -> StoreResult<UpdateResult> {
        let mut targets = self.matching(filter)?;
        if !multi {
            targets.truncate(1);
        }

        // Stage every update first so a failure leaves the collection untouched.
        let mut staged = Vec::with_capacity(targets.len());
        for &i in &targets {
            let mut next = self.docs[i].clone();
            if apply_update(&mut next, update)? {
                staged.push((i, next));
            }
        }

        let result = UpdateResult {
            matched: targets.len() as u64,
            modified: staged.len() as u64,
        };
        for (i, next) in staged {
            let before = std::mem::replace(&mut self.docs[i], next);
            changes.push(Change::Updated { before });
        }
        Ok(result)
    }

    pub(crate) fn delete(
        &mut self,
        filter: &Document,
        multi: bool,
        changes: &mut Vec<Change>,
    ) -> StoreResult<DeleteResult> {
        let mut targets = self.matching(filter)?;
        if !multi {
            targets.truncate(1);
        }
        for &position in targets.iter().rev() {
            let doc = self.docs.remove(position);
            changes.push(Change::Deleted { position, doc });
        }
        Ok(DeleteResult {
            deleted: targets.len() as u64,
        })
    }

    pub(crate) fn find_and_modify(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: FindAndModifyOptions,
        changes: &mut Vec<Change>,
    ) -> StoreResult<Option<Document>> {
        if let Some(&i) = self.matching(filter)?.first() {
            let before = self.docs[i].clone();
            let mut next = before.clone();
            if apply_update(&mut next, update)? {
                self.docs[i] = next.clone();
                changes.push(Change::Updated {
                    before: before.clone(),
                });
            }
            return Ok(Some(if options.return_new { next } else { before }));
        }
        if !options.upsert {
            return Ok(None);
        }

        let mut seed = upsert_seed(filter);
        apply_update(&mut seed, update)?;
        let id = self.insert(collection, seed, changes)?;
        if !options.return_new {
            return Ok(None);
        }
        Ok(self.position_of(&id).map(|p| self.docs[p].clone()))
    }

    pub(crate) fn indexes(&self) -> Vec<Index> {
        self.indexes.clone()
    }

    pub(crate) fn create_index(&mut self, index: Index, changes: &mut Vec<Change>) {
        let name = index.name.clone();
        let previous = match self.indexes.iter().position(|i| i.name == name) {
            Some(p) => Some(std::mem::replace(&mut self.indexes[p], index)),
            None => {
                self.indexes.push(index);
                None
            }
        };
        changes.push(Change::IndexChanged { name, previous });
    }

    fn undo(&mut self, change: Change) {
        match change {
            Change::Inserted { id } => {
                if let Some(p) = self.position_of(&id) {
                    self.docs.remove(p);
                }
            }
            Change::Updated { before } => {
                let position = before.get(ID_FIELD).and_then(|id| self.position_of(id));
                if let Some(p) = position {
                    self.docs[p] = before;
                }
            }
            Change::Deleted { position, doc } => {
                let at = position.min(self.docs.len());
                self.docs.insert(at, doc);
            }
            Change::IndexChanged { name, previous } => {
                self.indexes.retain(|i| i.name != name);
                if let Some(previous) = previous {
                    self.indexes.push(previous);
                }
            }
            Change::Dropped { .. } => {}
        }
    }
}

fn project(doc: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return doc.clone();
    }
    let mut out = Document::new();
    if let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        if let Some(value) = doc.get(field) {
            out.insert(field.clone(), value.clone());
        }
    }
    out
}

fn upsert_seed(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(k, v)| !k.starts_with('$') && !k.contains('.') && !is_operator(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_operator(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.keys().any(|k| k.starts_with('$')))
}

#[derive(Debug)]
struct DatabaseInner {
    name: String,
    collections: RwLock<HashMap<String, CollectionData>>,
    sequences: Mutex<HashMap<String, u64>>,
}

/// An in-memory document database.
///
/// Cloning yields another handle to the same database.
///
/// # Example
///
/// ```rust
/// use txnframe_store::{DocCollection, MemoryDatabase};
///
/// let db = MemoryDatabase::new("cmdb");
/// let hosts = db.collection("host");
/// let mut doc = serde_json::Map::new();
/// doc.insert("name".into(), "h1".into());
/// hosts.insert_one(doc).unwrap();
/// assert_eq!(hosts.count(&serde_json::Map::new()).unwrap(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                name: name.into(),
                collections: RwLock::new(HashMap::new()),
                sequences: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a non-transactional handle to a collection. Collections are
    /// created on first write.
    pub fn collection(&self, name: impl Into<String>) -> MemoryCollection {
        MemoryCollection {
            db: self.clone(),
            name: name.into(),
        }
    }

    /// Names of existing collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Allocates the next value of a named sequence, starting at 1.
    pub fn next_sequence(&self, name: &str) -> u64 {
        let mut sequences = self.inner.sequences.lock();
        let value = sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    /// Opens a session on this database.
    pub fn start_session(&self) -> MemorySession {
        MemorySession::new(self.clone())
    }

    pub(crate) fn read<R>(&self, name: &str, f: impl FnOnce(&CollectionData) -> R) -> R {
        let collections = self.inner.collections.read();
        match collections.get(name) {
            Some(data) => f(data),
            None => f(&CollectionData::default()),
        }
    }

    pub(crate) fn write<R>(&self, name: &str, f: impl FnOnce(&mut CollectionData) -> R) -> R {
        let mut collections = self.inner.collections.write();
        f(collections.entry(name.to_string()).or_default())
    }

    pub(crate) fn take_collection(&self, name: &str) -> Option<CollectionData> {
        self.inner.collections.write().remove(name)
    }

    pub(crate) fn undo(&self, collection: &str, change: Change) {
        let mut collections = self.inner.collections.write();
        match change {
            Change::Dropped { data } => {
                collections.insert(collection.to_string(), data);
            }
            other => collections
                .entry(collection.to_string())
                .or_default()
                .undo(other),
        }
    }
}

/// Non-transactional handle to one collection of a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    db: MemoryDatabase,
    name: String,
}

impl MemoryCollection {
    /// Runs a write and returns the changes it made.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut CollectionData, &str, &mut Vec<Change>) -> StoreResult<R>,
    ) -> (StoreResult<R>, Vec<Change>) {
        let mut changes = Vec::new();
        let result = self
            .db
            .write(&self.name, |data| f(data, &self.name, &mut changes));
        (result, changes)
    }

    pub(crate) fn drop_recorded(&self) -> Vec<Change> {
        match self.db.take_collection(&self.name) {
            Some(data) => vec![Change::Dropped { data }],
            None => Vec::new(),
        }
    }

    fn apply<R>(
        &self,
        f: impl FnOnce(&mut CollectionData, &str, &mut Vec<Change>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.write(f).0
    }
}

impl DocCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, filter: &Document) -> StoreResult<u64> {
        self.db.read(&self.name, |data| data.count(filter))
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        self.db.read(&self.name, |data| data.find(filter, options))
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
        self.drop_recorded();
        Ok(())
    }

    fn indexes(&self) -> StoreResult<Vec<Index>> {
        Ok(self.db.read(&self.name, CollectionData::indexes))
    }

    fn create_index(&self, index: Index) -> StoreResult<()> {
        self.apply(|data, _, changes| {
            data.create_index(index, changes);
            Ok(())
        })
    }
}
