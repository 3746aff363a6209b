//! Coordinator operation envelopes.

use crate::document::{Document, FindAndModifyOptions, FindOptions};
use crate::ids::TxnId;
use crate::txn::{JoinOption, Transaction};
use serde::{Deserialize, Serialize};

/// RPC command names served by the coordinator.
pub mod command {
    /// Executes a [`DbRequest`](crate::DbRequest).
    pub const DB_OPERATION: &str = "DBOperation";
    /// Acquires a prelock.
    pub const PRE_LOCK: &str = "PreLock";
    /// Releases a prelock.
    pub const PRE_UNLOCK: &str = "PreUnlock";
    /// Locks fingerprints.
    pub const LOCK: &str = "Lock";
    /// Releases one sub-transaction's fingerprints.
    pub const UNLOCK: &str = "Unlock";
    /// Records rollback material.
    pub const SNAPSHOT: &str = "Snapshot";
    /// Marks a sub-transaction as applied.
    pub const SUB_TXN_SUCCESS: &str = "SubTxnSuccess";
    /// Allocates the next value of a named sequence.
    pub const NEXT_SEQUENCE: &str = "NextSequence";
    /// Lists the indexes of a collection.
    pub const INDEXES: &str = "Indexes";
    /// Drops a collection outside any transaction.
    pub const DROP_COLLECTION: &str = "DropCollection";
}

/// Operation selector of a [`DbRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    /// Start a transaction.
    StartTransaction = 1,
    /// Commit a transaction.
    Commit = 2,
    /// Abort a transaction.
    Abort = 3,
    /// Insert documents.
    Insert = 4,
    /// Update documents.
    Update = 5,
    /// Delete documents.
    Delete = 6,
    /// Find documents.
    Find = 7,
    /// Atomically find and modify one document.
    FindAndModify = 8,
    /// Count documents.
    Count = 9,
}

impl OpCode {
    /// Wire value of this opcode.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parses a wire value. Unknown values yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(OpCode::StartTransaction),
            2 => Some(OpCode::Commit),
            3 => Some(OpCode::Abort),
            4 => Some(OpCode::Insert),
            5 => Some(OpCode::Update),
            6 => Some(OpCode::Delete),
            7 => Some(OpCode::Find),
            8 => Some(OpCode::FindAndModify),
            9 => Some(OpCode::Count),
            _ => None,
        }
    }

    /// Returns true for operations that read or write collection data.
    pub fn is_data_op(self) -> bool {
        !matches!(
            self,
            OpCode::StartTransaction | OpCode::Commit | OpCode::Abort
        )
    }
}

/// Header shared by every DB operation.
///
/// The opcode is kept as its raw wire value so that an unknown opcode can
/// be answered with a structured error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MsgHeader {
    /// Raw [`OpCode`] value.
    pub op_code: u32,
    /// Transaction to run inside, if any.
    #[serde(default)]
    pub txn_id: Option<TxnId>,
    /// Request id for tracing.
    #[serde(default)]
    pub request_id: String,
    /// Calling process.
    #[serde(default)]
    pub processor: String,
}

impl MsgHeader {
    /// Returns the transaction id unless it is absent or empty.
    pub fn session_id(&self) -> Option<&TxnId> {
        self.txn_id.as_ref().filter(|id| !id.is_empty())
    }
}

/// A DB operation sent to the coordinator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbRequest {
    /// Operation header.
    pub header: MsgHeader,
    /// Target collection.
    #[serde(default)]
    pub collection: String,
    /// Documents to insert.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Filter.
    #[serde(default)]
    pub selector: Document,
    /// Update specification.
    #[serde(default)]
    pub update: Document,
    /// Apply to every match instead of the first one.
    #[serde(default)]
    pub multi: bool,
    /// Find options.
    #[serde(default)]
    pub find: FindOptions,
    /// Find-and-modify options.
    #[serde(default)]
    pub modify: FindAndModifyOptions,
}

impl DbRequest {
    /// Creates a request for `op` against `collection`.
    pub fn new(op: OpCode, collection: impl Into<String>) -> Self {
        Self {
            header: MsgHeader {
                op_code: op.code(),
                ..MsgHeader::default()
            },
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Tags the request with a transaction.
    pub fn with_join(mut self, join: &JoinOption) -> Self {
        self.header.txn_id = Some(join.txn_id.clone());
        self.header.request_id = join.request_id.clone();
        self.header.processor = join.processor.clone();
        self
    }

    /// Sets the filter.
    pub fn with_selector(mut self, selector: Document) -> Self {
        self.selector = selector;
        self
    }

    /// Sets the update specification.
    pub fn with_update(mut self, update: Document) -> Self {
        self.update = update;
        self
    }

    /// Sets the documents to insert.
    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    /// Applies the operation to every match.
    pub fn with_multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }

    /// Sets find options.
    pub fn with_find_options(mut self, find: FindOptions) -> Self {
        self.find = find;
        self
    }

    /// Sets find-and-modify options.
    pub fn with_modify_options(mut self, modify: FindAndModifyOptions) -> Self {
        self.modify = modify;
        self
    }

    /// Decoded opcode, if known.
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_code(self.header.op_code)
    }
}

/// Reply envelope for every DB operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpReply {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Error text when `ok` is false.
    #[serde(default)]
    pub message: String,
    /// Returned documents.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Count result or number of inserted/deleted documents.
    #[serde(default)]
    pub count: u64,
    /// Documents matched by an update.
    #[serde(default)]
    pub matched: u64,
    /// Documents modified by an update.
    #[serde(default)]
    pub modified: u64,
    /// Transaction record for start/commit/abort.
    #[serde(default)]
    pub transaction: Option<Transaction>,
}

impl OpReply {
    /// A successful, empty reply.
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// A failed reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Sets the returned documents.
    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = documents;
        self
    }

    /// Sets the count.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the transaction record.
    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

/// Payload of the `NextSequence` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRequest {
    /// Sequence name.
    pub name: String,
}

/// Payload of collection-level commands such as `Indexes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// Collection name.
    pub collection: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip_and_unknown() {
        for code in 1..=9 {
            let op = OpCode::from_code(code).unwrap();
            assert_eq!(op.code(), code);
        }
        assert_eq!(OpCode::from_code(0), None);
        assert_eq!(OpCode::from_code(42), None);
    }

    #[test]
    fn data_ops() {
        assert!(OpCode::Insert.is_data_op());
        assert!(OpCode::Count.is_data_op());
        assert!(!OpCode::Commit.is_data_op());
    }

    #[test]
    fn empty_txn_id_is_not_a_session() {
        let mut header = MsgHeader::default();
        assert!(header.session_id().is_none());
        header.txn_id = Some(TxnId::new(""));
        assert!(header.session_id().is_none());
        header.txn_id = Some(TxnId::new("t"));
        assert_eq!(header.session_id().map(TxnId::as_str), Some("t"));
    }

    #[test]
    fn request_decodes_with_missing_fields() {
        let req: DbRequest = serde_json::from_str(r#"{"header":{"op_code":99}}"#).unwrap();
        assert_eq!(req.op_code(), None);
        assert!(req.documents.is_empty());
    }

    #[test]
    fn join_tags_header() {
        let join = JoinOption::new("t1", "r1", "p1");
        let req = DbRequest::new(OpCode::Find, "host").with_join(&join);
        assert_eq!(req.header.txn_id, Some(TxnId::new("t1")));
        assert_eq!(req.header.request_id, "r1");
        assert_eq!(req.op_code(), Some(OpCode::Find));
    }

    #[test]
    fn error_reply_shape() {
        let reply = OpReply::error("session not found");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["message"], "session not found");
    }
}
