//! # txnframe protocol
//!
//! Protocol types shared by txnframe clients and the coordinator.
//!
//! This crate provides:
//! - `TxnId`, `SubTxnId` and `Fingerprint` identifiers
//! - Lock protocol metadata (`PreLockMeta`, `LockMeta`, `UnlockMeta`, `LockResult`)
//! - Transaction and sub-transaction records
//! - Coordinator operation envelopes (`DbRequest`, `OpReply`)
//! - The binary `Message` frame and its payload codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod ids;
mod lock;
mod message;
mod operation;
mod txn;

pub use document::{
    DeleteResult, Document, FindAndModifyOptions, FindOptions, Index, SortKey, SortOrder,
    UpdateResult, ID_FIELD,
};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{Fingerprint, Fingerprints, SubTxnId, TxnId};
pub use lock::{LockMeta, LockResult, PreLockMeta, PreUnlockMeta, SubTxnSuccessMeta, UnlockMeta};
pub use message::{
    Codec, Message, MessageType, DEFAULT_MAX_DATA_LEN, HEADER_LEN, MAGIC_VERSION, MAX_CMD_LEN,
};
pub use operation::{
    command, CollectionRequest, DbRequest, MsgHeader, OpCode, OpReply, SequenceRequest,
};
pub use txn::{unix_millis, JoinOption, RollbackKind, SubTxnStatus, Transaction, TxnStatus};
