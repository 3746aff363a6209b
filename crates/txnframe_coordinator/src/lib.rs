//! # txnframe coordinator
//!
//! Server side of the txnframe transaction subsystem.
//!
//! This crate provides:
//! - [`LockManager`], prelocks and fingerprint locks with bounded waits
//! - [`SessionManager`], store sessions keyed by transaction id
//! - [`TxnService`], the handlers behind every RPC command
//! - [`Coordinator`], the TCP server with its idle-session reaper
//!
//! # Commands
//!
//! | Command | Payload | Reply |
//! |---|---|---|
//! | `DBOperation` | `DbRequest` | `OpReply` |
//! | `PreLock` | `PreLockMeta` | `bool` |
//! | `PreUnlock` | `PreUnlockMeta` | `()` |
//! | `Lock` | `LockMeta` | `LockResult` |
//! | `Unlock` | `UnlockMeta` | `()` |
//! | `Snapshot` | `SubTxnStatus` | `()` |
//! | `SubTxnSuccess` | `SubTxnSuccessMeta` | `()` |
//! | `NextSequence` | `SequenceRequest` | `u64` |
//! | `Indexes` | `CollectionRequest` | `Vec<Index>` |
//! | `DropCollection` | `CollectionRequest` | `()` |

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod lock;
mod server;
mod service;
mod session;

pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, CoordinatorResult};
pub use lock::LockManager;
pub use server::Coordinator;
pub use service::TxnService;
pub use session::{Session, SessionManager};
