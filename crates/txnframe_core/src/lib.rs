//! # txnframe core
//!
//! Client side of the txnframe distributed transaction subsystem.
//!
//! Every insert, update or delete on a [`TxnCollection`] runs as a
//! sub-transaction of a caller-supplied transaction id:
//!
//! 1. take the collection prelock `/<db>/<collection>`,
//! 2. read the affected documents and lock their ids,
//! 3. release the prelock and record a rollback snapshot,
//! 4. apply the mutation and report success.
//!
//! ## Crate layout
//!
//! - [`Txn`] is the three-phase orchestrator behind every mutation
//! - [`TxnClient`] is the lock/snapshot surface, served remotely by
//!   [`RpcTxnClient`] and recorded in tests by [`MockTxnClient`]
//! - [`DocumentDriver`] abstracts the document store, see [`LocalDriver`]
//!   and [`RemoteCollection`]
//! - [`DalClient`] and [`TxDalClient`] give applications access to a
//!   coordinator and its sessions
//! - [`Context`] carries deadlines and cancellation into every call

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod collection;
mod config;
mod context;
mod dal;
mod driver;
mod error;
mod mock;
mod remote;
mod txn;

pub use client::{RpcTxnClient, TxnClient};
pub use collection::TxnCollection;
pub use config::{DalConfig, TxnConfig};
pub use context::{CancelHandle, Context};
pub use dal::{DalClient, TxDalClient};
pub use driver::{DocumentDriver, LocalDriver};
pub use error::{TxnError, TxnResult};
pub use mock::{MockTxnClient, TxnCall, TxnOp};
pub use remote::RemoteCollection;
pub use txn::{fingerprints_of, Phase, Preparation, Txn};
