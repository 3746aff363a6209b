//! # txnframe store
//!
//! Document collection driver abstraction for txnframe.
//!
//! This crate provides:
//! - [`DocCollection`], the capability set the coordinator needs from a
//!   document database driver
//! - [`MemoryDatabase`], an in-memory document database
//! - [`MemorySession`], a session whose transaction can be committed or
//!   aborted as a unit
//!
//! The in-memory store backs tests and single-node deployments. A
//! production driver implements the same trait.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod error;
mod filter;
mod memory;
mod session;
mod update;

pub use collection::DocCollection;
pub use error::{StoreError, StoreResult};
pub use filter::{lookup, matches};
pub use memory::{MemoryCollection, MemoryDatabase};
pub use session::{MemorySession, SessionCollection};
pub use update::apply_update;
