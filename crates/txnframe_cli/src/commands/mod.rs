//! CLI command implementations.

pub mod ping;
pub mod serve;
pub mod start_txn;
