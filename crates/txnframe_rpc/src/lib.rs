//! # txnframe rpc
//!
//! Request/response RPC over the txnframe binary wire protocol.
//!
//! This crate provides:
//! - [`Wire`], async framing of [`Message`](txnframe_protocol::Message)s over a byte stream
//! - [`RpcClient`], a reconnecting client that pairs replies by sequence number
//! - [`RpcServer`], a TCP server serving one task per connection
//! - [`Router`], an explicit command registry built at startup

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod router;
mod server;
mod wire;

pub use client::RpcClient;
pub use config::{RpcClientConfig, RpcServerConfig};
pub use error::{RpcError, RpcResult};
pub use router::{Handler, Router};
pub use server::RpcServer;
pub use wire::Wire;
