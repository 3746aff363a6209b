//! Error types for RPC calls.

use std::io;
use std::time::Duration;
use thiserror::Error;
use txnframe_protocol::{MessageType, ProtocolError};

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur while calling or serving RPCs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Framing or payload error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket error.
    #[error("io error: {0}")]
    Io(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Could not establish a connection.
    #[error("connect to {addr} failed: {message}")]
    Connect {
        /// Target address.
        addr: String,
        /// Failure reason.
        message: String,
    },

    /// No reply within the call timeout.
    #[error("call {cmd} timed out after {timeout:?}")]
    Timeout {
        /// Command that timed out.
        cmd: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The server answered with an error frame.
    #[error("remote error: {0}")]
    Remote(String),

    /// A frame of the wrong type arrived.
    #[error("unexpected {0:?} message")]
    UnexpectedMessage(MessageType),
}

impl RpcError {
    /// Returns true if retrying on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::ConnectionClosed
                | RpcError::Connect { .. }
                | RpcError::Timeout { .. }
        )
    }
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => RpcError::ConnectionClosed,
            _ => RpcError::Io(err.to_string()),
        }
    }
}
