//! Client and server configuration.

use std::time::Duration;
use txnframe_protocol::{Codec, DEFAULT_MAX_DATA_LEN};

/// Configuration for [`RpcClient`](crate::RpcClient).
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Payload codec for requests.
    pub codec: Codec,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Timeout for one call, including the reply.
    pub call_timeout: Duration,
    /// Largest accepted reply payload.
    pub max_frame_len: usize,
}

impl RpcClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            codec: Codec::Json,
            connect_timeout: Duration::from_secs(3),
            call_timeout: Duration::from_secs(30),
            max_frame_len: DEFAULT_MAX_DATA_LEN,
        }
    }

    /// Sets the payload codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the largest accepted reply payload.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted request payload.
    pub max_frame_len: usize,
}

impl RpcServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_connections: 1000,
            max_frame_len: DEFAULT_MAX_DATA_LEN,
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the largest accepted request payload.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
