//! RPC client.

use crate::config::RpcClientConfig;
use crate::error::{RpcError, RpcResult};
use crate::wire::Wire;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use txnframe_protocol::{Message, MessageType};

/// A client for one RPC server.
///
/// Calls on one client are serialized over a single connection. The
/// connection is opened lazily and re-opened after any transport
/// failure, timeout, or abandoned call.
#[derive(Debug)]
pub struct RpcClient {
    addr: String,
    config: RpcClientConfig,
    seq: AtomicU32,
    conn: Mutex<Option<Wire<TcpStream>>>,
}

impl RpcClient {
    /// Creates a client without connecting.
    pub fn new(addr: impl Into<String>, config: RpcClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            seq: AtomicU32::new(1),
            conn: Mutex::new(None),
        }
    }

    /// Creates a client and verifies the server answers a ping.
    pub async fn connect(addr: impl Into<String>, config: RpcClientConfig) -> RpcResult<Self> {
        let client = Self::new(addr, config);
        client.ping().await?;
        Ok(client)
    }

    /// Server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Client configuration.
    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Returns true if a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Calls `cmd` and decodes the reply.
    ///
    /// # Errors
    ///
    /// An error frame from the server becomes [`RpcError::Remote`].
    pub async fn call<Req, Res>(&self, cmd: &str, request: &Req) -> RpcResult<Res>
    where
        Req: Serialize + Sync + ?Sized,
        Res: DeserializeOwned,
    {
        let codec = self.config.codec;
        let data = codec.encode(request)?;
        let message = Message::request(self.next_seq(), cmd, codec, data);
        let reply = self.round_trip(message).await?;
        match reply.message_type {
            MessageType::Response => Ok(reply.decode_data()?),
            MessageType::Error => Err(RpcError::Remote(reply.error_text())),
            other => Err(RpcError::UnexpectedMessage(other)),
        }
    }

    /// Sends a ping and waits for the echo.
    pub async fn ping(&self) -> RpcResult<()> {
        let reply = self.round_trip(Message::ping(self.next_seq())).await?;
        match reply.message_type {
            MessageType::Ping => Ok(()),
            other => Err(RpcError::UnexpectedMessage(other)),
        }
    }

    /// Tells the server the connection is closing and drops it.
    pub async fn close(&self) -> RpcResult<()> {
        let mut conn = self.conn.lock().await;
        if let Some(mut wire) = conn.take() {
            wire.write_message(&Message::close(self.next_seq())).await?;
            wire.shutdown().await?;
        }
        Ok(())
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn open(&self) -> RpcResult<Wire<TcpStream>> {
        let connect = TcpStream::connect(self.addr.as_str());
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(RpcError::Connect {
                    addr: self.addr.clone(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                return Err(RpcError::Connect {
                    addr: self.addr.clone(),
                    message: format!("timed out after {:?}", self.config.connect_timeout),
                })
            }
        };
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "rpc connection opened");
        Ok(Wire::new(stream, self.config.max_frame_len))
    }

    async fn round_trip(&self, message: Message) -> RpcResult<Message> {
        let mut conn = self.conn.lock().await;
        if conn.as_ref().is_some_and(Wire::is_awaiting_reply) {
            debug!(addr = %self.addr, "dropping connection with an abandoned call");
            *conn = None;
        }
        if conn.is_none() {
            *conn = Some(self.open().await?);
        }
        let Some(wire) = conn.as_mut() else {
            return Err(RpcError::ConnectionClosed);
        };

        let timeout = self.config.call_timeout;
        let outcome = tokio::time::timeout(timeout, exchange(wire, &message)).await;
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                warn!(addr = %self.addr, cmd = %message.cmd, error = %err, "rpc call failed");
                *conn = None;
                Err(err)
            }
            Err(_) => {
                *conn = None;
                Err(RpcError::Timeout {
                    cmd: message.cmd,
                    timeout,
                })
            }
        }
    }
}

async fn exchange(wire: &mut Wire<TcpStream>, message: &Message) -> RpcResult<Message> {
    wire.set_awaiting_reply(true);
    wire.write_message(message).await?;
    loop {
        let reply = wire.read_message().await?;
        if reply.seq == message.seq {
            wire.set_awaiting_reply(false);
            return Ok(reply);
        }
        debug!(
            expected = message.seq,
            got = reply.seq,
            "discarding reply to an earlier call"
        );
    }
}
