//! RPC server.

use crate::config::RpcServerConfig;
use crate::error::{RpcError, RpcResult};
use crate::router::Router;
use crate::wire::Wire;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use txnframe_protocol::{Message, MessageType};

/// A TCP server dispatching requests through a [`Router`].
///
/// Each connection is served by its own task and its requests are
/// handled one at a time, in arrival order. Handlers run on the blocking
/// pool. A request is answered by exactly one `Response` or `Error`
/// frame with the request's sequence number.
#[derive(Debug)]
pub struct RpcServer {
    router: Arc<Router>,
    config: RpcServerConfig,
}

impl RpcServer {
    /// Creates a server.
    pub fn new(router: Router, config: RpcServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
        }
    }

    /// Returns the router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Connections beyond `max_connections` are closed immediately.
    /// Connections already being served are not interrupted by shutdown.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> RpcResult<()>
    where
        F: Future<Output = ()>,
    {
        let limiter = Arc::new(Semaphore::new(self.config.max_connections));
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, commands = ?self.router.commands(), "rpc server listening");
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                        warn!(%peer, "connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    };
                    let router = Arc::clone(&self.router);
                    let max_frame_len = self.config.max_frame_len;
                    tokio::spawn(async move {
                        let _permit = permit;
                        match serve_connection(stream, peer, router, max_frame_len).await {
                            Ok(()) => debug!(%peer, "connection closed"),
                            Err(err) => warn!(%peer, error = %err, "connection closed with error"),
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("rpc server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    max_frame_len: usize,
) -> RpcResult<()> {
    stream.set_nodelay(true)?;
    debug!(%peer, "connection accepted");
    let mut wire = Wire::new(stream, max_frame_len);

    loop {
        let message = match wire.read_message().await {
            Ok(message) => message,
            Err(RpcError::ConnectionClosed) => return Ok(()),
            Err(err) => return Err(err),
        };
        match message.message_type {
            MessageType::Request => {
                let reply = dispatch(&router, message).await;
                wire.write_message(&reply).await?;
            }
            MessageType::Ping => wire.write_message(&Message::ping(message.seq)).await?,
            MessageType::Close => return Ok(()),
            other => return Err(RpcError::UnexpectedMessage(other)),
        }
    }
}

async fn dispatch(router: &Arc<Router>, message: Message) -> Message {
    let seq = message.seq;
    let codec = message.codec;
    let cmd = message.cmd.clone();
    let router = Arc::clone(router);
    let handled =
        tokio::task::spawn_blocking(move || router.dispatch(&message.cmd, codec, &message.data))
            .await;

    match handled {
        Ok(Ok(data)) => Message::response(seq, cmd, codec, data),
        Ok(Err(text)) => {
            debug!(%cmd, seq, error = %text, "handler returned error");
            Message::error(seq, cmd, text)
        }
        Err(join) => {
            warn!(%cmd, seq, error = %join, "handler panicked");
            Message::error(seq, cmd, "internal error: handler panicked")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::oneshot;
    use txnframe_protocol::{Codec, DEFAULT_MAX_DATA_LEN};

    async fn start(config: RpcServerConfig) -> (SocketAddr, oneshot::Sender<()>) {
        let mut router = Router::new();
        router.route("Echo", |s: String| Ok::<_, String>(s));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let server = RpcServer::new(router, config);
        tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));
        (addr, tx)
    }

    async fn raw(addr: SocketAddr) -> Wire<TcpStream> {
        Wire::new(TcpStream::connect(addr).await.unwrap(), DEFAULT_MAX_DATA_LEN)
    }

    #[tokio::test]
    async fn replies_carry_request_seq() {
        let (addr, _stop) = start(RpcServerConfig::default()).await;
        let mut wire = raw(addr).await;

        let data = Codec::Json.encode("hi").unwrap();
        wire.write_message(&Message::request(41, "Echo", Codec::Json, data.clone()))
            .await
            .unwrap();
        wire.write_message(&Message::request(42, "Nope", Codec::Json, data))
            .await
            .unwrap();

        let first = wire.read_message().await.unwrap();
        assert_eq!(first.seq, 41);
        assert_eq!(first.message_type, MessageType::Response);
        assert_eq!(first.decode_data::<String>().unwrap(), "hi");

        let second = wire.read_message().await.unwrap();
        assert_eq!(second.seq, 42);
        assert_eq!(second.message_type, MessageType::Error);
    }

    #[tokio::test]
    async fn ping_is_echoed() {
        let (addr, _stop) = start(RpcServerConfig::default()).await;
        let mut wire = raw(addr).await;
        wire.write_message(&Message::ping(7)).await.unwrap();
        let reply = wire.read_message().await.unwrap();
        assert_eq!(reply.message_type, MessageType::Ping);
        assert_eq!(reply.seq, 7);
    }

    #[tokio::test]
    async fn bad_magic_closes_connection() {
        let (addr, _stop) = start(RpcServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"\x02\x01garbage").await.unwrap();
        let mut wire = Wire::new(stream, DEFAULT_MAX_DATA_LEN);
        let outcome = tokio::time::timeout(Duration::from_secs(5), wire.read_message())
            .await
            .unwrap();
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn close_ends_connection() {
        let (addr, _stop) = start(RpcServerConfig::default()).await;
        let mut wire = raw(addr).await;
        wire.write_message(&Message::close(1)).await.unwrap();
        assert_eq!(wire.read_message().await, Err(RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn connection_limit() {
        let (addr, _stop) = start(RpcServerConfig::new().with_max_connections(1)).await;
        let mut first = raw(addr).await;
        first.write_message(&Message::ping(1)).await.unwrap();
        first.read_message().await.unwrap();

        let mut second = raw(addr).await;
        let _ = second.write_message(&Message::ping(1)).await;
        assert!(second.read_message().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = RpcServer::new(Router::new(), RpcServerConfig::default());
        let handle = tokio::spawn(server.serve(listener, async {}));
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
