//! Async message framing over a byte stream.

use crate::error::{RpcError, RpcResult};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use txnframe_protocol::Message;

/// Reads and writes whole [`Message`] frames on a stream.
///
/// Every write is flushed before it returns.
#[derive(Debug)]
pub struct Wire<S> {
    stream: S,
    buf: BytesMut,
    max_frame_len: usize,
    awaiting_reply: bool,
}

impl<S> Wire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream. Payloads larger than `max_frame_len` are rejected.
    pub fn new(stream: S, max_frame_len: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_len,
            awaiting_reply: false,
        }
    }

    /// Reads the next frame.
    ///
    /// Returns [`RpcError::ConnectionClosed`] when the peer closes the
    /// stream between frames.
    pub async fn read_message(&mut self) -> RpcResult<Message> {
        loop {
            if let Some(message) = Message::decode(&mut self.buf, self.max_frame_len)? {
                return Ok(message);
            }
            let read = self.stream.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Err(RpcError::ConnectionClosed);
                }
                return Err(RpcError::Io(format!(
                    "connection closed with {} bytes of a partial frame",
                    self.buf.len()
                )));
            }
        }
    }

    /// Writes one frame and flushes it.
    pub async fn write_message(&mut self, message: &Message) -> RpcResult<()> {
        let mut out = BytesMut::with_capacity(message.encoded_len());
        message.encode(&mut out)?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Returns true if a request was written whose reply was never read.
    ///
    /// Such a stream is no longer aligned with the caller's next request.
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub(crate) fn set_awaiting_reply(&mut self, awaiting: bool) {
        self.awaiting_reply = awaiting;
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> RpcResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txnframe_protocol::{Codec, MessageType, ProtocolError, DEFAULT_MAX_DATA_LEN};

    #[tokio::test]
    async fn frames_cross_a_duplex_stream() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = Wire::new(a, DEFAULT_MAX_DATA_LEN);
        let mut right = Wire::new(b, DEFAULT_MAX_DATA_LEN);

        let writer = tokio::spawn(async move {
            for seq in 1..=3u32 {
                let msg = Message::request(seq, "Lock", Codec::Json, vec![b'x'; 100]);
                left.write_message(&msg).await.unwrap();
            }
        });

        for seq in 1..=3u32 {
            let msg = right.read_message().await.unwrap();
            assert_eq!(msg.seq, seq);
            assert_eq!(msg.message_type, MessageType::Request);
            assert_eq!(msg.data.len(), 100);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn clean_close_is_reported() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut wire = Wire::new(b, DEFAULT_MAX_DATA_LEN);
        assert_eq!(wire.read_message().await, Err(RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn garbage_fails_fast() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut wire = Wire::new(b, DEFAULT_MAX_DATA_LEN);
        assert!(matches!(
            wire.read_message().await,
            Err(RpcError::Protocol(ProtocolError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut a, b) = tokio::io::duplex(64);
        let bytes = Message::ping(1).to_bytes().unwrap();
        a.write_all(&bytes[..5]).await.unwrap();
        drop(a);
        let mut wire = Wire::new(b, DEFAULT_MAX_DATA_LEN);
        assert!(matches!(wire.read_message().await, Err(RpcError::Io(_))));
    }
}
