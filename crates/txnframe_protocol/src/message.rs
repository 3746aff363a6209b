//! Binary message framing.
//!
//! Every RPC call and reply is one frame. All integers are little-endian:
//!
//! ```text
//! magic u16 | seq u32 | type u32 | cmd_len u16 | cmd [cmd_len] |
//! codec u32 | size u32 | data_len u32 | data [data_len]
//! ```
//!
//! The magic version is validated before anything else is read.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Protocol version tag at the start of every frame.
pub const MAGIC_VERSION: u16 = 0x1B01;

/// Maximum command name length in bytes.
pub const MAX_CMD_LEN: usize = 40;

/// Fixed part of a frame, excluding the command and payload bytes.
pub const HEADER_LEN: usize = 2 + 4 + 4 + 2 + 4 + 4 + 4;

/// Default payload limit applied by readers.
pub const DEFAULT_MAX_DATA_LEN: usize = 16 * 1024 * 1024;

// Offset of cmd_len inside the header.
const CMD_LEN_OFFSET: usize = 10;

/// Kind of frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// A call.
    Request = 1,
    /// A successful reply.
    Response = 2,
    /// A failed reply; data is the UTF-8 error text.
    Error = 3,
    /// The peer is closing the connection.
    Close = 4,
    /// Liveness probe, echoed with the same seq.
    Ping = 5,
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> ProtocolResult<Self> {
        match value {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Close),
            5 => Ok(MessageType::Ping),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Codec {
    /// JSON.
    #[default]
    Json = 0,
    /// CBOR.
    Cbor = 1,
}

impl TryFrom<u32> for Codec {
    type Error = ProtocolError;

    fn try_from(value: u32) -> ProtocolResult<Self> {
        match value {
            0 => Ok(Codec::Json),
            1 => Ok(Codec::Cbor),
            other => Err(ProtocolError::UnknownCodec(other)),
        }
    }
}

impl Codec {
    /// Encodes a payload.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> ProtocolResult<Vec<u8>> {
        match self {
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| ProtocolError::Encode(e.to_string()))
            }
            Codec::Cbor => {
                let mut out = Vec::new();
                ciborium::into_writer(value, &mut out)
                    .map_err(|e| ProtocolError::Encode(e.to_string()))?;
                Ok(out)
            }
        }
    }

    /// Decodes a payload.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> ProtocolResult<T> {
        match self {
            Codec::Json => {
                serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
            }
            Codec::Cbor => {
                ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
            }
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol version tag.
    pub magic_version: u16,
    /// Sequence number pairing a request with its reply.
    pub seq: u32,
    /// Frame kind.
    pub message_type: MessageType,
    /// Command name.
    pub cmd: String,
    /// Payload codec.
    pub codec: Codec,
    /// Declared payload size.
    pub size: u32,
    /// Encoded payload.
    pub data: Bytes,
}

impl Message {
    /// Creates a frame. `size` is set to the payload length.
    pub fn new(
        seq: u32,
        message_type: MessageType,
        cmd: impl Into<String>,
        codec: Codec,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            magic_version: MAGIC_VERSION,
            seq,
            message_type,
            cmd: cmd.into(),
            codec,
            size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            data,
        }
    }

    /// A request frame.
    pub fn request(seq: u32, cmd: impl Into<String>, codec: Codec, data: impl Into<Bytes>) -> Self {
        Self::new(seq, MessageType::Request, cmd, codec, data)
    }

    /// A successful reply to `seq`.
    pub fn response(
        seq: u32,
        cmd: impl Into<String>,
        codec: Codec,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(seq, MessageType::Response, cmd, codec, data)
    }

    /// A failed reply to `seq` carrying an error text.
    pub fn error(seq: u32, cmd: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            seq,
            MessageType::Error,
            cmd,
            Codec::Json,
            Bytes::from(message.into()),
        )
    }

    /// A liveness probe, or its echo.
    pub fn ping(seq: u32) -> Self {
        Self::new(seq, MessageType::Ping, "Ping", Codec::Json, Bytes::new())
    }

    /// A close notification.
    pub fn close(seq: u32) -> Self {
        Self::new(seq, MessageType::Close, "Close", Codec::Json, Bytes::new())
    }

    /// Returns the error text of an `Error` frame.
    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Decodes the payload with the frame's codec.
    pub fn decode_data<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        self.codec.decode(&self.data)
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.cmd.len() + self.data.len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        let cmd = self.cmd.as_bytes();
        if cmd.len() > MAX_CMD_LEN {
            return Err(ProtocolError::CommandTooLong {
                len: cmd.len(),
                max: MAX_CMD_LEN,
            });
        }
        let data_len = u32::try_from(self.data.len()).map_err(|_| ProtocolError::FrameTooLarge {
            len: self.data.len(),
            max: u32::MAX as usize,
        })?;

        buf.reserve(self.encoded_len());
        buf.put_u16_le(self.magic_version);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.message_type as u32);
        // cmd.len() <= MAX_CMD_LEN fits in u16
        buf.put_u16_le(cmd.len() as u16);
        buf.put_slice(cmd);
        buf.put_u32_le(self.codec as u32);
        buf.put_u32_le(self.size);
        buf.put_u32_le(data_len);
        buf.put_slice(&self.data);
        Ok(())
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the frame is incomplete; nothing is
    /// consumed in that case. A wrong magic version is reported as soon as
    /// two bytes are buffered, also without consuming anything.
    pub fn decode(buf: &mut BytesMut, max_data_len: usize) -> ProtocolResult<Option<Message>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != MAGIC_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: MAGIC_VERSION,
                actual: magic,
            });
        }
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let cmd_len = usize::from(u16::from_le_bytes([
            buf[CMD_LEN_OFFSET],
            buf[CMD_LEN_OFFSET + 1],
        ]));
        if cmd_len > MAX_CMD_LEN {
            return Err(ProtocolError::CommandTooLong {
                len: cmd_len,
                max: MAX_CMD_LEN,
            });
        }
        let fixed = HEADER_LEN + cmd_len;
        if buf.len() < fixed {
            return Ok(None);
        }
        let data_len_at = fixed - 4;
        let data_len = u32::from_le_bytes([
            buf[data_len_at],
            buf[data_len_at + 1],
            buf[data_len_at + 2],
            buf[data_len_at + 3],
        ]) as usize;
        if data_len > max_data_len {
            return Err(ProtocolError::FrameTooLarge {
                len: data_len,
                max: max_data_len,
            });
        }
        let total = fixed + data_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let mut frame = buf.split_to(total);
        let magic_version = frame.get_u16_le();
        let seq = frame.get_u32_le();
        let message_type = MessageType::try_from(frame.get_u32_le())?;
        frame.advance(2);
        let cmd = String::from_utf8(frame.split_to(cmd_len).to_vec())
            .map_err(|_| ProtocolError::InvalidCommand)?;
        let codec = Codec::try_from(frame.get_u32_le())?;
        let size = frame.get_u32_le();
        frame.advance(4);
        let data = frame.freeze();

        Ok(Some(Message {
            magic_version,
            seq,
            message_type,
            cmd,
            codec,
            size,
            data,
        }))
    }
}
