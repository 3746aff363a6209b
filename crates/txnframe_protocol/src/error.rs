//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing messages or encoding payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame did not start with the expected magic version.
    #[error("protocol version mismatch: expected {expected:#06x}, got {actual:#06x}")]
    VersionMismatch {
        /// Magic version this build speaks.
        expected: u16,
        /// Magic version found on the wire.
        actual: u16,
    },

    /// Unknown message type tag.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    /// Unknown payload codec tag.
    #[error("unknown codec: {0}")]
    UnknownCodec(u32),

    /// Command name exceeds the maximum length.
    #[error("command too long: {len} bytes (max {max})")]
    CommandTooLong {
        /// Length of the offending command.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Command name is not valid UTF-8.
    #[error("command is not valid utf-8")]
    InvalidCommand,

    /// Declared payload length exceeds the configured maximum.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Payload encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Returns true if the connection that produced this error can no
    /// longer be trusted to stay frame-aligned.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            ProtocolError::VersionMismatch { .. }
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::UnknownCodec(_)
                | ProtocolError::CommandTooLong { .. }
                | ProtocolError::InvalidCommand
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}
