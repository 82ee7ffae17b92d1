//! Wire codec error types.

use thiserror::Error;

/// Errors related to encoding and decoding wire messages.
///
/// Decode errors come in two severities: per-message errors (the offending
/// message is discarded, the channel keeps running) and desync errors
/// (the byte stream can no longer be trusted and the channel must close).
/// [`WireError::is_fatal`] distinguishes them.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("invalid flags byte: 0x{0:02x}")]
    BadFlags(u8),

    #[error("unknown node type code: {0}")]
    UnknownNodeType(u32),

    #[error("unknown event type code: {0}")]
    UnknownEventType(u32),

    #[error("unknown exception level code: {0}")]
    UnknownExceptionLevel(u32),

    #[error("zero-length TLV of type 0x{0:02x}")]
    ZeroLengthTlv(u8),

    #[error("truncated TLV of type 0x{tlv_type:02x}: declared {declared}, only {available} available")]
    TruncatedTlv {
        tlv_type: u8,
        declared: usize,
        available: usize,
    },

    #[error("bad TLV length for type 0x{tlv_type:02x}: expected {expected}, got {got}")]
    BadTlvLength {
        tlv_type: u8,
        expected: usize,
        got: usize,
    },

    #[error("TLV payload is not valid UTF-8 for type 0x{0:02x}")]
    BadUtf8(u8),

    #[error("missing required TLV 0x{tlv_type:02x} in {message} message")]
    MissingTlv {
        message: &'static str,
        tlv_type: u8,
    },

    #[error("message payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("message length {0} is not 32-bit aligned, stream desynchronized")]
    Desync(u16),

    #[error("decode backlog exceeded {max} bytes")]
    BacklogOverflow { max: usize },
}

impl WireError {
    /// True when the byte stream can no longer be trusted and the
    /// channel carrying it must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Desync(_) | WireError::BacklogOverflow { .. }
        )
    }
}
