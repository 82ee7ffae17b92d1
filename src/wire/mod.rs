//! Control Protocol Wire Format
//!
//! Binary TLV message format spoken between the daemon and its peers
//! (controllers and remote emulation servers).
//!
//! ## Message framing
//!
//! Every message starts with a fixed 4-byte header:
//!
//! | Offset | Field    | Size    | Notes                                |
//! |--------|----------|---------|--------------------------------------|
//! | 0      | type     | 1 byte  | [`MessageType`] code                 |
//! | 1      | flags    | 1 byte  | [`MessageFlags`]                     |
//! | 2      | length   | 2 bytes | TLV payload bytes (BE), header excl. |
//!
//! The payload is a sequence of TLVs, padded so that every TLV header
//! and the end of the message land on 32-bit boundaries (see [`tlv`]).
//!
//! Decoding is incremental: [`MessageDecoder`] buffers partial bytes per
//! channel and yields complete messages as they become available.

mod codec;
mod error;
pub mod tlv;

pub use codec::{
    encode_message, DecodeOutcome, MessageDecoder, RawMessage, DEFAULT_MAX_BACKLOG, HEADER_SIZE,
};
pub use error::WireError;
pub use tlv::{SizeClass, TlvReader, TlvValue, TlvWriter};

use std::fmt;

// ============================================================================
// Message Types
// ============================================================================

/// Wire message type identifiers.
///
/// Code 7 is unassigned and decodes as an error like any other unknown
/// type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Node add/modify/delete.
    Node = 1,
    /// Link add/modify/delete.
    Link = 2,
    /// Command execution request or result.
    Execute = 3,
    /// Capability registration.
    Register = 4,
    /// Configuration request/update/reset.
    Configure = 5,
    /// File transfer to a node.
    File = 6,
    /// Session state change, sub-event, or file notification.
    Event = 8,
    /// Session management.
    Session = 9,
    /// Error/warning notification.
    Exception = 10,
}

impl MessageType {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(MessageType::Node),
            2 => Some(MessageType::Link),
            3 => Some(MessageType::Execute),
            4 => Some(MessageType::Register),
            5 => Some(MessageType::Configure),
            6 => Some(MessageType::File),
            8 => Some(MessageType::Event),
            9 => Some(MessageType::Session),
            10 => Some(MessageType::Exception),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Node => "Node",
            MessageType::Link => "Link",
            MessageType::Execute => "Execute",
            MessageType::Register => "Register",
            MessageType::Configure => "Configure",
            MessageType::File => "File",
            MessageType::Event => "Event",
            MessageType::Session => "Session",
            MessageType::Exception => "Exception",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Message Flags
// ============================================================================

/// Operation discriminator carried in the low two bits of the flags byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageOp {
    /// Modify existing state (no operation bit set).
    #[default]
    Modify = 0,
    /// Add new state.
    Add = 1,
    /// Delete existing state.
    Delete = 2,
}

/// Decoded message flags byte.
///
/// | Bits | Meaning                              |
/// |------|--------------------------------------|
/// | 0-1  | operation: 0 modify, 1 add, 2 delete |
/// | 3    | local/informational only             |
/// | 4    | unidirectional parameters present    |
///
/// Unknown high bits are ignored on decode for forward compatibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// Add/modify/delete discriminator.
    pub op: MessageOp,
    /// Message is informational for the local view only; do not forward.
    pub local: bool,
    /// Link-effect parameters apply to one direction only.
    pub unidirectional: bool,
}

const FLAG_OP_MASK: u8 = 0x03;
const FLAG_LOCAL: u8 = 0x08;
const FLAG_UNIDIRECTIONAL: u8 = 0x10;

impl MessageFlags {
    /// Flags for an add operation.
    pub fn add() -> Self {
        Self {
            op: MessageOp::Add,
            ..Self::default()
        }
    }

    /// Flags for a modify operation.
    pub fn modify() -> Self {
        Self {
            op: MessageOp::Modify,
            ..Self::default()
        }
    }

    /// Flags for a delete operation.
    pub fn delete() -> Self {
        Self {
            op: MessageOp::Delete,
            ..Self::default()
        }
    }

    /// Mark the message as carrying unidirectional link parameters.
    pub fn with_unidirectional(mut self) -> Self {
        self.unidirectional = true;
        self
    }

    /// Try to convert from a byte. Operation bits `0b11` are invalid.
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        let op = match b & FLAG_OP_MASK {
            0 => MessageOp::Modify,
            1 => MessageOp::Add,
            2 => MessageOp::Delete,
            _ => return Err(WireError::BadFlags(b)),
        };
        Ok(Self {
            op,
            local: b & FLAG_LOCAL != 0,
            unidirectional: b & FLAG_UNIDIRECTIONAL != 0,
        })
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        let mut b = self.op as u8;
        if self.local {
            b |= FLAG_LOCAL;
        }
        if self.unidirectional {
            b |= FLAG_UNIDIRECTIONAL;
        }
        b
    }
}

impl fmt::Display for MessageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageOp::Modify => "modify",
            MessageOp::Add => "add",
            MessageOp::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        let types = [
            MessageType::Node,
            MessageType::Link,
            MessageType::Execute,
            MessageType::Register,
            MessageType::Configure,
            MessageType::File,
            MessageType::Event,
            MessageType::Session,
            MessageType::Exception,
        ];

        for ty in types {
            let byte = ty.to_byte();
            assert_eq!(MessageType::from_byte(byte), Some(ty));
        }
    }

    #[test]
    fn test_message_type_unassigned_codes() {
        assert!(MessageType::from_byte(0).is_none());
        assert!(MessageType::from_byte(7).is_none());
        assert!(MessageType::from_byte(11).is_none());
        assert!(MessageType::from_byte(0xFF).is_none());
    }

    #[test]
    fn test_flags_roundtrip() {
        let cases = [
            MessageFlags::add(),
            MessageFlags::modify(),
            MessageFlags::delete(),
            MessageFlags::add().with_unidirectional(),
            MessageFlags {
                op: MessageOp::Delete,
                local: true,
                unidirectional: true,
            },
        ];

        for flags in cases {
            let byte = flags.to_byte();
            assert_eq!(MessageFlags::from_byte(byte).unwrap(), flags);
        }
    }

    #[test]
    fn test_flags_invalid_op_bits() {
        assert!(MessageFlags::from_byte(0x03).is_err());
        assert!(MessageFlags::from_byte(0x13).is_err());
    }

    #[test]
    fn test_flags_unknown_high_bits_ignored() {
        let flags = MessageFlags::from_byte(0x81).unwrap();
        assert_eq!(flags.op, MessageOp::Add);
        assert!(!flags.local);
    }
}
