//! Typed Message Vocabulary
//!
//! One struct per wire message kind, each owning its TLV type-code
//! table. The codec layer ([`crate::wire`]) frames raw messages; this
//! layer gives them meaning. Decoding collects unknown TLV types as
//! ignorable warnings instead of failing, so vocabularies can grow
//! without breaking older peers.

pub(crate) mod control;
pub(crate) mod event;
pub(crate) mod execute;
pub(crate) mod link;
pub(crate) mod node;

pub use control::{ConfigFlag, ConfigureMessage, FileMessage, RegisterMessage};
pub use event::{EventMessage, ExceptionLevel, ExceptionMessage, SessionMessage};
pub use execute::ExecuteMessage;
pub use link::{IfaceTlvs, LinkMessage};
pub use node::NodeMessage;

use crate::wire::{MessageFlags, MessageType, RawMessage, WireError};

/// A fully decoded message plus the TLV types that were skipped.
#[derive(Debug)]
pub struct Decoded {
    pub message: Message,
    /// Unknown-but-skipped TLV types, reported as warnings by the
    /// caller.
    pub ignored_tlvs: Vec<u8>,
}

/// Closed union over every message kind, matched exhaustively by the
/// dispatcher so an unhandled kind is a compile-time error.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Node(NodeMessage),
    Link(LinkMessage),
    Execute(ExecuteMessage),
    Register(RegisterMessage),
    Configure(ConfigureMessage),
    File(FileMessage),
    Event(EventMessage),
    Session(SessionMessage),
    Exception(ExceptionMessage),
}

impl Message {
    /// The wire type this message encodes as.
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Node(_) => MessageType::Node,
            Message::Link(_) => MessageType::Link,
            Message::Execute(_) => MessageType::Execute,
            Message::Register(_) => MessageType::Register,
            Message::Configure(_) => MessageType::Configure,
            Message::File(_) => MessageType::File,
            Message::Event(_) => MessageType::Event,
            Message::Session(_) => MessageType::Session,
            Message::Exception(_) => MessageType::Exception,
        }
    }

    /// Decode a framed message into its typed form.
    pub fn decode(raw: &RawMessage) -> Result<Decoded, WireError> {
        let (message, ignored_tlvs) = match raw.msg_type {
            MessageType::Node => {
                let (m, ignored) = NodeMessage::from_payload(&raw.payload)?;
                (Message::Node(m), ignored)
            }
            MessageType::Link => {
                let (m, ignored) = LinkMessage::from_payload(&raw.payload)?;
                (Message::Link(m), ignored)
            }
            MessageType::Execute => {
                let (m, ignored) = ExecuteMessage::from_payload(&raw.payload)?;
                (Message::Execute(m), ignored)
            }
            MessageType::Register => {
                let (m, ignored) = RegisterMessage::from_payload(&raw.payload)?;
                (Message::Register(m), ignored)
            }
            MessageType::Configure => {
                let (m, ignored) = ConfigureMessage::from_payload(&raw.payload)?;
                (Message::Configure(m), ignored)
            }
            MessageType::File => {
                let (m, ignored) = FileMessage::from_payload(&raw.payload)?;
                (Message::File(m), ignored)
            }
            MessageType::Event => {
                let (m, ignored) = EventMessage::from_payload(&raw.payload)?;
                (Message::Event(m), ignored)
            }
            MessageType::Session => {
                let (m, ignored) = SessionMessage::from_payload(&raw.payload)?;
                (Message::Session(m), ignored)
            }
            MessageType::Exception => {
                let (m, ignored) = ExceptionMessage::from_payload(&raw.payload)?;
                (Message::Exception(m), ignored)
            }
        };
        Ok(Decoded {
            message,
            ignored_tlvs,
        })
    }

    /// Encode into wire bytes with the given flags.
    pub fn encode(&self, flags: MessageFlags) -> Result<Vec<u8>, WireError> {
        let payload = match self {
            Message::Node(m) => m.to_tlvs(),
            Message::Link(m) => m.to_tlvs(),
            Message::Execute(m) => m.to_tlvs(),
            Message::Register(m) => m.to_tlvs(),
            Message::Configure(m) => m.to_tlvs(),
            Message::File(m) => m.to_tlvs(),
            Message::Event(m) => m.to_tlvs(),
            Message::Session(m) => m.to_tlvs(),
            Message::Exception(m) => m.to_tlvs(),
        };
        crate::wire::encode_message(self.msg_type(), flags, &payload)
    }
}
