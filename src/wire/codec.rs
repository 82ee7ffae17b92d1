//! Message framing: header encode and incremental, resumable decode.

use super::{MessageFlags, MessageType, WireError};

/// Fixed message header size: type + flags + 16-bit length.
pub const HEADER_SIZE: usize = 4;

/// Default cap on buffered undecoded bytes per channel.
pub const DEFAULT_MAX_BACKLOG: usize = 1 << 20;

/// A framed message: header fields plus the raw TLV payload.
///
/// The payload is decoded lazily by the typed message layer, which owns
/// the per-kind TLV vocabularies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub msg_type: MessageType,
    pub flags: MessageFlags,
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Encode header + payload into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        encode_message(self.msg_type, self.flags, &self.payload)
    }
}

/// Encode a message from its parts. The payload must already carry TLV
/// padding (always the case for [`super::TlvWriter`] output).
pub fn encode_message(
    msg_type: MessageType,
    flags: MessageFlags,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    if payload.len() > u16::MAX as usize {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    debug_assert_eq!(payload.len() % 4, 0);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(msg_type.to_byte());
    buf.push(flags.to_byte());
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Result of a decode attempt.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A complete message was consumed from the backlog.
    Message(RawMessage),
    /// The backlog holds less than one full message; feed more bytes.
    NeedMoreData,
}

/// Incremental decoder with a per-channel byte backlog.
///
/// A decode call may see a partial header or partial payload; in that
/// case nothing is consumed and [`DecodeOutcome::NeedMoreData`] is
/// returned, preserving the undecoded bytes for the next call.
///
/// Per-message errors (unknown message type, bad flags) consume the
/// offending message's full span so parsing resumes on the next message
/// boundary. Errors for which [`WireError::is_fatal`] is true mean the
/// stream is desynchronized and the channel must close.
#[derive(Debug)]
pub struct MessageDecoder {
    backlog: Vec<u8>,
    max_backlog: usize,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKLOG)
    }
}

impl MessageDecoder {
    /// Create a decoder with the given backlog cap.
    pub fn new(max_backlog: usize) -> Self {
        Self {
            backlog: Vec::new(),
            max_backlog,
        }
    }

    /// Append received bytes to the backlog.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if self.backlog.len() + bytes.len() > self.max_backlog {
            return Err(WireError::BacklogOverflow {
                max: self.max_backlog,
            });
        }
        self.backlog.extend_from_slice(bytes);
        Ok(())
    }

    /// Bytes currently buffered and not yet decoded.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Try to decode the next message from the backlog.
    pub fn next_message(&mut self) -> Result<DecodeOutcome, WireError> {
        if self.backlog.len() < HEADER_SIZE {
            return Ok(DecodeOutcome::NeedMoreData);
        }

        let len = u16::from_be_bytes([self.backlog[2], self.backlog[3]]);
        if len % 4 != 0 {
            // TLV padding guarantees 32-bit-aligned payloads; a length
            // violating that means we are not looking at a header.
            return Err(WireError::Desync(len));
        }

        let total = HEADER_SIZE + len as usize;
        if self.backlog.len() < total {
            return Ok(DecodeOutcome::NeedMoreData);
        }

        let frame: Vec<u8> = self.backlog.drain(..total).collect();
        let msg_type =
            MessageType::from_byte(frame[0]).ok_or(WireError::UnknownMessageType(frame[0]))?;
        let flags = MessageFlags::from_byte(frame[1])?;

        Ok(DecodeOutcome::Message(RawMessage {
            msg_type,
            flags,
            payload: frame[HEADER_SIZE..].to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::TlvWriter;

    fn sample_payload() -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_u32(1, 77);
        w.put_string(2, "n1");
        w.finish()
    }

    fn expect_message(dec: &mut MessageDecoder) -> RawMessage {
        match dec.next_message().unwrap() {
            DecodeOutcome::Message(m) => m,
            DecodeOutcome::NeedMoreData => panic!("expected complete message"),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = sample_payload();
        let bytes = encode_message(MessageType::Node, MessageFlags::add(), &payload).unwrap();
        assert_eq!(bytes.len() % 4, 0);

        let mut dec = MessageDecoder::default();
        dec.feed(&bytes).unwrap();
        let msg = expect_message(&mut dec);
        assert_eq!(msg.msg_type, MessageType::Node);
        assert_eq!(msg.flags, MessageFlags::add());
        assert_eq!(msg.payload, payload);
        assert!(matches!(
            dec.next_message().unwrap(),
            DecodeOutcome::NeedMoreData
        ));
    }

    #[test]
    fn test_partial_header_preserved() {
        let bytes = encode_message(MessageType::Event, MessageFlags::modify(), &[]).unwrap();
        let mut dec = MessageDecoder::default();

        dec.feed(&bytes[..2]).unwrap();
        assert!(matches!(
            dec.next_message().unwrap(),
            DecodeOutcome::NeedMoreData
        ));
        assert_eq!(dec.pending(), 2);

        dec.feed(&bytes[2..]).unwrap();
        let msg = expect_message(&mut dec);
        assert_eq!(msg.msg_type, MessageType::Event);
    }

    #[test]
    fn test_partial_payload_preserved() {
        let payload = sample_payload();
        let bytes = encode_message(MessageType::Link, MessageFlags::delete(), &payload).unwrap();
        let mut dec = MessageDecoder::default();

        // Byte-at-a-time delivery must only yield the message once all
        // bytes are in, consuming nothing before that.
        for (i, b) in bytes.iter().enumerate() {
            dec.feed(std::slice::from_ref(b)).unwrap();
            if i + 1 < bytes.len() {
                assert!(matches!(
                    dec.next_message().unwrap(),
                    DecodeOutcome::NeedMoreData
                ));
            }
        }
        let msg = expect_message(&mut dec);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let a = encode_message(MessageType::Node, MessageFlags::add(), &sample_payload()).unwrap();
        let b = encode_message(MessageType::Session, MessageFlags::modify(), &[]).unwrap();

        let mut dec = MessageDecoder::default();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        dec.feed(&joined).unwrap();

        assert_eq!(expect_message(&mut dec).msg_type, MessageType::Node);
        assert_eq!(expect_message(&mut dec).msg_type, MessageType::Session);
    }

    #[test]
    fn test_unknown_message_type_resyncs() {
        // Type 7 is unassigned; its frame must be consumed so the next
        // message still decodes.
        let mut bad = vec![7u8, 0, 0, 0];
        let good = encode_message(MessageType::Node, MessageFlags::add(), &[]).unwrap();
        bad.extend_from_slice(&good);

        let mut dec = MessageDecoder::default();
        dec.feed(&bad).unwrap();

        match dec.next_message() {
            Err(WireError::UnknownMessageType(7)) => {}
            other => panic!("expected UnknownMessageType, got {:?}", other),
        }
        assert_eq!(expect_message(&mut dec).msg_type, MessageType::Node);
    }

    #[test]
    fn test_unaligned_length_is_fatal() {
        let mut dec = MessageDecoder::default();
        dec.feed(&[1, 0, 0, 3]).unwrap();
        match dec.next_message() {
            Err(e) => assert!(e.is_fatal()),
            other => panic!("expected desync error, got {:?}", other),
        }
    }

    #[test]
    fn test_backlog_overflow() {
        let mut dec = MessageDecoder::new(8);
        assert!(dec.feed(&[0u8; 9]).unwrap_err().is_fatal());
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; u16::MAX as usize + 4];
        assert!(matches!(
            encode_message(MessageType::File, MessageFlags::add(), &payload),
            Err(WireError::PayloadTooLarge(_))
        ));
    }
}
