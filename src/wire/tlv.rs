//! TLV encoding primitives.
//!
//! Each TLV is a 1-byte type, a length, and a payload:
//!
//! | Offset | Field   | Size     | Notes                                  |
//! |--------|---------|----------|----------------------------------------|
//! | 0      | type    | 1 byte   | message-specific TLV code              |
//! | 1      | length  | 1 byte   | payload bytes; 0 switches to long form |
//! | 2      | length  | 2 bytes  | long form only: 16-bit BE length       |
//! | ...    | payload | variable |                                        |
//!
//! Long form is used when the payload is 256 bytes or more. A TLV with
//! type 0 and length 0 is the trailing-pad terminator and ends TLV
//! parsing for the message; a zero-length TLV of any other type is a
//! hard per-message error.
//!
//! ## Alignment
//!
//! Values are kept 32-bit aligned relative to the message start. Fixed
//! 32- and 64-bit values are pre-padded (pad bytes between the TLV
//! header and the value, so the value itself starts word-aligned);
//! 16-byte values and variable-length payloads are post-padded (pad
//! bytes after the payload, so the next TLV header starts word-aligned).
//! Either way a TLV occupies `header + length + pad` bytes where
//! `pad = (-(header + length)) mod 4`, so a decoder that does not
//! recognize a TLV type can still skip it exactly.

use super::WireError;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Short-form TLV header size: type + 1-byte length.
pub const TLV_HDR_SHORT: usize = 2;

/// Long-form TLV header size: type + zero marker + 2-byte length.
pub const TLV_HDR_LONG: usize = 4;

/// Size class of a TLV payload, determining width checks and pad placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// 16-bit value, no padding needed.
    U16,
    /// 32-bit value, pre-padded.
    U32,
    /// 64-bit value, pre-padded.
    U64,
    /// 128-bit value (IPv6 address), post-padded.
    Wide16,
    /// Variable-length payload (string/bytes), post-padded.
    Variable,
}

/// A decoded TLV value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlvValue {
    U16(u16),
    U32(u32),
    U64(u64),
    Wide16([u8; 16]),
    Bytes(Vec<u8>),
}

impl TlvValue {
    /// Extract as u16.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            TlvValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as u32.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TlvValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TlvValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as an IPv4 address (carried as a 32-bit value).
    pub fn as_ip4(&self) -> Option<Ipv4Addr> {
        self.as_u32().map(Ipv4Addr::from)
    }

    /// Extract as an IPv6 address (carried as a 16-byte value).
    pub fn as_ip6(&self) -> Option<Ipv6Addr> {
        match self {
            TlvValue::Wide16(bytes) => Some(Ipv6Addr::from(*bytes)),
            _ => None,
        }
    }

    /// Extract as a UTF-8 string.
    pub fn into_string(self, tlv_type: u8) -> Result<String, WireError> {
        match self {
            TlvValue::Bytes(bytes) => {
                String::from_utf8(bytes).map_err(|_| WireError::BadUtf8(tlv_type))
            }
            _ => Err(WireError::BadUtf8(tlv_type)),
        }
    }
}

/// Pad bytes needed after `header + length` to reach a 32-bit boundary.
fn pad_len(header: usize, length: usize) -> usize {
    (4 - (header + length) % 4) % 4
}

// ============================================================================
// Writer
// ============================================================================

/// Builds a TLV payload, maintaining the alignment invariant.
///
/// Optional fields are written with the `put_opt_*` helpers; `None`
/// (and empty strings) produce no TLV at all.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish and return the payload bytes (always a multiple of 4).
    pub fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.buf.len() % 4, 0);
        self.buf
    }

    fn put_fixed_prepadded(&mut self, ty: u8, value: &[u8]) {
        let pad = pad_len(TLV_HDR_SHORT, value.len());
        self.buf.push(ty);
        self.buf.push(value.len() as u8);
        self.buf.extend(std::iter::repeat(0u8).take(pad));
        self.buf.extend_from_slice(value);
    }

    fn put_postpadded(&mut self, ty: u8, value: &[u8]) {
        let (hdr, pad) = if value.len() >= 256 {
            (TLV_HDR_LONG, pad_len(TLV_HDR_LONG, value.len()))
        } else {
            (TLV_HDR_SHORT, pad_len(TLV_HDR_SHORT, value.len()))
        };
        self.buf.push(ty);
        if hdr == TLV_HDR_LONG {
            self.buf.push(0);
            self.buf
                .extend_from_slice(&(value.len() as u16).to_be_bytes());
        } else {
            self.buf.push(value.len() as u8);
        }
        self.buf.extend_from_slice(value);
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    /// Write a 16-bit value.
    pub fn put_u16(&mut self, ty: u8, v: u16) {
        self.put_fixed_prepadded(ty, &v.to_be_bytes());
    }

    /// Write a 32-bit value.
    pub fn put_u32(&mut self, ty: u8, v: u32) {
        self.put_fixed_prepadded(ty, &v.to_be_bytes());
    }

    /// Write a 64-bit value.
    pub fn put_u64(&mut self, ty: u8, v: u64) {
        self.put_fixed_prepadded(ty, &v.to_be_bytes());
    }

    /// Write an IPv4 address as a 32-bit value.
    pub fn put_ip4(&mut self, ty: u8, addr: Ipv4Addr) {
        self.put_u32(ty, u32::from(addr));
    }

    /// Write an IPv6 address as a 16-byte value.
    pub fn put_ip6(&mut self, ty: u8, addr: Ipv6Addr) {
        self.put_postpadded(ty, &addr.octets());
    }

    /// Write a string. Empty strings are omitted entirely, since a
    /// zero-length TLV is not representable on the wire.
    pub fn put_string(&mut self, ty: u8, s: &str) {
        if !s.is_empty() {
            self.put_postpadded(ty, s.as_bytes());
        }
    }

    /// Write raw bytes as a variable-length TLV. Empty slices are
    /// omitted, like empty strings.
    pub fn put_bytes(&mut self, ty: u8, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.put_postpadded(ty, bytes);
        }
    }

    /// Write a 16-bit value if present.
    pub fn put_opt_u16(&mut self, ty: u8, v: Option<u16>) {
        if let Some(v) = v {
            self.put_u16(ty, v);
        }
    }

    /// Write a 32-bit value if present.
    pub fn put_opt_u32(&mut self, ty: u8, v: Option<u32>) {
        if let Some(v) = v {
            self.put_u32(ty, v);
        }
    }

    /// Write a 64-bit value if present.
    pub fn put_opt_u64(&mut self, ty: u8, v: Option<u64>) {
        if let Some(v) = v {
            self.put_u64(ty, v);
        }
    }

    /// Write an IPv4 address if present.
    pub fn put_opt_ip4(&mut self, ty: u8, v: Option<Ipv4Addr>) {
        if let Some(v) = v {
            self.put_ip4(ty, v);
        }
    }

    /// Write an IPv6 address if present.
    pub fn put_opt_ip6(&mut self, ty: u8, v: Option<Ipv6Addr>) {
        if let Some(v) = v {
            self.put_ip6(ty, v);
        }
    }

    /// Write a string if present and non-empty.
    pub fn put_opt_string(&mut self, ty: u8, v: Option<&str>) {
        if let Some(v) = v {
            self.put_string(ty, v);
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Iterates the TLVs of one message payload.
///
/// The caller supplies a size-class table for the message kind being
/// decoded; TLV types absent from the table are skipped over (their
/// declared span is consumed) and collected in [`TlvReader::ignored`]
/// so the caller can log them as warnings rather than fail.
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
    classify: fn(u8) -> Option<SizeClass>,
    ignored: Vec<u8>,
}

impl<'a> TlvReader<'a> {
    /// Create a reader over a message payload.
    pub fn new(buf: &'a [u8], classify: fn(u8) -> Option<SizeClass>) -> Self {
        Self {
            buf,
            pos: 0,
            classify,
            ignored: Vec::new(),
        }
    }

    /// TLV types that were present but unknown to the message vocabulary.
    pub fn ignored(&self) -> &[u8] {
        &self.ignored
    }

    /// Decode the next recognized TLV, or `None` at end of payload.
    pub fn next(&mut self) -> Result<Option<(u8, TlvValue)>, WireError> {
        loop {
            let remaining = self.buf.len() - self.pos;
            if remaining == 0 {
                return Ok(None);
            }
            // A lone byte cannot hold a TLV header; it can only be
            // stray padding, which the terminator rule excludes.
            if remaining == 1 {
                return Err(WireError::TruncatedTlv {
                    tlv_type: self.buf[self.pos],
                    declared: TLV_HDR_SHORT,
                    available: remaining,
                });
            }

            let ty = self.buf[self.pos];
            let len_byte = self.buf[self.pos + 1];

            // Trailing-pad terminator: ends TLV parsing for this message.
            if ty == 0 && len_byte == 0 {
                self.pos = self.buf.len();
                return Ok(None);
            }

            let (hdr, len) = if len_byte == 0 {
                // Long form: 16-bit BE length follows the zero marker.
                if remaining < TLV_HDR_LONG {
                    return Err(WireError::TruncatedTlv {
                        tlv_type: ty,
                        declared: TLV_HDR_LONG,
                        available: remaining,
                    });
                }
                let len =
                    u16::from_be_bytes([self.buf[self.pos + 2], self.buf[self.pos + 3]]) as usize;
                if len == 0 {
                    return Err(WireError::ZeroLengthTlv(ty));
                }
                (TLV_HDR_LONG, len)
            } else {
                (TLV_HDR_SHORT, len_byte as usize)
            };

            let pad = pad_len(hdr, len);
            let total = hdr + len + pad;
            if total > remaining {
                return Err(WireError::TruncatedTlv {
                    tlv_type: ty,
                    declared: total,
                    available: remaining,
                });
            }

            let class = match (self.classify)(ty) {
                Some(class) => class,
                None => {
                    // Unknown TLV type: consume its span, report later.
                    self.ignored.push(ty);
                    self.pos += total;
                    continue;
                }
            };

            let value = self.extract(ty, class, hdr, len, pad)?;
            self.pos += total;
            return Ok(Some((ty, value)));
        }
    }

    fn extract(
        &self,
        ty: u8,
        class: SizeClass,
        hdr: usize,
        len: usize,
        pad: usize,
    ) -> Result<TlvValue, WireError> {
        let check_len = |expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(WireError::BadTlvLength {
                    tlv_type: ty,
                    expected,
                    got: len,
                })
            }
        };

        // Pre-padded classes: value sits after the pad. Post-padded:
        // value sits right after the header.
        let pre = self.pos + hdr + pad;
        let post = self.pos + hdr;

        match class {
            SizeClass::U16 => {
                check_len(2)?;
                let v = u16::from_be_bytes([self.buf[pre], self.buf[pre + 1]]);
                Ok(TlvValue::U16(v))
            }
            SizeClass::U32 => {
                check_len(4)?;
                let mut b = [0u8; 4];
                b.copy_from_slice(&self.buf[pre..pre + 4]);
                Ok(TlvValue::U32(u32::from_be_bytes(b)))
            }
            SizeClass::U64 => {
                check_len(8)?;
                let mut b = [0u8; 8];
                b.copy_from_slice(&self.buf[pre..pre + 8]);
                Ok(TlvValue::U64(u64::from_be_bytes(b)))
            }
            SizeClass::Wide16 => {
                check_len(16)?;
                let mut b = [0u8; 16];
                b.copy_from_slice(&self.buf[post..post + 16]);
                Ok(TlvValue::Wide16(b))
            }
            SizeClass::Variable => Ok(TlvValue::Bytes(self.buf[post..post + len].to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_all(ty: u8) -> Option<SizeClass> {
        match ty {
            1 => Some(SizeClass::U16),
            2 => Some(SizeClass::U32),
            3 => Some(SizeClass::U64),
            4 => Some(SizeClass::Wide16),
            5 => Some(SizeClass::Variable),
            _ => None,
        }
    }

    fn read_all(buf: &[u8]) -> Vec<(u8, TlvValue)> {
        let mut reader = TlvReader::new(buf, classify_all);
        let mut out = Vec::new();
        while let Some(tlv) = reader.next().unwrap() {
            out.push(tlv);
        }
        out
    }

    #[test]
    fn test_u16_layout() {
        let mut w = TlvWriter::new();
        w.put_u16(1, 0xBEEF);
        let buf = w.finish();
        // No padding: type, len, value.
        assert_eq!(buf, vec![1, 2, 0xBE, 0xEF]);
    }

    #[test]
    fn test_u32_prepadded() {
        let mut w = TlvWriter::new();
        w.put_u32(2, 0x01020304);
        let buf = w.finish();
        // 2-byte header, 2 pad bytes, value word-aligned at offset 4.
        assert_eq!(buf, vec![2, 4, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_u64_prepadded() {
        let mut w = TlvWriter::new();
        w.put_u64(3, 0x0102030405060708);
        let buf = w.finish();
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[..4], &[3, 8, 0, 0]);
        assert_eq!(&buf[4..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_string_postpadded() {
        let mut w = TlvWriter::new();
        w.put_string(5, "eth0");
        let buf = w.finish();
        // 2-byte header + 4 payload + 2 pad after.
        assert_eq!(buf, vec![5, 4, b'e', b't', b'h', b'0', 0, 0]);
    }

    #[test]
    fn test_ip6_postpadded() {
        let mut w = TlvWriter::new();
        w.put_ip6(4, "2001:db8::1".parse().unwrap());
        let buf = w.finish();
        assert_eq!(buf.len(), 20);
        // Last two bytes are post-pad.
        assert_eq!(&buf[18..], &[0, 0]);
    }

    #[test]
    fn test_roundtrip_mixed() {
        let mut w = TlvWriter::new();
        w.put_u16(1, 7);
        w.put_u32(2, 0xDEADBEEF);
        w.put_u64(3, u64::MAX);
        w.put_ip6(4, "fe80::1".parse().unwrap());
        w.put_string(5, "hello world");
        let buf = w.finish();
        assert_eq!(buf.len() % 4, 0);

        let tlvs = read_all(&buf);
        assert_eq!(tlvs.len(), 5);
        assert_eq!(tlvs[0].1, TlvValue::U16(7));
        assert_eq!(tlvs[1].1, TlvValue::U32(0xDEADBEEF));
        assert_eq!(tlvs[2].1, TlvValue::U64(u64::MAX));
        assert_eq!(tlvs[3].1.as_ip6(), Some("fe80::1".parse().unwrap()));
        assert_eq!(
            tlvs[4].1.clone().into_string(5).unwrap(),
            "hello world".to_string()
        );
    }

    #[test]
    fn test_tlv_headers_word_aligned() {
        let mut w = TlvWriter::new();
        w.put_string(5, "abc");
        w.put_u32(2, 1);
        w.put_string(5, "x");
        w.put_u64(3, 2);
        let buf = w.finish();

        // Walk the TLVs recording each header offset.
        let mut reader = TlvReader::new(&buf, classify_all);
        let mut offsets = vec![0usize];
        while reader.next().unwrap().is_some() {
            offsets.push(reader.pos);
        }
        for off in offsets {
            assert_eq!(off % 4, 0);
        }
    }

    #[test]
    fn test_long_form_roundtrip() {
        let big: String = "x".repeat(300);
        let mut w = TlvWriter::new();
        w.put_string(5, &big);
        w.put_u16(1, 9);
        let buf = w.finish();

        // Long form: type, zero marker, 16-bit BE length.
        assert_eq!(buf[0], 5);
        assert_eq!(buf[1], 0);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);

        let tlvs = read_all(&buf);
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].1.clone().into_string(5).unwrap(), big);
        assert_eq!(tlvs[1].1, TlvValue::U16(9));
    }

    #[test]
    fn test_boundary_255_stays_short_form() {
        let s: String = "y".repeat(255);
        let mut w = TlvWriter::new();
        w.put_string(5, &s);
        let buf = w.finish();
        assert_eq!(buf[1], 255);
        let tlvs = read_all(&buf);
        assert_eq!(tlvs[0].1.clone().into_string(5).unwrap(), s);
    }

    #[test]
    fn test_empty_string_omitted() {
        let mut w = TlvWriter::new();
        w.put_string(5, "");
        w.put_opt_string(5, None);
        assert!(w.finish().is_empty());
    }

    #[test]
    fn test_trailing_pad_terminator() {
        let mut w = TlvWriter::new();
        w.put_u16(1, 42);
        let mut buf = w.finish();
        // Append a terminator and garbage beyond it; the garbage must
        // never be parsed.
        buf.extend_from_slice(&[0, 0, 0xFF, 0xFF]);

        let tlvs = read_all(&buf);
        assert_eq!(tlvs.len(), 1);
    }

    #[test]
    fn test_zero_length_tlv_is_error() {
        // Type 6, long-form marker, declared length zero.
        let buf = [6u8, 0, 0, 0];
        let mut reader = TlvReader::new(&buf, classify_all);
        match reader.next() {
            Err(WireError::ZeroLengthTlv(6)) => {}
            other => panic!("expected ZeroLengthTlv, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tlv_skipped_and_reported() {
        let mut w = TlvWriter::new();
        w.put_u32(99, 123); // unknown to classify_all
        w.put_u16(1, 5);
        let buf = w.finish();

        let mut reader = TlvReader::new(&buf, classify_all);
        let first = reader.next().unwrap();
        assert_eq!(first, Some((1, TlvValue::U16(5))));
        assert!(reader.next().unwrap().is_none());
        assert_eq!(reader.ignored(), &[99]);
    }

    #[test]
    fn test_truncated_tlv() {
        let mut w = TlvWriter::new();
        w.put_u64(3, 1);
        let buf = w.finish();
        let mut reader = TlvReader::new(&buf[..6], classify_all);
        assert!(matches!(
            reader.next(),
            Err(WireError::TruncatedTlv { tlv_type: 3, .. })
        ));
    }

    #[test]
    fn test_bad_width_for_class() {
        // Declares a 2-byte payload for a u32-class TLV type.
        let buf = [2u8, 2, 0xAA, 0xBB];
        let mut reader = TlvReader::new(&buf, classify_all);
        assert!(matches!(
            reader.next(),
            Err(WireError::BadTlvLength {
                tlv_type: 2,
                expected: 4,
                got: 2
            })
        ));
    }
}
