//! Deterministic MAC address allocation.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a MAC address string.
#[derive(Debug, Error)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(pub String);

/// A 48-bit MAC address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Build from the low 48 bits of a u64.
    pub fn from_u64(v: u64) -> Self {
        let b = v.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    /// The address as the low 48 bits of a u64.
    pub fn to_u64(self) -> u64 {
        let b = self.0;
        u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
    }

    /// Raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(MacParseError(s.to_string()));
            }
            octets[count] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Per-session MAC counter.
///
/// Addresses are allocated deterministically by incrementing a 48-bit
/// counter seeded from a configurable starting prefix; the low byte
/// carries into the next byte on overflow, so linked-together sessions
/// seeded with distinct prefixes never collide.
#[derive(Debug)]
pub struct MacAllocator {
    next: u64,
}

/// Default allocation seed (`00:16:3e:00:00:00`).
pub const DEFAULT_MAC_SEED: u64 = 0x00163e000000;

impl Default for MacAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAC_SEED)
    }
}

impl MacAllocator {
    /// Create an allocator starting at the given 48-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            next: seed & 0xFFFF_FFFF_FFFF,
        }
    }

    /// Allocate the next address.
    pub fn allocate(&mut self) -> MacAddr {
        let mac = MacAddr::from_u64(self.next);
        self.next = (self.next + 1) & 0xFFFF_FFFF_FFFF;
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let mac: MacAddr = "00:16:3e:aa:bb:cc".parse().unwrap();
        assert_eq!(mac.to_string(), "00:16:3e:aa:bb:cc");
        assert_eq!(mac.to_u64(), 0x00163eaabbcc);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("00:16:3e:aa:bb".parse::<MacAddr>().is_err());
        assert!("00:16:3e:aa:bb:cc:dd".parse::<MacAddr>().is_err());
        assert!("zz:16:3e:aa:bb:cc".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let mut a = MacAllocator::new(0x00163e000000);
        let mut b = MacAllocator::new(0x00163e000000);
        for _ in 0..16 {
            assert_eq!(a.allocate(), b.allocate());
        }
    }

    #[test]
    fn test_low_byte_carries_into_next() {
        let mut alloc = MacAllocator::new(0x0016_3e00_00ff);
        assert_eq!(alloc.allocate().to_string(), "00:16:3e:00:00:ff");
        assert_eq!(alloc.allocate().to_string(), "00:16:3e:00:01:00");
    }

    #[test]
    fn test_counter_wraps_at_48_bits() {
        let mut alloc = MacAllocator::new(0xFFFF_FFFF_FFFF);
        assert_eq!(alloc.allocate().to_string(), "ff:ff:ff:ff:ff:ff");
        assert_eq!(alloc.allocate().to_string(), "00:00:00:00:00:00");
    }
}
