//! Link message TLVs.

use crate::model::{LinkEffects, MacAddr};
use crate::wire::{SizeClass, TlvReader, TlvValue, TlvWriter, WireError};
use std::net::{Ipv4Addr, Ipv6Addr};

pub(crate) const TLV_NODE1: u8 = 0x01;
pub(crate) const TLV_NODE2: u8 = 0x02;
pub(crate) const TLV_DELAY: u8 = 0x03;
pub(crate) const TLV_BANDWIDTH: u8 = 0x04;
pub(crate) const TLV_PER: u8 = 0x05;
pub(crate) const TLV_DUP: u8 = 0x06;
pub(crate) const TLV_JITTER: u8 = 0x07;
pub(crate) const TLV_KEY: u8 = 0x10;
pub(crate) const TLV_NETWORK_ID: u8 = 0x20;
pub(crate) const TLV_SESSION: u8 = 0x21;

pub(crate) const TLV_IFACE1_INDEX: u8 = 0x30;
pub(crate) const TLV_IFACE1_IP4: u8 = 0x31;
pub(crate) const TLV_IFACE1_IP4_PREFIX: u8 = 0x32;
pub(crate) const TLV_IFACE1_MAC: u8 = 0x33;
pub(crate) const TLV_IFACE1_IP6: u8 = 0x34;
pub(crate) const TLV_IFACE1_IP6_PREFIX: u8 = 0x35;
pub(crate) const TLV_IFACE2_INDEX: u8 = 0x36;
pub(crate) const TLV_IFACE2_IP4: u8 = 0x37;
pub(crate) const TLV_IFACE2_IP4_PREFIX: u8 = 0x38;
pub(crate) const TLV_IFACE2_MAC: u8 = 0x39;
pub(crate) const TLV_IFACE2_IP6: u8 = 0x3A;
pub(crate) const TLV_IFACE2_IP6_PREFIX: u8 = 0x3B;

/// Per-endpoint interface TLVs carried in a link message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IfaceTlvs {
    pub index: Option<u16>,
    pub ip4: Option<Ipv4Addr>,
    pub ip4_prefix: Option<u16>,
    pub ip6: Option<Ipv6Addr>,
    pub ip6_prefix: Option<u16>,
    pub mac: Option<MacAddr>,
}

impl IfaceTlvs {
    /// True when no interface TLV for this endpoint was present.
    pub fn is_empty(&self) -> bool {
        *self == IfaceTlvs::default()
    }
}

/// A link create/modify/delete request between two endpoints. The two
/// node numbers are required; everything else is optional.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkMessage {
    pub node1: u32,
    pub node2: u32,
    /// One-way delay in microseconds.
    pub delay: Option<u64>,
    /// Bandwidth in bits per second.
    pub bandwidth: Option<u64>,
    /// Packet error rate in percent; 100 means total loss.
    pub per: Option<u16>,
    /// Duplicate rate in percent.
    pub dup: Option<u16>,
    /// Jitter in microseconds.
    pub jitter: Option<u64>,
    /// Tunnel key for cross-server links.
    pub key: Option<u32>,
    pub network_id: Option<u32>,
    pub session: Option<u32>,
    pub iface1: Option<IfaceTlvs>,
    pub iface2: Option<IfaceTlvs>,
}

fn classify(ty: u8) -> Option<SizeClass> {
    match ty {
        TLV_NODE1 | TLV_NODE2 | TLV_KEY | TLV_NETWORK_ID | TLV_SESSION | TLV_IFACE1_IP4
        | TLV_IFACE2_IP4 => Some(SizeClass::U32),
        TLV_DELAY | TLV_BANDWIDTH | TLV_JITTER | TLV_IFACE1_MAC | TLV_IFACE2_MAC => {
            Some(SizeClass::U64)
        }
        TLV_PER | TLV_DUP | TLV_IFACE1_INDEX | TLV_IFACE1_IP4_PREFIX | TLV_IFACE1_IP6_PREFIX
        | TLV_IFACE2_INDEX | TLV_IFACE2_IP4_PREFIX | TLV_IFACE2_IP6_PREFIX => Some(SizeClass::U16),
        TLV_IFACE1_IP6 | TLV_IFACE2_IP6 => Some(SizeClass::Wide16),
        _ => None,
    }
}

impl LinkMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify);
        let mut msg = LinkMessage::default();
        let mut node1 = None;
        let mut node2 = None;
        let mut iface1 = IfaceTlvs::default();
        let mut iface2 = IfaceTlvs::default();

        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (TLV_NODE1, TlvValue::U32(v)) => node1 = Some(v),
                (TLV_NODE2, TlvValue::U32(v)) => node2 = Some(v),
                (TLV_DELAY, TlvValue::U64(v)) => msg.delay = Some(v),
                (TLV_BANDWIDTH, TlvValue::U64(v)) => msg.bandwidth = Some(v),
                (TLV_PER, TlvValue::U16(v)) => msg.per = Some(v),
                (TLV_DUP, TlvValue::U16(v)) => msg.dup = Some(v),
                (TLV_JITTER, TlvValue::U64(v)) => msg.jitter = Some(v),
                (TLV_KEY, TlvValue::U32(v)) => msg.key = Some(v),
                (TLV_NETWORK_ID, TlvValue::U32(v)) => msg.network_id = Some(v),
                (TLV_SESSION, TlvValue::U32(v)) => msg.session = Some(v),
                (TLV_IFACE1_INDEX, TlvValue::U16(v)) => iface1.index = Some(v),
                (TLV_IFACE1_IP4, v) => iface1.ip4 = v.as_ip4(),
                (TLV_IFACE1_IP4_PREFIX, TlvValue::U16(v)) => iface1.ip4_prefix = Some(v),
                (TLV_IFACE1_MAC, TlvValue::U64(v)) => iface1.mac = Some(MacAddr::from_u64(v)),
                (TLV_IFACE1_IP6, v) => iface1.ip6 = v.as_ip6(),
                (TLV_IFACE1_IP6_PREFIX, TlvValue::U16(v)) => iface1.ip6_prefix = Some(v),
                (TLV_IFACE2_INDEX, TlvValue::U16(v)) => iface2.index = Some(v),
                (TLV_IFACE2_IP4, v) => iface2.ip4 = v.as_ip4(),
                (TLV_IFACE2_IP4_PREFIX, TlvValue::U16(v)) => iface2.ip4_prefix = Some(v),
                (TLV_IFACE2_MAC, TlvValue::U64(v)) => iface2.mac = Some(MacAddr::from_u64(v)),
                (TLV_IFACE2_IP6, v) => iface2.ip6 = v.as_ip6(),
                (TLV_IFACE2_IP6_PREFIX, TlvValue::U16(v)) => iface2.ip6_prefix = Some(v),
                _ => {}
            }
        }

        msg.node1 = node1.ok_or(WireError::MissingTlv {
            message: "link",
            tlv_type: TLV_NODE1,
        })?;
        msg.node2 = node2.ok_or(WireError::MissingTlv {
            message: "link",
            tlv_type: TLV_NODE2,
        })?;
        if !iface1.is_empty() {
            msg.iface1 = Some(iface1);
        }
        if !iface2.is_empty() {
            msg.iface2 = Some(iface2);
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_u32(TLV_NODE1, self.node1);
        w.put_u32(TLV_NODE2, self.node2);
        w.put_opt_u64(TLV_DELAY, self.delay);
        w.put_opt_u64(TLV_BANDWIDTH, self.bandwidth);
        w.put_opt_u16(TLV_PER, self.per);
        w.put_opt_u16(TLV_DUP, self.dup);
        w.put_opt_u64(TLV_JITTER, self.jitter);
        w.put_opt_u32(TLV_KEY, self.key);
        w.put_opt_u32(TLV_NETWORK_ID, self.network_id);
        w.put_opt_u32(TLV_SESSION, self.session);
        if let Some(iface) = &self.iface1 {
            Self::put_iface(&mut w, iface, TLV_IFACE1_INDEX);
        }
        if let Some(iface) = &self.iface2 {
            Self::put_iface(&mut w, iface, TLV_IFACE2_INDEX);
        }
        w.finish()
    }

    // The iface2 block uses the same TLV layout as iface1, offset by 6.
    fn put_iface(w: &mut TlvWriter, iface: &IfaceTlvs, base: u8) {
        w.put_opt_u16(base, iface.index);
        w.put_opt_ip4(base + 1, iface.ip4);
        w.put_opt_u16(base + 2, iface.ip4_prefix);
        if let Some(mac) = iface.mac {
            w.put_u64(base + 3, mac.to_u64());
        }
        w.put_opt_ip6(base + 4, iface.ip6);
        w.put_opt_u16(base + 5, iface.ip6_prefix);
    }

    /// Link-effects portion of the message, for handing to the model.
    pub fn effects(&self) -> LinkEffects {
        LinkEffects {
            bandwidth: self.bandwidth,
            delay: self.delay,
            jitter: self.jitter,
            per: self.per,
            dup: self.dup,
        }
    }
}
