//! Node message TLVs.

use crate::model::{MacAddr, NodeType};
use crate::wire::{SizeClass, TlvReader, TlvValue, TlvWriter, WireError};
use std::net::{Ipv4Addr, Ipv6Addr};

pub(crate) const TLV_NUMBER: u8 = 0x01;
pub(crate) const TLV_TYPE: u8 = 0x02;
pub(crate) const TLV_NAME: u8 = 0x03;
pub(crate) const TLV_IP4: u8 = 0x04;
pub(crate) const TLV_MAC: u8 = 0x05;
pub(crate) const TLV_IP6: u8 = 0x06;
pub(crate) const TLV_IP4_PREFIX: u8 = 0x07;
pub(crate) const TLV_IP6_PREFIX: u8 = 0x08;
pub(crate) const TLV_SERVER: u8 = 0x09;
pub(crate) const TLV_SESSION: u8 = 0x0A;
pub(crate) const TLV_X: u8 = 0x20;
pub(crate) const TLV_Y: u8 = 0x21;
pub(crate) const TLV_EMULATION_ID: u8 = 0x23;
pub(crate) const TLV_NETWORK_ID: u8 = 0x24;
pub(crate) const TLV_SERVICES: u8 = 0x25;

/// A node create/modify/delete request, or a node status notification
/// sent back to controllers. The node number is the only required TLV.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeMessage {
    pub number: u32,
    pub node_type: Option<NodeType>,
    pub name: Option<String>,
    pub ip4: Option<Ipv4Addr>,
    pub ip4_prefix: Option<u16>,
    pub ip6: Option<Ipv6Addr>,
    pub ip6_prefix: Option<u16>,
    pub mac: Option<MacAddr>,
    pub server: Option<String>,
    pub session: Option<u32>,
    /// Canvas position, for display only.
    pub position: Option<(u16, u16)>,
    /// Pipe-separated service names.
    pub services: Option<String>,
    /// Platform-assigned emulation id, reported back after deployment.
    pub emulation_id: Option<u32>,
    pub network_id: Option<u32>,
}

fn classify(ty: u8) -> Option<SizeClass> {
    match ty {
        TLV_NUMBER | TLV_TYPE | TLV_IP4 | TLV_SESSION | TLV_EMULATION_ID | TLV_NETWORK_ID => {
            Some(SizeClass::U32)
        }
        TLV_MAC => Some(SizeClass::U64),
        TLV_IP6 => Some(SizeClass::Wide16),
        TLV_IP4_PREFIX | TLV_IP6_PREFIX | TLV_X | TLV_Y => Some(SizeClass::U16),
        TLV_NAME | TLV_SERVER | TLV_SERVICES => Some(SizeClass::Variable),
        _ => None,
    }
}

impl NodeMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify);
        let mut msg = NodeMessage::default();
        let mut number = None;
        let mut x = None;
        let mut y = None;

        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (TLV_NUMBER, TlvValue::U32(v)) => number = Some(v),
                (TLV_TYPE, TlvValue::U32(v)) => {
                    msg.node_type =
                        Some(NodeType::from_code(v).ok_or(WireError::UnknownNodeType(v))?);
                }
                (TLV_NAME, v) => msg.name = Some(v.into_string(TLV_NAME)?),
                (TLV_IP4, v) => msg.ip4 = v.as_ip4(),
                (TLV_MAC, TlvValue::U64(v)) => msg.mac = Some(MacAddr::from_u64(v)),
                (TLV_IP6, v) => msg.ip6 = v.as_ip6(),
                (TLV_IP4_PREFIX, TlvValue::U16(v)) => msg.ip4_prefix = Some(v),
                (TLV_IP6_PREFIX, TlvValue::U16(v)) => msg.ip6_prefix = Some(v),
                (TLV_SERVER, v) => msg.server = Some(v.into_string(TLV_SERVER)?),
                (TLV_SESSION, TlvValue::U32(v)) => msg.session = Some(v),
                (TLV_X, TlvValue::U16(v)) => x = Some(v),
                (TLV_Y, TlvValue::U16(v)) => y = Some(v),
                (TLV_EMULATION_ID, TlvValue::U32(v)) => msg.emulation_id = Some(v),
                (TLV_NETWORK_ID, TlvValue::U32(v)) => msg.network_id = Some(v),
                (TLV_SERVICES, v) => msg.services = Some(v.into_string(TLV_SERVICES)?),
                _ => {}
            }
        }

        msg.number = number.ok_or(WireError::MissingTlv {
            message: "node",
            tlv_type: TLV_NUMBER,
        })?;
        if let (Some(x), Some(y)) = (x, y) {
            msg.position = Some((x, y));
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_u32(TLV_NUMBER, self.number);
        if let Some(ty) = self.node_type {
            w.put_u32(TLV_TYPE, ty.to_code());
        }
        w.put_opt_string(TLV_NAME, self.name.as_deref());
        w.put_opt_ip4(TLV_IP4, self.ip4);
        if let Some(mac) = self.mac {
            w.put_u64(TLV_MAC, mac.to_u64());
        }
        w.put_opt_ip6(TLV_IP6, self.ip6);
        w.put_opt_u16(TLV_IP4_PREFIX, self.ip4_prefix);
        w.put_opt_u16(TLV_IP6_PREFIX, self.ip6_prefix);
        w.put_opt_string(TLV_SERVER, self.server.as_deref());
        w.put_opt_u32(TLV_SESSION, self.session);
        if let Some((x, y)) = self.position {
            w.put_u16(TLV_X, x);
            w.put_u16(TLV_Y, y);
        }
        w.put_opt_u32(TLV_EMULATION_ID, self.emulation_id);
        w.put_opt_u32(TLV_NETWORK_ID, self.network_id);
        w.put_opt_string(TLV_SERVICES, self.services.as_deref());
        w.finish()
    }
}
