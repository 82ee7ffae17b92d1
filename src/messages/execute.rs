//! Execute message TLVs.

use crate::wire::{SizeClass, TlvReader, TlvValue, TlvWriter, WireError};

pub(crate) const TLV_NODE: u8 = 0x01;
pub(crate) const TLV_EXEC_NUM: u8 = 0x02;
pub(crate) const TLV_TIME: u8 = 0x03;
pub(crate) const TLV_COMMAND: u8 = 0x04;
pub(crate) const TLV_RESULT: u8 = 0x05;
pub(crate) const TLV_STATUS: u8 = 0x06;
pub(crate) const TLV_SESSION: u8 = 0x0A;

/// A command-execution request or its response. Requests carry the
/// command; responses echo the execution number with result text and
/// exit status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecuteMessage {
    pub node: u32,
    pub exec_num: u32,
    /// Timeout in seconds.
    pub time: Option<u32>,
    pub command: Option<String>,
    pub result: Option<String>,
    pub status: Option<u32>,
    pub session: Option<u32>,
}

fn classify(ty: u8) -> Option<SizeClass> {
    match ty {
        TLV_NODE | TLV_EXEC_NUM | TLV_TIME | TLV_STATUS | TLV_SESSION => Some(SizeClass::U32),
        TLV_COMMAND | TLV_RESULT => Some(SizeClass::Variable),
        _ => None,
    }
}

impl ExecuteMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify);
        let mut msg = ExecuteMessage::default();
        let mut node = None;

        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (TLV_NODE, TlvValue::U32(v)) => node = Some(v),
                (TLV_EXEC_NUM, TlvValue::U32(v)) => msg.exec_num = v,
                (TLV_TIME, TlvValue::U32(v)) => msg.time = Some(v),
                (TLV_COMMAND, v) => msg.command = Some(v.into_string(TLV_COMMAND)?),
                (TLV_RESULT, v) => msg.result = Some(v.into_string(TLV_RESULT)?),
                (TLV_STATUS, TlvValue::U32(v)) => msg.status = Some(v),
                (TLV_SESSION, TlvValue::U32(v)) => msg.session = Some(v),
                _ => {}
            }
        }

        msg.node = node.ok_or(WireError::MissingTlv {
            message: "execute",
            tlv_type: TLV_NODE,
        })?;
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_u32(TLV_NODE, self.node);
        w.put_u32(TLV_EXEC_NUM, self.exec_num);
        w.put_opt_u32(TLV_TIME, self.time);
        w.put_opt_string(TLV_COMMAND, self.command.as_deref());
        w.put_opt_string(TLV_RESULT, self.result.as_deref());
        w.put_opt_u32(TLV_STATUS, self.status);
        w.put_opt_u32(TLV_SESSION, self.session);
        w.finish()
    }
}
