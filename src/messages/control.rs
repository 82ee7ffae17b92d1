//! Register, Configure, and File message TLVs.

use crate::wire::{SizeClass, TlvReader, TlvValue, TlvWriter, WireError};

// ============================================================================
// Register
// ============================================================================

pub(crate) const REG_TLV_WIRELESS: u8 = 0x01;
pub(crate) const REG_TLV_EXEC_SERVER: u8 = 0x02;
pub(crate) const REG_TLV_SESSION: u8 = 0x03;
pub(crate) const REG_TLV_EMULATION_SERVER: u8 = 0x04;

/// Peer capability announcement, sent when a channel opens, and the
/// session-join request a controller sends to attach to a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterMessage {
    /// Wireless-model capability name.
    pub wireless: Option<String>,
    /// Execution-server endpoint, for peer daemons.
    pub exec_server: Option<String>,
    /// Emulation-server name this peer serves.
    pub emulation_server: Option<String>,
    /// Pipe-separated session ids to join.
    pub session: Option<String>,
}

fn classify_register(ty: u8) -> Option<SizeClass> {
    match ty {
        REG_TLV_WIRELESS | REG_TLV_EXEC_SERVER | REG_TLV_SESSION | REG_TLV_EMULATION_SERVER => {
            Some(SizeClass::Variable)
        }
        _ => None,
    }
}

impl RegisterMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_register);
        let mut msg = RegisterMessage::default();
        while let Some((ty, value)) = reader.next()? {
            let s = value.into_string(ty)?;
            match ty {
                REG_TLV_WIRELESS => msg.wireless = Some(s),
                REG_TLV_EXEC_SERVER => msg.exec_server = Some(s),
                REG_TLV_SESSION => msg.session = Some(s),
                REG_TLV_EMULATION_SERVER => msg.emulation_server = Some(s),
                _ => {}
            }
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_string(REG_TLV_WIRELESS, self.wireless.as_deref());
        w.put_opt_string(REG_TLV_EXEC_SERVER, self.exec_server.as_deref());
        w.put_opt_string(REG_TLV_SESSION, self.session.as_deref());
        w.put_opt_string(REG_TLV_EMULATION_SERVER, self.emulation_server.as_deref());
        w.finish()
    }
}

// ============================================================================
// Configure
// ============================================================================

pub(crate) const CONF_TLV_OBJECT: u8 = 0x01;
pub(crate) const CONF_TLV_FLAGS: u8 = 0x02;
pub(crate) const CONF_TLV_DATA_TYPES: u8 = 0x03;
pub(crate) const CONF_TLV_VALUES: u8 = 0x04;
pub(crate) const CONF_TLV_CAPTIONS: u8 = 0x05;
pub(crate) const CONF_TLV_SESSION: u8 = 0x0A;
pub(crate) const CONF_TLV_NODE: u8 = 0x0B;

/// What a Configure message asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFlag {
    /// Controller asks for the current values.
    Request = 1,
    /// Controller pushes new values.
    Update = 2,
    /// Reset the object to defaults.
    Reset = 3,
}

impl ConfigFlag {
    /// Try to convert from a wire code. Unknown codes decode as absent.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ConfigFlag::Request),
            2 => Some(ConfigFlag::Update),
            3 => Some(ConfigFlag::Reset),
            _ => None,
        }
    }

    /// Wire code for this flag.
    pub fn to_code(self) -> u16 {
        self as u16
    }
}

/// Configuration exchange for a named object: session options, a
/// wireless model, or per-node service parameters. Values travel as a
/// pipe-separated `key=value` list with a parallel data-type array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigureMessage {
    /// Configuration object name, e.g. `session` or `services`.
    pub object: Option<String>,
    pub config_flags: Option<ConfigFlag>,
    /// Per-value type codes, parallel to `values`.
    pub data_types: Option<Vec<u16>>,
    /// Pipe-separated `key=value` pairs.
    pub values: Option<String>,
    /// Pipe-separated display captions.
    pub captions: Option<String>,
    pub session: Option<u32>,
    pub node: Option<u32>,
}

fn classify_configure(ty: u8) -> Option<SizeClass> {
    match ty {
        CONF_TLV_FLAGS => Some(SizeClass::U16),
        CONF_TLV_SESSION | CONF_TLV_NODE => Some(SizeClass::U32),
        CONF_TLV_OBJECT | CONF_TLV_DATA_TYPES | CONF_TLV_VALUES | CONF_TLV_CAPTIONS => {
            Some(SizeClass::Variable)
        }
        _ => None,
    }
}

impl ConfigureMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_configure);
        let mut msg = ConfigureMessage::default();
        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (CONF_TLV_OBJECT, v) => msg.object = Some(v.into_string(CONF_TLV_OBJECT)?),
                (CONF_TLV_FLAGS, TlvValue::U16(v)) => msg.config_flags = ConfigFlag::from_code(v),
                (CONF_TLV_DATA_TYPES, TlvValue::Bytes(bytes)) => {
                    if bytes.len() % 2 != 0 {
                        return Err(WireError::BadTlvLength {
                            tlv_type: CONF_TLV_DATA_TYPES,
                            expected: bytes.len() + 1,
                            got: bytes.len(),
                        });
                    }
                    msg.data_types = Some(
                        bytes
                            .chunks_exact(2)
                            .map(|c| u16::from_be_bytes([c[0], c[1]]))
                            .collect(),
                    );
                }
                (CONF_TLV_VALUES, v) => msg.values = Some(v.into_string(CONF_TLV_VALUES)?),
                (CONF_TLV_CAPTIONS, v) => msg.captions = Some(v.into_string(CONF_TLV_CAPTIONS)?),
                (CONF_TLV_SESSION, TlvValue::U32(v)) => msg.session = Some(v),
                (CONF_TLV_NODE, TlvValue::U32(v)) => msg.node = Some(v),
                _ => {}
            }
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_string(CONF_TLV_OBJECT, self.object.as_deref());
        if let Some(flags) = self.config_flags {
            w.put_u16(CONF_TLV_FLAGS, flags.to_code());
        }
        if let Some(types) = &self.data_types {
            let mut bytes = Vec::with_capacity(types.len() * 2);
            for t in types {
                bytes.extend_from_slice(&t.to_be_bytes());
            }
            w.put_bytes(CONF_TLV_DATA_TYPES, &bytes);
        }
        w.put_opt_string(CONF_TLV_VALUES, self.values.as_deref());
        w.put_opt_string(CONF_TLV_CAPTIONS, self.captions.as_deref());
        w.put_opt_u32(CONF_TLV_SESSION, self.session);
        w.put_opt_u32(CONF_TLV_NODE, self.node);
        w.finish()
    }
}

// ============================================================================
// File
// ============================================================================

pub(crate) const FILE_TLV_NODE: u8 = 0x01;
pub(crate) const FILE_TLV_NAME: u8 = 0x02;
pub(crate) const FILE_TLV_MODE: u8 = 0x03;
pub(crate) const FILE_TLV_TYPE: u8 = 0x04;
pub(crate) const FILE_TLV_SOURCE: u8 = 0x05;
pub(crate) const FILE_TLV_SESSION: u8 = 0x0A;
pub(crate) const FILE_TLV_DATA: u8 = 0x10;

/// Pushes a customized file onto a node, typically a service
/// configuration. File contents are carried verbatim and never
/// interpreted by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMessage {
    pub node: Option<u32>,
    /// Destination path on the node.
    pub name: Option<String>,
    /// Octal mode string, e.g. `0644`.
    pub mode: Option<String>,
    /// Owning service, as `service:<name>`.
    pub file_type: Option<String>,
    /// Source path, when copying instead of inlining.
    pub source: Option<String>,
    /// Inline file contents.
    pub data: Option<String>,
    pub session: Option<u32>,
}

fn classify_file(ty: u8) -> Option<SizeClass> {
    match ty {
        FILE_TLV_NODE | FILE_TLV_SESSION => Some(SizeClass::U32),
        FILE_TLV_NAME | FILE_TLV_MODE | FILE_TLV_TYPE | FILE_TLV_SOURCE | FILE_TLV_DATA => {
            Some(SizeClass::Variable)
        }
        _ => None,
    }
}

impl FileMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_file);
        let mut msg = FileMessage::default();
        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (FILE_TLV_NODE, TlvValue::U32(v)) => msg.node = Some(v),
                (FILE_TLV_NAME, v) => msg.name = Some(v.into_string(FILE_TLV_NAME)?),
                (FILE_TLV_MODE, v) => msg.mode = Some(v.into_string(FILE_TLV_MODE)?),
                (FILE_TLV_TYPE, v) => msg.file_type = Some(v.into_string(FILE_TLV_TYPE)?),
                (FILE_TLV_SOURCE, v) => msg.source = Some(v.into_string(FILE_TLV_SOURCE)?),
                (FILE_TLV_DATA, v) => msg.data = Some(v.into_string(FILE_TLV_DATA)?),
                (FILE_TLV_SESSION, TlvValue::U32(v)) => msg.session = Some(v),
                _ => {}
            }
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_u32(FILE_TLV_NODE, self.node);
        w.put_opt_string(FILE_TLV_NAME, self.name.as_deref());
        w.put_opt_string(FILE_TLV_MODE, self.mode.as_deref());
        w.put_opt_string(FILE_TLV_TYPE, self.file_type.as_deref());
        w.put_opt_string(FILE_TLV_SOURCE, self.source.as_deref());
        w.put_opt_string(FILE_TLV_DATA, self.data.as_deref());
        w.put_opt_u32(FILE_TLV_SESSION, self.session);
        w.finish()
    }
}
