//! Event, Session, and Exception message TLVs.

use crate::session::EventKind;
use crate::wire::{SizeClass, TlvReader, TlvValue, TlvWriter, WireError};
use std::fmt;

// ============================================================================
// Event
// ============================================================================

pub(crate) const EVT_TLV_NODE: u8 = 0x01;
pub(crate) const EVT_TLV_TYPE: u8 = 0x02;
pub(crate) const EVT_TLV_NAME: u8 = 0x03;
pub(crate) const EVT_TLV_DATA: u8 = 0x04;
pub(crate) const EVT_TLV_TIME: u8 = 0x05;
pub(crate) const EVT_TLV_SESSION: u8 = 0x0A;

/// A lifecycle event: a state-transition request (or notification), a
/// hook-script definition, or a scheduled sub-event. The event type is
/// the only required TLV.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMessage {
    pub event_type: EventKind,
    pub node: Option<u32>,
    /// Event name; for hook definitions this is the script file name.
    pub name: Option<String>,
    /// Event payload; for hook definitions this is the script body.
    pub data: Option<String>,
    /// Scheduled time, seconds from session start.
    pub time: Option<String>,
    pub session: Option<u32>,
}

fn classify_event(ty: u8) -> Option<SizeClass> {
    match ty {
        EVT_TLV_NODE | EVT_TLV_TYPE | EVT_TLV_SESSION => Some(SizeClass::U32),
        EVT_TLV_NAME | EVT_TLV_DATA | EVT_TLV_TIME => Some(SizeClass::Variable),
        _ => None,
    }
}

impl EventMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_event);
        let mut event_type = None;
        let mut node = None;
        let mut name = None;
        let mut data = None;
        let mut time = None;
        let mut session = None;

        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (EVT_TLV_NODE, TlvValue::U32(v)) => node = Some(v),
                (EVT_TLV_TYPE, TlvValue::U32(v)) => {
                    event_type =
                        Some(EventKind::from_code(v).ok_or(WireError::UnknownEventType(v))?);
                }
                (EVT_TLV_NAME, v) => name = Some(v.into_string(EVT_TLV_NAME)?),
                (EVT_TLV_DATA, v) => data = Some(v.into_string(EVT_TLV_DATA)?),
                (EVT_TLV_TIME, v) => time = Some(v.into_string(EVT_TLV_TIME)?),
                (EVT_TLV_SESSION, TlvValue::U32(v)) => session = Some(v),
                _ => {}
            }
        }

        let event_type = event_type.ok_or(WireError::MissingTlv {
            message: "event",
            tlv_type: EVT_TLV_TYPE,
        })?;
        Ok((
            EventMessage {
                event_type,
                node,
                name,
                data,
                time,
                session,
            },
            reader.ignored().to_vec(),
        ))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_u32(EVT_TLV_NODE, self.node);
        w.put_u32(EVT_TLV_TYPE, self.event_type.to_code());
        w.put_opt_string(EVT_TLV_NAME, self.name.as_deref());
        w.put_opt_string(EVT_TLV_DATA, self.data.as_deref());
        w.put_opt_string(EVT_TLV_TIME, self.time.as_deref());
        w.put_opt_u32(EVT_TLV_SESSION, self.session);
        w.finish()
    }
}

// ============================================================================
// Session
// ============================================================================

pub(crate) const SES_TLV_NUMBERS: u8 = 0x01;
pub(crate) const SES_TLV_NAMES: u8 = 0x02;
pub(crate) const SES_TLV_FILES: u8 = 0x03;
pub(crate) const SES_TLV_NODE_COUNTS: u8 = 0x04;
pub(crate) const SES_TLV_DATE: u8 = 0x05;
pub(crate) const SES_TLV_USER: u8 = 0x07;

/// Session listing and session management. Parallel pipe-separated
/// lists: entry N of each populated field describes session N of the
/// listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionMessage {
    /// Pipe-separated session ids.
    pub numbers: Option<String>,
    pub names: Option<String>,
    pub files: Option<String>,
    pub node_counts: Option<String>,
    pub date: Option<String>,
    pub user: Option<String>,
}

fn classify_session(ty: u8) -> Option<SizeClass> {
    match ty {
        SES_TLV_NUMBERS | SES_TLV_NAMES | SES_TLV_FILES | SES_TLV_NODE_COUNTS | SES_TLV_DATE
        | SES_TLV_USER => Some(SizeClass::Variable),
        _ => None,
    }
}

impl SessionMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_session);
        let mut msg = SessionMessage::default();
        while let Some((ty, value)) = reader.next()? {
            let s = value.into_string(ty)?;
            match ty {
                SES_TLV_NUMBERS => msg.numbers = Some(s),
                SES_TLV_NAMES => msg.names = Some(s),
                SES_TLV_FILES => msg.files = Some(s),
                SES_TLV_NODE_COUNTS => msg.node_counts = Some(s),
                SES_TLV_DATE => msg.date = Some(s),
                SES_TLV_USER => msg.user = Some(s),
                _ => {}
            }
        }
        Ok((msg, reader.ignored().to_vec()))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_string(SES_TLV_NUMBERS, self.numbers.as_deref());
        w.put_opt_string(SES_TLV_NAMES, self.names.as_deref());
        w.put_opt_string(SES_TLV_FILES, self.files.as_deref());
        w.put_opt_string(SES_TLV_NODE_COUNTS, self.node_counts.as_deref());
        w.put_opt_string(SES_TLV_DATE, self.date.as_deref());
        w.put_opt_string(SES_TLV_USER, self.user.as_deref());
        w.finish()
    }
}

// ============================================================================
// Exception
// ============================================================================

pub(crate) const EXC_TLV_NODE: u8 = 0x01;
pub(crate) const EXC_TLV_SESSION: u8 = 0x02;
pub(crate) const EXC_TLV_LEVEL: u8 = 0x03;
pub(crate) const EXC_TLV_SOURCE: u8 = 0x04;
pub(crate) const EXC_TLV_DATE: u8 = 0x05;
pub(crate) const EXC_TLV_TEXT: u8 = 0x06;

/// Severity of a reported exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionLevel {
    Fatal = 1,
    Error = 2,
    Warning = 3,
    Notice = 4,
}

impl ExceptionLevel {
    /// Try to convert from a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ExceptionLevel::Fatal),
            2 => Some(ExceptionLevel::Error),
            3 => Some(ExceptionLevel::Warning),
            4 => Some(ExceptionLevel::Notice),
            _ => None,
        }
    }

    /// Wire code for this level.
    pub fn to_code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ExceptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionLevel::Fatal => "fatal",
            ExceptionLevel::Error => "error",
            ExceptionLevel::Warning => "warning",
            ExceptionLevel::Notice => "notice",
        };
        write!(f, "{}", name)
    }
}

/// Out-of-band error report pushed to controllers. The level is the
/// only required TLV.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionMessage {
    pub level: ExceptionLevel,
    pub node: Option<u32>,
    pub session: Option<u32>,
    /// Subsystem that raised the exception.
    pub source: Option<String>,
    pub date: Option<String>,
    pub text: Option<String>,
}

impl ExceptionMessage {
    /// Build an exception report from a subsystem.
    pub fn new(level: ExceptionLevel, source: &str, text: String) -> Self {
        Self {
            level,
            node: None,
            session: None,
            source: Some(source.to_string()),
            date: None,
            text: Some(text),
        }
    }

    /// Scope the report to a session.
    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    /// Scope the report to a node.
    pub fn with_node(mut self, node: u32) -> Self {
        self.node = Some(node);
        self
    }
}

fn classify_exception(ty: u8) -> Option<SizeClass> {
    match ty {
        EXC_TLV_NODE | EXC_TLV_SESSION | EXC_TLV_LEVEL => Some(SizeClass::U32),
        EXC_TLV_SOURCE | EXC_TLV_DATE | EXC_TLV_TEXT => Some(SizeClass::Variable),
        _ => None,
    }
}

impl ExceptionMessage {
    /// Decode from a message payload, returning the skipped TLV types
    /// alongside.
    pub fn from_payload(payload: &[u8]) -> Result<(Self, Vec<u8>), WireError> {
        let mut reader = TlvReader::new(payload, classify_exception);
        let mut level = None;
        let mut node = None;
        let mut session = None;
        let mut source = None;
        let mut date = None;
        let mut text = None;

        while let Some((ty, value)) = reader.next()? {
            match (ty, value) {
                (EXC_TLV_NODE, TlvValue::U32(v)) => node = Some(v),
                (EXC_TLV_SESSION, TlvValue::U32(v)) => session = Some(v),
                (EXC_TLV_LEVEL, TlvValue::U32(v)) => {
                    level = Some(
                        ExceptionLevel::from_code(v).ok_or(WireError::UnknownExceptionLevel(v))?,
                    );
                }
                (EXC_TLV_SOURCE, v) => source = Some(v.into_string(EXC_TLV_SOURCE)?),
                (EXC_TLV_DATE, v) => date = Some(v.into_string(EXC_TLV_DATE)?),
                (EXC_TLV_TEXT, v) => text = Some(v.into_string(EXC_TLV_TEXT)?),
                _ => {}
            }
        }

        let level = level.ok_or(WireError::MissingTlv {
            message: "exception",
            tlv_type: EXC_TLV_LEVEL,
        })?;
        Ok((
            ExceptionMessage {
                level,
                node,
                session,
                source,
                date,
                text,
            },
            reader.ignored().to_vec(),
        ))
    }

    /// Encode into TLV payload bytes.
    pub fn to_tlvs(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.put_opt_u32(EXC_TLV_NODE, self.node);
        w.put_opt_u32(EXC_TLV_SESSION, self.session);
        w.put_u32(EXC_TLV_LEVEL, self.level.to_code());
        w.put_opt_string(EXC_TLV_SOURCE, self.source.as_deref());
        w.put_opt_string(EXC_TLV_DATE, self.date.as_deref());
        w.put_opt_string(EXC_TLV_TEXT, self.text.as_deref());
        w.finish()
    }
}
