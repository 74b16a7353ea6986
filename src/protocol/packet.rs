//! Packet definitions
//!
//! A packet is the decoded unit handed to the dispatch core: a code, the
//! header entries and the reassembled payload string.

use std::fmt;

use super::Header;

/// Reserved packet codes used by the library itself.
///
/// Application codes are free to use any other `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CoreCode {
    Noop = -777,
    Disconnected = -776,
    NewClientConnected = -775,
    PropertyUpdated = -774,
    CollectionChanged = -773,
    PreviewPacket = -772,
    PreviewPropertyUpdated = -771,
    PreviewCollectionChanged = -770,
    NetworkDataRequest = -769,
    NetworkDataRequestResponse = -768,
    LongData = -767,
    AssignNewHeaderValue = -765,
}

impl CoreCode {
    /// All reserved codes
    pub const ALL: [CoreCode; 12] = [
        CoreCode::Noop,
        CoreCode::Disconnected,
        CoreCode::NewClientConnected,
        CoreCode::PropertyUpdated,
        CoreCode::CollectionChanged,
        CoreCode::PreviewPacket,
        CoreCode::PreviewPropertyUpdated,
        CoreCode::PreviewCollectionChanged,
        CoreCode::NetworkDataRequest,
        CoreCode::NetworkDataRequestResponse,
        CoreCode::LongData,
        CoreCode::AssignNewHeaderValue,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }
}

impl From<CoreCode> for i32 {
    fn from(code: CoreCode) -> Self {
        code as i32
    }
}

/// Opaque transport level handle identifying one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A decoded network packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet code (reserved [`CoreCode`] or application defined)
    pub code: i32,
    /// Serialized body
    pub payload: String,
    /// Out-of-band header entries
    pub header: Header,
    /// Connection the packet arrived on, `None` for locally created packets
    pub source: Option<ConnectionId>,
}

impl Packet {
    pub fn new(code: impl Into<i32>, payload: impl Into<String>, header: Header) -> Self {
        Self {
            code: code.into(),
            payload: payload.into(),
            header,
            source: None,
        }
    }

    /// Attach the source connection
    pub fn with_source(mut self, source: ConnectionId) -> Self {
        self.source = Some(source);
        self
    }

    /// The reserved code of this packet, if it carries one
    pub fn core_code(&self) -> Option<CoreCode> {
        CoreCode::from_code(self.code)
    }

    pub fn is(&self, code: CoreCode) -> bool {
        self.code == code.code()
    }
}
