//! Protocol module - Defines the wire protocol for PeerSync communication
//!
//! Every frame uses a fixed binary envelope:
//! - 4 bytes frame length (big-endian, bytes after the length itself)
//! - 4 bytes packet code (big-endian)
//! - Fixed size header block (default 128 bytes)
//! - UTF-8 payload
//!
//! Payloads larger than one frame are split into continuation frames
//! carrying [`CoreCode::LongData`] and reassembled per source connection.

mod codec;
mod header;
mod packet;

pub use codec::*;
pub use header::*;
pub use packet::*;

/// Protocol version written into the default `ver` header entry
pub const PROTOCOL_VERSION: i32 = 1;

/// Name of the header entry carrying the protocol version
pub const VERSION_HEADER: &str = "ver";

/// Default port for PeerSync communication
pub const DEFAULT_PORT: u16 = 24810;

/// Default size of a whole frame on the wire
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default size of the fixed header block
pub const DEFAULT_HEADER_SIZE: usize = 128;

/// Bytes taken by the frame length and packet code fields
pub const ENVELOPE_SIZE: usize = 8;
