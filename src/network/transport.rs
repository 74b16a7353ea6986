//! Transport contract
//!
//! A transport moves whole frames between connections and reports what
//! happens on them. It never looks inside a frame.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::{CodecError, ConnectionId};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Connecting to {0} timed out")]
    Timeout(String),

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Could not resolve {0}")]
    Unresolved(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Outbound side of a transport
pub trait Transport: Send + Sync {
    /// Queue one frame for `target`. Frames to one target keep their order.
    fn send(&self, target: ConnectionId, frame: Bytes) -> TransportResult<()>;

    /// Close the connection to `target`. Both ends see a disconnect.
    fn disconnect(&self, target: ConnectionId) -> TransportResult<()>;
}

/// Inbound side of a transport, implemented by the network core
pub trait TransportEvents: Send + Sync {
    /// A connection is ready
    fn on_connected(&self, _peer: ConnectionId) {}

    /// One complete frame arrived
    fn on_packet_received(&self, peer: ConnectionId, frame: Bytes);

    /// The connection is gone
    fn on_disconnected(&self, peer: ConnectionId, reason: &str);

    fn on_error(&self, peer: Option<ConnectionId>, error: TransportError);
}
