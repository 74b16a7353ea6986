//! Network module - Moves packets between a host and its clients
//!
//! Provides:
//! - The [`Network`] core shared by host and client roles
//! - The transport contract and its TCP and in-process implementations

mod memory;
mod node;
mod tcp;
mod transport;

pub use memory::*;
pub use node::*;
pub use tcp::*;
pub use transport::*;

use crate::protocol::{DEFAULT_BUFFER_SIZE, DEFAULT_HEADER_SIZE, PROTOCOL_VERSION};

/// Sizing and admission settings of a [`Network`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Size of one frame on the wire
    pub buffer_size: usize,
    /// Bytes reserved for the header block in every frame
    pub header_size: usize,
    /// Value of the `ver` header; hosts reject clients announcing another
    pub protocol_version: i32,
    /// Hosts refuse clients beyond this many
    pub max_clients: Option<usize>,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
            protocol_version: PROTOCOL_VERSION,
            max_clients: None,
        }
    }
}

impl NetworkOptions {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_header_size(mut self, header_size: usize) -> Self {
        self.header_size = header_size;
        self
    }

    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = Some(max_clients);
        self
    }
}
