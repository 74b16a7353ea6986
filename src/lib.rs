//! PeerSync - Host/client object graph synchronization
//!
//! A host and its clients keep a shared graph of registered objects in
//! step. Property and collection mutations are mirrored to every peer, and
//! objects or fresh identifiers can be fetched from the other side with a
//! blocking request.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod serialize;
pub mod sync;

pub use dispatch::{Marshaller, NetworkEvent, WorkerMarshaller};
pub use error::{Diagnostics, SyncError, SyncResult};
pub use network::{MemoryTransport, Network, NetworkOptions, SendOptions, TcpTransport};
pub use protocol::{ConnectionId, CoreCode, Packet};
pub use registry::{Registry, Role};
pub use serialize::{NetworkObject, ObjectRef, Value};
