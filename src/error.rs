//! Error types and the diagnostics channel
//!
//! Fatal problems are returned as [`SyncError`]. Problems found while
//! processing incoming packets cannot be returned to anyone, so they go
//! through [`Diagnostics`], which also mirrors everything into `tracing`.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::network::TransportError;
use crate::protocol::CodecError;
use crate::serialize::{FieldError, ParseError};

/// Library errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Type {0} has no registered factory")]
    NoFactory(String),

    #[error("Circular reference on non-registrable object of type {0}")]
    CircularReference(String),

    #[error("Unresolved reference {{{0}}}")]
    UnresolvedReference(String),

    #[error("Type {0} does not carry a network identity")]
    NotRegistrable(String),

    #[error("Could not obtain a network id for type {0}")]
    IdAssignmentFailed(String),

    #[error("Remote fetch attempted on the transport delivery thread")]
    FetchOnDeliveryThread,

    #[error("No remote peer is available")]
    NoRemote,

    #[error("No marshaller configured and direct dispatch is not enabled")]
    NoMarshaller,

    #[error("Object {0} is not registered")]
    NotRegistered(String),

    #[error("Object {0} is not a collection")]
    NotACollection(String),

    #[error("No parser registered for packet code {0}")]
    NoParser(i32),

    #[error("Handler failed: {0}")]
    Handler(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Callback receiving fatal errors raised while processing packets
pub type ExceptionCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Callback receiving warning or notification messages
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Exception, warning and notification channels
#[derive(Default)]
pub struct Diagnostics {
    on_exception: RwLock<Option<ExceptionCallback>>,
    on_warning: RwLock<Option<MessageCallback>>,
    on_notification: RwLock<Option<MessageCallback>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exception_handler(&self, callback: impl Fn(&SyncError) + Send + Sync + 'static) {
        *self.on_exception.write() = Some(Arc::new(callback));
    }

    pub fn set_warning_handler(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_warning.write() = Some(Arc::new(callback));
    }

    pub fn set_notification_handler(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_notification.write() = Some(Arc::new(callback));
    }

    /// Report a fatal error. Without a subscriber the error is logged.
    pub fn exception(&self, error: &SyncError) {
        let callback = self.on_exception.read().clone();
        match callback {
            Some(callback) => {
                tracing::debug!("Exception: {}", error);
                callback(error);
            }
            None => tracing::error!("Unhandled exception: {}", error),
        }
    }

    /// Report a recoverable anomaly
    pub fn warning(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{}", message);
        let callback = self.on_warning.read().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    /// Report an informational event
    pub fn notification(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!("{}", message);
        let callback = self.on_notification.read().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}
