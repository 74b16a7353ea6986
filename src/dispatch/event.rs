//! Decoded events handed to packet handlers

use std::fmt;

use crate::protocol::{ConnectionId, HeaderEntry, Packet};
use crate::serialize::{CollectionChange, ObjectRef, Value};
use crate::sync::RequestState;

/// Body of a decoded packet
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    None,
    Value(Value),
    Collection(CollectionChange),
    Request(RequestState),
    Header(HeaderEntry),
}

/// A packet together with what its parser extracted from it
#[derive(Clone)]
pub struct NetworkEvent {
    pub packet: Packet,
    /// Network id the packet addresses, for mutation packets
    pub target_id: Option<String>,
    /// Resolved local instance of `target_id`
    pub target: Option<ObjectRef>,
    /// Mutated property, for property updates
    pub property: Option<String>,
    pub data: EventData,
    /// Set by a handler to stop further handlers for this packet
    pub handled: bool,
}

impl NetworkEvent {
    pub fn new(packet: Packet, data: EventData) -> Self {
        Self {
            packet,
            target_id: None,
            target: None,
            property: None,
            data,
            handled: false,
        }
    }

    pub fn with_target(mut self, target: ObjectRef, target_id: impl Into<String>) -> Self {
        self.target = Some(target);
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn code(&self) -> i32 {
        self.packet.code
    }

    pub fn source(&self) -> Option<ConnectionId> {
        self.packet.source
    }

    /// Decoded value, for generic and property packets
    pub fn value(&self) -> Option<&Value> {
        match &self.data {
            EventData::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Debug for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEvent")
            .field("code", &self.packet.code)
            .field("source", &self.packet.source)
            .field("target_id", &self.target_id)
            .field("property", &self.property)
            .field("data", &self.data)
            .field("handled", &self.handled)
            .finish()
    }
}
