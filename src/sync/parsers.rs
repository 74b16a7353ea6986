//! Payload parsers for the reserved mutation and request packets
//!
//! - `PropertyUpdated`: `<id>:<property>:<value>`
//! - `CollectionChanged`: `<id>:<action>:<newIndex>:<oldIndex>:<oldCount>:<items>`
//! - `NetworkDataRequest` and its response: an encoded [`NetworkRequest`]
//! - `AssignNewHeaderValue`: `<name>:<value>`

use std::sync::Arc;

use crate::dispatch::{EventData, NetworkEvent, PacketParser, ParseArgs};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{HeaderEntry, HeaderValue, Packet};
use crate::registry::Registry;
use crate::serialize::{
    downcast, encode, network_id_of, CollectionAction, CollectionChange, Decoder, Encoder,
    FetchPolicy, ObjectRef, ParseError, Value,
};

use super::request::NetworkRequest;

fn segments(payload: &str, expected: usize) -> Result<Vec<&str>, ParseError> {
    let parts: Vec<&str> = payload.splitn(expected, ':').collect();
    if parts.len() != expected {
        return Err(ParseError::Segments {
            expected,
            actual: parts.len(),
        });
    }
    Ok(parts)
}

fn number(text: &str) -> Result<i32, ParseError> {
    text.parse().map_err(|_| ParseError::InvalidLiteral {
        type_name: "Int32".to_string(),
        text: text.to_string(),
    })
}

fn target_of(target: Option<&ObjectRef>) -> SyncResult<&ObjectRef> {
    target.ok_or_else(|| SyncError::NotRegistered("<none>".to_string()))
}

/// Registered target of a mutation, or a notification when it is unknown here
fn lookup(registry: &Registry, network_id: &str, code: i32) -> Option<ObjectRef> {
    let target = registry.get(network_id);
    if target.is_none() {
        registry.diagnostics().notification(format!(
            "Packet {} addresses unregistered object {}",
            code, network_id
        ));
    }
    target
}

/// `PropertyUpdated` payloads
#[derive(Debug, Default)]
pub struct PropertyParser;

impl PacketParser for PropertyParser {
    fn encode(&self, registry: &Registry, target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String> {
        let target = target_of(target)?;
        let ParseArgs::Property(property) = args else {
            return Err(SyncError::Handler("property update needs a property name".to_string()));
        };
        let value = target.get(property).unwrap_or(Value::Null);
        Ok(format!(
            "{}:{}:{}",
            network_id_of(target.as_ref()),
            property,
            encode(registry, &value)?
        ))
    }

    fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
        let parts = segments(&packet.payload, 3)?;
        let Some(target) = lookup(registry, parts[0], packet.code) else {
            return Ok(None);
        };
        let value = Decoder::new(registry).decode(parts[2])?;
        Ok(Some(
            NetworkEvent::new(packet.clone(), EventData::Value(value))
                .with_target(target, parts[0])
                .with_property(parts[1]),
        ))
    }
}

/// `CollectionChanged` payloads
#[derive(Debug, Default)]
pub struct CollectionParser;

impl PacketParser for CollectionParser {
    fn encode(&self, registry: &Registry, target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String> {
        let target = target_of(target)?;
        let ParseArgs::Collection(change) = args else {
            return Err(SyncError::Handler("collection change needs its change record".to_string()));
        };
        Ok(format!(
            "{}:{}:{}:{}:{}:{}",
            network_id_of(target.as_ref()),
            change.action,
            change.new_index,
            change.old_index,
            change.old_count,
            encode(registry, &Value::objects(change.items.clone()))?
        ))
    }

    fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
        let parts = segments(&packet.payload, 6)?;
        let action: CollectionAction = parts[1]
            .parse()
            .map_err(ParseError::Malformed)?;
        let Some(target) = lookup(registry, parts[0], packet.code) else {
            return Ok(None);
        };

        let items = match Decoder::new(registry).decode(parts[5])? {
            Value::Null => Vec::new(),
            Value::List { items, .. } => items,
            other => vec![other],
        };
        let change = CollectionChange {
            action,
            new_index: number(parts[2])?,
            old_index: number(parts[3])?,
            old_count: number(parts[4])?,
            items,
        };
        Ok(Some(
            NetworkEvent::new(packet.clone(), EventData::Collection(change))
                .with_target(target, parts[0]),
        ))
    }
}

/// `NetworkDataRequest` and `NetworkDataRequestResponse` payloads. Objects
/// are written inline so a response never needs a further fetch.
#[derive(Debug, Default)]
pub struct RequestParser;

impl PacketParser for RequestParser {
    fn encode(&self, registry: &Registry, _target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String> {
        let ParseArgs::Request(state) = args else {
            return Err(SyncError::Handler("request packet needs a request".to_string()));
        };
        let request: ObjectRef = Arc::new(NetworkRequest::from_state(state.clone()));
        Encoder::new(registry)
            .inline_registered()
            .encode(&Value::Object(request))
    }

    fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
        let value = Decoder::new(registry)
            .with_fetch(FetchPolicy::Never)
            .decode(&packet.payload)?;
        let request = value
            .as_object()
            .cloned()
            .and_then(downcast::<NetworkRequest>)
            .ok_or_else(|| ParseError::Malformed(format!("not a request: {}", value.type_name())))?;
        Ok(Some(NetworkEvent::new(
            packet.clone(),
            EventData::Request(request.state()),
        )))
    }
}

/// `AssignNewHeaderValue` payloads
#[derive(Debug, Default)]
pub struct HeaderParser;

impl PacketParser for HeaderParser {
    fn encode(&self, registry: &Registry, _target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String> {
        let ParseArgs::Header { name, value } = args else {
            return Err(SyncError::Handler("header assignment needs a name and value".to_string()));
        };
        // Validate before anything goes on the wire
        HeaderEntry::new(name.as_str(), header_value(value)?)?;
        Ok(format!("{}:{}", name, encode(registry, value)?))
    }

    fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
        let (name, raw) = packet
            .payload
            .split_once(':')
            .ok_or(ParseError::Segments {
                expected: 2,
                actual: 1,
            })?;
        let value = Decoder::new(registry)
            .with_fetch(FetchPolicy::Never)
            .decode(raw)?;
        let entry = HeaderEntry::new(name, header_value(&value)?)?;
        Ok(Some(NetworkEvent::new(packet.clone(), EventData::Header(entry))))
    }
}

/// Header representation of a scalar value
pub fn header_value(value: &Value) -> SyncResult<HeaderValue> {
    let header = match value {
        Value::Bool(v) => HeaderValue::Bool(*v),
        Value::Byte(v) => HeaderValue::Byte(*v),
        Value::I16(v) => HeaderValue::I16(*v),
        Value::U16(v) => HeaderValue::U16(*v),
        Value::I32(v) => HeaderValue::I32(*v),
        Value::U32(v) => HeaderValue::U32(*v),
        Value::I64(v) => HeaderValue::I64(*v),
        Value::U64(v) => HeaderValue::U64(*v),
        Value::F32(v) => HeaderValue::F32(*v),
        Value::F64(v) => HeaderValue::F64(*v),
        Value::Str(v) => HeaderValue::Str(v.clone()),
        other => {
            return Err(ParseError::InvalidLiteral {
                type_name: "header value".to_string(),
                text: other.type_name(),
            }
            .into())
        }
    };
    Ok(header)
}

/// Value representation of a header value
pub fn value_of_header(value: &HeaderValue) -> Value {
    match value {
        HeaderValue::Bool(v) => Value::Bool(*v),
        HeaderValue::Byte(v) => Value::Byte(*v),
        HeaderValue::I16(v) => Value::I16(*v),
        HeaderValue::U16(v) => Value::U16(*v),
        HeaderValue::I32(v) => Value::I32(*v),
        HeaderValue::U32(v) => Value::U32(*v),
        HeaderValue::I64(v) => Value::I64(*v),
        HeaderValue::U64(v) => Value::U64(*v),
        HeaderValue::F32(v) => Value::F32(*v),
        HeaderValue::F64(v) => Value::F64(*v),
        HeaderValue::Str(v) => Value::Str(v.clone()),
    }
}
