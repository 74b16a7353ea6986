//! Blocking request/response correlation
//!
//! A requester creates a [`PendingRequest`] keyed by a fresh correlation id,
//! sends a [`NetworkRequest`] and blocks on the request's condition variable.
//! The response handler, or the disconnect sweep, completes it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use uuid::Uuid;

use crate::protocol::ConnectionId;
use crate::registry::{Registry, Role};
use crate::serialize::{mismatch, unknown_field, Field, FieldError, NetworkObject, Value};

/// Type name of [`NetworkRequest`]
pub const NETWORK_REQUEST_TYPE: &str = "peersync.NetworkRequest";

/// What a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RequestKind {
    /// A registered object, by network id
    Data = 0,
    /// A fresh network id from the host, by short type name
    Name = 1,
    /// The first registered object of a type
    Type = 2,
}

impl RequestKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RequestKind::Data),
            1 => Some(RequestKind::Name),
            2 => Some(RequestKind::Type),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Data => write!(f, "RequestData"),
            RequestKind::Name => write!(f, "RequestName"),
            RequestKind::Type => write!(f, "RequestType"),
        }
    }
}

/// Contents of a request or its response
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState {
    pub kind: RequestKind,
    pub correlation_id: String,
    /// Requested network id, for [`RequestKind::Data`]
    pub target_id: String,
    /// Requested type, for [`RequestKind::Name`] and [`RequestKind::Type`]
    pub type_name: String,
    /// Answer carried by the response
    pub data: Value,
}

impl RequestState {
    fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            correlation_id: Uuid::new_v4().to_string(),
            target_id: String::new(),
            type_name: String::new(),
            data: Value::Null,
        }
    }

    /// Ask for the object registered under `network_id`
    pub fn data(network_id: impl Into<String>) -> Self {
        Self {
            target_id: network_id.into(),
            ..Self::new(RequestKind::Data)
        }
    }

    /// Ask the host for a new id for a short type name
    pub fn name(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::new(RequestKind::Name)
        }
    }

    /// Ask for the first registered instance of a type
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::new(RequestKind::Type)
        }
    }

    /// Response carrying `data` for this request
    pub fn answered(&self, data: Value) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Whether a response carries no answer
    pub fn is_empty(&self) -> bool {
        match self.kind {
            RequestKind::Name => self.data.as_str().map_or(true, str::is_empty),
            RequestKind::Data | RequestKind::Type => self.data.is_null(),
        }
    }
}

/// Wire form of a request and of its response
#[derive(Debug)]
pub struct NetworkRequest {
    state: RwLock<RequestState>,
}

static NETWORK_REQUEST_FIELDS: [Field; 5] = [
    Field::value("RequestType"),
    Field::value("InternalName"),
    Field::value("TargetId"),
    Field::value("ClassTypeName"),
    Field::value("Data"),
];

impl Default for NetworkRequest {
    fn default() -> Self {
        Self::from_state(RequestState::new(RequestKind::Data))
    }
}

impl NetworkRequest {
    pub fn from_state(state: RequestState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state.read().clone()
    }
}

impl NetworkObject for NetworkRequest {
    fn type_name(&self) -> &str {
        NETWORK_REQUEST_TYPE
    }

    fn fields(&self) -> &[Field] {
        &NETWORK_REQUEST_FIELDS
    }

    fn get(&self, field: &str) -> Option<Value> {
        let state = self.state.read();
        let value = match field {
            "RequestType" => Value::I32(state.kind.code()),
            "InternalName" => Value::Str(state.correlation_id.clone()),
            "TargetId" => Value::Str(state.target_id.clone()),
            "ClassTypeName" => Value::Str(state.type_name.clone()),
            "Data" => state.data.clone(),
            _ => return None,
        };
        Some(value)
    }

    fn set(&self, field: &str, value: Value) -> Result<(), FieldError> {
        let mut state = self.state.write();
        let text = |value: Value| match value {
            Value::Str(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Err(mismatch(NETWORK_REQUEST_TYPE, field, "String", &other)),
        };
        match field {
            "RequestType" => {
                state.kind = value
                    .as_i32()
                    .and_then(RequestKind::from_code)
                    .ok_or_else(|| mismatch(NETWORK_REQUEST_TYPE, field, "Int32", &value))?;
            }
            "InternalName" => state.correlation_id = text(value)?,
            "TargetId" => state.target_id = text(value)?,
            "ClassTypeName" => state.type_name = text(value)?,
            "Data" => state.data = value,
            _ => return Err(unknown_field(NETWORK_REQUEST_TYPE, field)),
        }
        Ok(())
    }
}

/// Answer a request from the local registry. An unknown target yields an
/// empty response; clients never hand out ids.
pub fn answer(registry: &Registry, request: &RequestState) -> RequestState {
    let data = match request.kind {
        RequestKind::Type => registry.first_of_type(&request.type_name).into(),
        RequestKind::Name => match registry.role() {
            Role::Host => Value::Str(registry.generate_id(&request.type_name)),
            Role::Client => Value::Null,
        },
        RequestKind::Data => registry.get(&request.target_id).into(),
    };
    request.answered(data)
}

#[derive(Default)]
struct PendingState {
    awaiting: HashSet<ConnectionId>,
    reply: Option<Value>,
    done: bool,
}

/// One outstanding request
pub struct PendingRequest {
    correlation_id: String,
    state: Mutex<PendingState>,
    ready: Condvar,
}

impl PendingRequest {
    fn new(correlation_id: String, awaiting: HashSet<ConnectionId>) -> Self {
        let done = awaiting.is_empty();
        Self {
            correlation_id,
            state: Mutex::new(PendingState {
                awaiting,
                reply: None,
                done,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Block until the request completes. `None` means the fetch failed.
    pub fn wait(&self) -> Option<Value> {
        let mut state = self.state.lock();
        while !state.done {
            self.ready.wait(&mut state);
        }
        state.reply.clone()
    }

    /// Record an answer. A non-empty answer completes the request, an empty
    /// one only once every addressed peer has answered. Returns `true` when
    /// the request is complete.
    fn answer(&self, from: Option<ConnectionId>, reply: Option<Value>) -> bool {
        let mut state = self.state.lock();
        if state.done {
            return true;
        }
        match reply {
            Some(value) => {
                state.reply = Some(value);
                state.done = true;
            }
            None => {
                match from {
                    Some(peer) => {
                        state.awaiting.remove(&peer);
                    }
                    None => state.awaiting.clear(),
                }
                state.done = state.awaiting.is_empty();
            }
        }
        if state.done {
            self.ready.notify_all();
        }
        state.done
    }
}

/// Table of outstanding requests keyed by correlation id
#[derive(Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<String, Arc<PendingRequest>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request addressed to `awaiting`. With no peers the request
    /// is complete, and empty, from the start.
    pub fn create<I>(&self, correlation_id: &str, awaiting: I) -> Arc<PendingRequest>
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let request = Arc::new(PendingRequest::new(
            correlation_id.to_string(),
            awaiting.into_iter().collect(),
        ));
        if !request.is_done() {
            self.requests
                .lock()
                .insert(correlation_id.to_string(), request.clone());
        }
        request
    }

    /// Deliver an answer. Returns `false` for unknown correlation ids.
    pub fn resolve(&self, correlation_id: &str, from: Option<ConnectionId>, reply: Option<Value>) -> bool {
        let Some(request) = self.requests.lock().get(correlation_id).cloned() else {
            return false;
        };
        if request.answer(from, reply) {
            self.requests.lock().remove(correlation_id);
        }
        true
    }

    /// Treat a lost peer as an empty answer to everything it was asked
    pub fn sweep_peer(&self, peer: ConnectionId) -> usize {
        let requests: Vec<Arc<PendingRequest>> = self.requests.lock().values().cloned().collect();
        let mut completed = 0;
        for request in requests {
            let addressed = request.state.lock().awaiting.contains(&peer);
            if addressed && request.answer(Some(peer), None) {
                self.requests.lock().remove(&request.correlation_id);
                completed += 1;
            }
        }
        completed
    }

    /// Complete every outstanding request with an empty result
    pub fn fail_all(&self) -> usize {
        let requests: Vec<Arc<PendingRequest>> =
            self.requests.lock().drain().map(|(_, r)| r).collect();
        for request in &requests {
            request.answer(None, None);
        }
        requests.len()
    }

    pub fn remove(&self, correlation_id: &str) -> Option<Arc<PendingRequest>> {
        self.requests.lock().remove(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::serialize::{decode, Encoder, ObjectRef, Record, RecordSchema};
    use std::thread;
    use std::time::Duration;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    #[test]
    fn test_empty_answers() {
        let mut state = RequestState::name("Player");
        assert!(state.is_empty());
        state.data = Value::from("");
        assert!(state.is_empty());
        state.data = Value::from("Player_1");
        assert!(!state.is_empty());

        let mut state = RequestState::data("Player_1");
        assert!(state.is_empty());
        state.data = Value::I32(1);
        assert!(!state.is_empty());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(
            RequestState::data("x").correlation_id,
            RequestState::data("x").correlation_id
        );
    }

    #[test]
    fn test_request_wire_round_trip() {
        let registry = Registry::new(Role::Host, Arc::new(Diagnostics::new()));
        registry.types().register::<NetworkRequest>();

        let state = RequestState::of_type("demo.Player").answered(Value::from("x"));
        let object: ObjectRef = Arc::new(NetworkRequest::from_state(state.clone()));
        let text = Encoder::new(&registry)
            .inline_registered()
            .encode(&Value::Object(object))
            .unwrap();
        let decoded = decode(&registry, &text).unwrap();
        let decoded = crate::serialize::downcast::<NetworkRequest>(decoded.as_object().unwrap().clone()).unwrap();
        assert_eq!(decoded.state(), state);
    }

    #[test]
    fn test_answer_from_registry() {
        let registry = Registry::new(Role::Host, Arc::new(Diagnostics::new()));
        let schema = Arc::new(RecordSchema::new("demo.Player").registrable().value("Name", ""));
        let player: ObjectRef = Arc::new(Record::new(schema));
        registry.register(player).unwrap();

        let by_type = answer(&registry, &RequestState::of_type("demo.Player"));
        assert!(!by_type.is_empty());
        let by_id = answer(&registry, &RequestState::data("Player_1"));
        assert!(!by_id.is_empty());
        let missing = answer(&registry, &RequestState::data("Player_9"));
        assert!(missing.is_empty());
        let name = answer(&registry, &RequestState::name("Player"));
        assert_eq!(name.data, Value::from("Player_2"));

        let client = Registry::new(Role::Client, Arc::new(Diagnostics::new()));
        assert!(answer(&client, &RequestState::name("Player")).is_empty());
    }

    #[test]
    fn test_no_peers_completes_immediately() {
        let pending = PendingRequests::new();
        let request = pending.create("r1", Vec::new());
        assert!(request.is_done());
        assert_eq!(request.wait(), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_first_non_empty_answer_wins() {
        let pending = PendingRequests::new();
        let request = pending.create("r1", [A, B]);

        assert!(pending.resolve("r1", Some(A), None));
        assert!(!request.is_done());
        assert!(pending.resolve("r1", Some(B), Some(Value::from("ok"))));
        assert_eq!(request.wait(), Some(Value::from("ok")));
        assert!(pending.is_empty());
        assert!(!pending.resolve("r1", Some(B), None));
    }

    #[test]
    fn test_all_empty_answers_fail() {
        let pending = PendingRequests::new();
        let request = pending.create("r1", [A, B]);
        pending.resolve("r1", Some(A), None);
        pending.resolve("r1", Some(B), None);
        assert_eq!(request.wait(), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_disconnect_sweep_wakes_waiter() {
        let pending = Arc::new(PendingRequests::new());
        let request = pending.create("r1", [A]);

        let waiter = {
            let request = request.clone();
            thread::spawn(move || request.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pending.sweep_peer(B), 0);
        assert_eq!(pending.sweep_peer(A), 1);
        assert_eq!(waiter.join().unwrap(), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fail_all() {
        let pending = PendingRequests::new();
        let r1 = pending.create("r1", [A]);
        let r2 = pending.create("r2", [B]);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.fail_all(), 2);
        assert_eq!(r1.wait(), None);
        assert_eq!(r2.wait(), None);
    }
}
