//! Event dispatch core
//!
//! Maps packet codes to an ordered list of handlers and to at most one
//! parser. Every packet runs through three stages:
//! - `PreviewPacket` handlers
//! - `PreviewPropertyUpdated` or `PreviewCollectionChanged` handlers, for
//!   mutation packets
//! - handlers of the packet's own code
//!
//! A handler that sets [`NetworkEvent::handled`] stops the rest.

mod event;
mod marshaller;

pub use event::*;
pub use marshaller::*;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Diagnostics, SyncResult};
use crate::protocol::{CoreCode, Packet};
use crate::registry::Registry;
use crate::serialize::{CollectionChange, Decoder, ObjectRef, Value};
use crate::sync::RequestState;

/// Packet handler. `C` is the context the handler runs against, the
/// [`Network`](crate::network::Network) in practice.
pub type Handler<C> = Arc<dyn Fn(&C, &mut NetworkEvent) -> SyncResult<()> + Send + Sync>;

/// Identifies a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// What a parser is asked to encode
#[derive(Debug, Clone)]
pub enum ParseArgs {
    None,
    Property(String),
    Collection(CollectionChange),
    Request(RequestState),
    Header { name: String, value: Value },
}

/// Codec for the payload of one packet code
pub trait PacketParser: Send + Sync {
    /// Build the payload for `target`
    fn encode(&self, registry: &Registry, target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String>;

    /// Decode a packet. `None` drops the packet without running handlers.
    fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>>;
}

/// Handler and parser tables
pub struct DispatchTable<C> {
    handlers: RwLock<HashMap<i32, Vec<(HandlerId, Handler<C>)>>>,
    parsers: RwLock<HashMap<i32, Arc<dyn PacketParser>>>,
    next_id: AtomicU64,
    diagnostics: Arc<Diagnostics>,
}

impl<C> DispatchTable<C> {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            parsers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            diagnostics,
        }
    }

    /// Append a handler for `code`
    pub fn add_handler<F>(&self, code: impl Into<i32>, handler: F) -> HandlerId
    where
        F: Fn(&C, &mut NetworkEvent) -> SyncResult<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .write()
            .entry(code.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, code: impl Into<i32>) -> usize {
        self.handlers
            .read()
            .get(&code.into())
            .map_or(0, Vec::len)
    }

    /// Install the parser for `code`, replacing any previous one
    pub fn set_parser(&self, code: impl Into<i32>, parser: Arc<dyn PacketParser>) {
        let code = code.into();
        if self.parsers.write().insert(code, parser).is_some() {
            self.diagnostics
                .warning(format!("Parser for packet code {} replaced", code));
        }
    }

    pub fn remove_parser(&self, code: impl Into<i32>) -> bool {
        self.parsers.write().remove(&code.into()).is_some()
    }

    pub fn parser(&self, code: impl Into<i32>) -> Option<Arc<dyn PacketParser>> {
        self.parsers.read().get(&code.into()).cloned()
    }

    /// Decode a packet with its parser, or as a plain value
    pub fn decode(&self, registry: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
        if let Some(parser) = self.parser(packet.code) {
            return parser.decode(registry, packet);
        }
        let value = Decoder::new(registry).decode(&packet.payload)?;
        Ok(Some(NetworkEvent::new(packet.clone(), EventData::Value(value))))
    }

    /// Run the handler stages for `event`
    pub fn dispatch(&self, context: &C, event: &mut NetworkEvent) {
        for code in stages(&event.packet) {
            let handlers: Vec<Handler<C>> = match self.handlers.read().get(&code) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => continue,
            };
            for handler in handlers {
                if let Err(e) = handler(context, event) {
                    self.diagnostics.exception(&e);
                }
                if event.handled {
                    return;
                }
            }
        }
    }
}

/// Handler codes consulted for `packet`, in order
fn stages(packet: &Packet) -> Vec<i32> {
    let mut codes = vec![CoreCode::PreviewPacket.code()];
    match packet.core_code() {
        Some(CoreCode::PropertyUpdated) => codes.push(CoreCode::PreviewPropertyUpdated.code()),
        Some(CoreCode::CollectionChanged) => codes.push(CoreCode::PreviewCollectionChanged.code()),
        _ => {}
    }
    codes.push(packet.code);
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::Header;
    use crate::registry::Role;
    use parking_lot::Mutex;

    type Log = Mutex<Vec<String>>;

    fn table() -> DispatchTable<Log> {
        DispatchTable::new(Arc::new(Diagnostics::new()))
    }

    fn event(code: impl Into<i32>) -> NetworkEvent {
        NetworkEvent::new(Packet::new(code, "null", Header::new()), EventData::None)
    }

    fn record(tag: &'static str) -> impl Fn(&Log, &mut NetworkEvent) -> SyncResult<()> {
        move |log: &Log, _event: &mut NetworkEvent| {
            log.lock().push(tag.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_stage_order() {
        let table = table();
        table.add_handler(CoreCode::PropertyUpdated, record("own"));
        table.add_handler(CoreCode::PreviewPropertyUpdated, record("preview-property"));
        table.add_handler(CoreCode::PreviewPacket, record("preview"));
        table.add_handler(CoreCode::PreviewCollectionChanged, record("preview-collection"));

        let log = Log::default();
        table.dispatch(&log, &mut event(CoreCode::PropertyUpdated));
        assert_eq!(*log.lock(), vec!["preview", "preview-property", "own"]);

        log.lock().clear();
        table.dispatch(&log, &mut event(42));
        assert_eq!(*log.lock(), vec!["preview"]);
    }

    #[test]
    fn test_handled_stops_dispatch() {
        let table = table();
        table.add_handler(7, record("first"));
        table.add_handler(7, |log: &Log, event: &mut NetworkEvent| {
            log.lock().push("second".to_string());
            event.handled = true;
            Ok(())
        });
        table.add_handler(7, record("third"));

        let log = Log::default();
        let mut e = event(7);
        table.dispatch(&log, &mut e);
        assert!(e.handled);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_handler_errors_are_isolated() {
        let diagnostics = Arc::new(Diagnostics::new());
        let errors = Arc::new(Mutex::new(0));
        let counter = errors.clone();
        diagnostics.set_exception_handler(move |_| *counter.lock() += 1);

        let table: DispatchTable<Log> = DispatchTable::new(diagnostics);
        table.add_handler(7, |_: &Log, _: &mut NetworkEvent| Err(SyncError::Handler("boom".into())));
        table.add_handler(7, record("after"));

        let log = Log::default();
        table.dispatch(&log, &mut event(7));
        assert_eq!(*errors.lock(), 1);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn test_remove_handler() {
        let table = table();
        let id = table.add_handler(7, record("gone"));
        table.add_handler(7, record("kept"));
        assert_eq!(table.handler_count(7), 2);
        assert!(table.remove_handler(id));
        assert!(!table.remove_handler(id));

        let log = Log::default();
        table.dispatch(&log, &mut event(7));
        assert_eq!(*log.lock(), vec!["kept"]);
    }

    struct Fixed(&'static str);

    impl PacketParser for Fixed {
        fn encode(&self, _: &Registry, _: Option<&ObjectRef>, _: &ParseArgs) -> SyncResult<String> {
            Ok(self.0.to_string())
        }

        fn decode(&self, _: &Registry, packet: &Packet) -> SyncResult<Option<NetworkEvent>> {
            Ok(Some(NetworkEvent::new(
                packet.clone(),
                EventData::Value(Value::from(self.0)),
            )))
        }
    }

    #[test]
    fn test_parser_override_and_generic_decode() {
        let diagnostics = Arc::new(Diagnostics::new());
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        diagnostics.set_warning_handler(move |m| sink.lock().push(m.to_string()));

        let table: DispatchTable<Log> = DispatchTable::new(diagnostics.clone());
        let registry = Registry::new(Role::Host, diagnostics);

        table.set_parser(9, Arc::new(Fixed("a")));
        table.set_parser(9, Arc::new(Fixed("b")));
        assert_eq!(warnings.lock().len(), 1);

        let packet = Packet::new(9, "ignored", Header::new());
        let decoded = table.decode(&registry, &packet).unwrap().unwrap();
        assert_eq!(decoded.value(), Some(&Value::from("b")));

        assert!(table.remove_parser(9));
        let packet = Packet::new(9, "Int32:5", Header::new());
        let decoded = table.decode(&registry, &packet).unwrap().unwrap();
        assert_eq!(decoded.value(), Some(&Value::I32(5)));
    }
}
