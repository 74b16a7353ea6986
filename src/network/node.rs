//! The network core
//!
//! A [`Network`] plays one [`Role`]. It turns transport frames into packets,
//! runs them through the dispatch table, mirrors mutations of registered
//! objects to its peers and answers or issues remote fetches.
//!
//! Threading:
//! - packets are decoded and dispatched through the installed [`Marshaller`]
//! - request and response packets are processed inline on the delivery thread
//! - a remote fetch attempted on a delivery thread fails instead of blocking

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::dispatch::{
    DispatchTable, EventData, HandlerId, Marshaller, NetworkEvent, PacketParser, ParseArgs,
};
use crate::error::{Diagnostics, SyncError, SyncResult};
use crate::protocol::{
    ConnectionId, CoreCode, FrameCodec, Header, HeaderEntry, HeaderValue, Packet, Reassembler,
    VERSION_HEADER,
};
use crate::registry::{Registration, Registry, RemoteFetch, Role};
use crate::serialize::{
    downcast, encode, CollectionChange, MutationListener, NetworkObject, ObjectRef, Value,
};
use crate::sync::{
    self, header_value, CollectionParser, HeaderParser, NetworkRequest, PendingRequests,
    PropertyParser, RequestParser, RequestState,
};

use super::{NetworkOptions, Transport, TransportError, TransportEvents};

thread_local! {
    static DELIVERING: Cell<bool> = Cell::new(false);
}

/// Marks the current thread as a transport delivery thread while alive
struct DeliveryScope {
    previous: bool,
}

impl DeliveryScope {
    fn enter() -> Self {
        let previous = DELIVERING.with(|d| d.replace(true));
        Self { previous }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        let previous = self.previous;
        DELIVERING.with(|d| d.set(previous));
    }
}

/// Whether the current thread is delivering transport events
pub fn on_delivery_thread() -> bool {
    DELIVERING.with(Cell::get)
}

/// Addressing of an outgoing event
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Send to this peer only
    pub target: Option<ConnectionId>,
    /// Skip these peers when broadcasting
    pub exclude: Vec<ConnectionId>,
    /// Also dispatch the packet locally
    pub to_self: bool,
}

impl SendOptions {
    pub fn to(target: ConnectionId) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, peer: ConnectionId) -> Self {
        self.exclude.push(peer);
        self
    }

    pub fn and_self(mut self) -> Self {
        self.to_self = true;
        self
    }
}

/// Broadcasts local mutations of registered objects
struct MutationRelay {
    network: Weak<Network>,
}

impl MutationListener for MutationRelay {
    fn property_changed(&self, network_id: &str, property: &str) {
        if let Some(network) = self.network.upgrade() {
            network.publish(
                CoreCode::PropertyUpdated,
                network_id,
                ParseArgs::Property(property.to_string()),
            );
        }
    }

    fn collection_changed(&self, network_id: &str, change: &CollectionChange) {
        if let Some(network) = self.network.upgrade() {
            network.publish(
                CoreCode::CollectionChanged,
                network_id,
                ParseArgs::Collection(change.clone()),
            );
        }
    }
}

/// Host or client endpoint of a synchronized object graph
pub struct Network {
    role: Role,
    options: NetworkOptions,
    codec: FrameCodec,
    header: RwLock<Header>,
    registry: Arc<Registry>,
    table: DispatchTable<Network>,
    pending: PendingRequests,
    diagnostics: Arc<Diagnostics>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Accepted clients on a host, the host on a client
    peers: RwLock<BTreeSet<ConnectionId>>,
    reassembler: Mutex<Reassembler>,
    marshaller: RwLock<Option<Arc<dyn Marshaller>>>,
    direct_dispatch: AtomicBool,
    /// Keeps the frames of one packet contiguous per connection
    send_lock: Mutex<()>,
    me: Weak<Network>,
}

impl Network {
    pub fn new(role: Role, options: NetworkOptions) -> SyncResult<Arc<Self>> {
        let codec = FrameCodec::new(options.buffer_size, options.header_size)?;
        let mut header = Header::with_capacity(options.header_size);
        header.push(VERSION_HEADER, options.protocol_version)?;
        let diagnostics = Arc::new(Diagnostics::new());

        let network = Arc::new_cyclic(|me: &Weak<Network>| {
            let registry = Arc::new(Registry::new(role, diagnostics.clone()));
            let remote: Weak<dyn RemoteFetch> = me.clone();
            registry.bind(Arc::new(MutationRelay { network: me.clone() }), remote);
            registry.types().register::<NetworkRequest>();

            Network {
                role,
                options,
                codec,
                header: RwLock::new(header),
                registry,
                table: DispatchTable::new(diagnostics.clone()),
                pending: PendingRequests::new(),
                diagnostics,
                transport: RwLock::new(None),
                peers: RwLock::new(BTreeSet::new()),
                reassembler: Mutex::new(Reassembler::new()),
                marshaller: RwLock::new(None),
                direct_dispatch: AtomicBool::new(false),
                send_lock: Mutex::new(()),
                me: me.clone(),
            }
        });
        network.install_core();

        tracing::debug!("Network created as {:?}", role);
        Ok(network)
    }

    pub fn host(options: NetworkOptions) -> SyncResult<Arc<Self>> {
        Self::new(Role::Host, options)
    }

    pub fn client(options: NetworkOptions) -> SyncResult<Arc<Self>> {
        Self::new(Role::Client, options)
    }

    fn install_core(&self) {
        self.table.set_parser(CoreCode::PropertyUpdated, Arc::new(PropertyParser));
        self.table.set_parser(CoreCode::CollectionChanged, Arc::new(CollectionParser));
        self.table.set_parser(CoreCode::NetworkDataRequest, Arc::new(RequestParser));
        self.table.set_parser(CoreCode::NetworkDataRequestResponse, Arc::new(RequestParser));
        self.table.set_parser(CoreCode::AssignNewHeaderValue, Arc::new(HeaderParser));

        self.table
            .add_handler(CoreCode::NewClientConnected, |net: &Network, e: &mut NetworkEvent| {
                net.on_new_client(e)
            });
        self.table
            .add_handler(CoreCode::PropertyUpdated, |net: &Network, e: &mut NetworkEvent| {
                net.on_property_updated(e)
            });
        self.table
            .add_handler(CoreCode::CollectionChanged, |net: &Network, e: &mut NetworkEvent| {
                net.on_collection_changed(e)
            });
        self.table
            .add_handler(CoreCode::NetworkDataRequest, |net: &Network, e: &mut NetworkEvent| {
                net.on_data_request(e)
            });
        self.table.add_handler(
            CoreCode::NetworkDataRequestResponse,
            |net: &Network, e: &mut NetworkEvent| net.on_data_response(e),
        );
        self.table
            .add_handler(CoreCode::AssignNewHeaderValue, |net: &Network, e: &mut NetworkEvent| {
                net.on_header_assigned(e)
            });
    }

    // Accessors

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    /// Frame codec matching this network's buffer and header sizes
    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Connected peers: accepted clients on a host, the host on a client
    pub fn peers(&self) -> Vec<ConnectionId> {
        self.peers.read().iter().copied().collect()
    }

    pub fn is_connected(&self) -> bool {
        !self.peers.read().is_empty()
    }

    /// Number of requests still waiting for an answer
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // Wiring

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    fn transport(&self) -> SyncResult<Arc<dyn Transport>> {
        self.transport.read().clone().ok_or(SyncError::NoRemote)
    }

    /// Run handlers through `marshaller`
    pub fn set_marshaller(&self, marshaller: Arc<dyn Marshaller>) {
        *self.marshaller.write() = Some(marshaller);
    }

    /// Run handlers on the delivery thread when no marshaller is set
    pub fn allow_direct_dispatch(&self, allow: bool) {
        self.direct_dispatch.store(allow, Ordering::SeqCst);
    }

    pub fn on<F>(&self, code: impl Into<i32>, handler: F) -> HandlerId
    where
        F: Fn(&Network, &mut NetworkEvent) -> SyncResult<()> + Send + Sync + 'static,
    {
        self.table.add_handler(code, handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.table.remove_handler(id)
    }

    pub fn set_parser(&self, code: impl Into<i32>, parser: Arc<dyn PacketParser>) {
        self.table.set_parser(code, parser);
    }

    pub fn remove_parser(&self, code: impl Into<i32>) -> bool {
        self.table.remove_parser(code)
    }

    // Registry

    /// Register an object; on a client this may block while the host
    /// assigns its id
    pub fn register(&self, object: ObjectRef) -> SyncResult<Registration> {
        self.registry.register(object)
    }

    pub fn register_recursive(&self, object: &ObjectRef) -> SyncResult<()> {
        self.registry.register_recursive(object)
    }

    pub fn unregister(&self, object: &ObjectRef) -> bool {
        self.registry.unregister(object)
    }

    pub fn unregister_recursive(&self, object: &ObjectRef) -> usize {
        self.registry.unregister_recursive(object)
    }

    pub fn get(&self, network_id: &str) -> Option<ObjectRef> {
        self.registry.get(network_id)
    }

    /// Apply local changes to `objects` without broadcasting them
    pub fn safe<R>(&self, objects: &[ObjectRef], action: impl FnOnce() -> R) -> R {
        self.registry.safe(objects, action)
    }

    // Header

    /// Copy of the header attached to outgoing packets
    pub fn header(&self) -> Header {
        self.header.read().clone()
    }

    /// Add or replace an entry of the outgoing header
    pub fn set_header_value(&self, name: &str, value: impl Into<HeaderValue>) -> SyncResult<()> {
        let entry = HeaderEntry::new(name, value)?;
        self.header.write().set(entry)?;
        Ok(())
    }

    /// Set a header entry here and on every peer
    pub fn assign_header_value(&self, name: &str, value: Value) -> SyncResult<usize> {
        self.set_header_value(name, header_value(&value)?)?;
        let payload = self.encode_with(
            CoreCode::AssignNewHeaderValue,
            None,
            &ParseArgs::Header {
                name: name.to_string(),
                value,
            },
        )?;
        self.send_packet(&self.packet(CoreCode::AssignNewHeaderValue, payload), &[])
    }

    // Sending

    /// Packet carrying the current default header
    pub fn packet(&self, code: impl Into<i32>, payload: impl Into<String>) -> Packet {
        Packet::new(code, payload, self.header())
    }

    /// Broadcast a value to every peer
    pub fn send_event(&self, code: impl Into<i32>, value: &Value) -> SyncResult<usize> {
        self.send_event_with(code, value, &SendOptions::default())
    }

    /// Send a value as addressed by `options`. Returns the number of peers
    /// the packet was handed to.
    pub fn send_event_with(&self, code: impl Into<i32>, value: &Value, options: &SendOptions) -> SyncResult<usize> {
        let payload = encode(&self.registry, value)?;
        let packet = self.packet(code, payload);
        let sent = match options.target {
            Some(target) => {
                self.send_to(target, &packet)?;
                1
            }
            None => self.send_packet(&packet, &options.exclude)?,
        };
        if options.to_self {
            self.process(packet);
        }
        Ok(sent)
    }

    /// Broadcast a packet to every peer not in `exclude`
    pub fn send_packet(&self, packet: &Packet, exclude: &[ConnectionId]) -> SyncResult<usize> {
        let targets: Vec<ConnectionId> = self
            .peers
            .read()
            .iter()
            .filter(|peer| !exclude.contains(peer))
            .copied()
            .collect();
        self.send_frames(packet, &targets)
    }

    pub fn send_to(&self, target: ConnectionId, packet: &Packet) -> SyncResult<()> {
        self.send_frames(packet, &[target])?;
        Ok(())
    }

    fn send_frames(&self, packet: &Packet, targets: &[ConnectionId]) -> SyncResult<usize> {
        if targets.is_empty() {
            return Ok(0);
        }
        let transport = self.transport()?;
        let frames = self.codec.encode(packet)?;

        let _serial = self.send_lock.lock();
        let mut sent = 0;
        for &target in targets {
            let result: Result<(), TransportError> = frames
                .iter()
                .try_for_each(|frame| transport.send(target, frame.clone()));
            match result {
                Ok(()) => sent += 1,
                Err(e) if targets.len() == 1 => return Err(e.into()),
                Err(e) => self
                    .diagnostics
                    .warning(format!("Send of packet {} to {} failed: {}", packet.code, target, e)),
            }
        }
        tracing::trace!("Packet {} sent to {} peer(s) in {} frame(s)", packet.code, sent, frames.len());
        Ok(sent)
    }

    fn encode_with(&self, code: CoreCode, target: Option<&ObjectRef>, args: &ParseArgs) -> SyncResult<String> {
        let parser = self
            .table
            .parser(code)
            .ok_or(SyncError::NoParser(code.code()))?;
        parser.encode(&self.registry, target, args)
    }

    /// Send a local mutation of a registered object
    fn publish(&self, code: CoreCode, network_id: &str, args: ParseArgs) {
        let Some(target) = self.registry.get(network_id) else {
            return;
        };
        let result = self
            .encode_with(code, Some(&target), &args)
            .and_then(|payload| self.send_packet(&self.packet(code, payload), &[]));
        if let Err(e) = result {
            self.diagnostics.exception(&e);
        }
    }

    // Requests

    /// Send a request to every peer and block until it completes. `None`
    /// means no peer had an answer.
    pub fn request(&self, state: RequestState) -> SyncResult<Option<Value>> {
        if on_delivery_thread() {
            return Err(SyncError::FetchOnDeliveryThread);
        }
        let payload = self.encode_with(
            CoreCode::NetworkDataRequest,
            None,
            &ParseArgs::Request(state.clone()),
        )?;
        let packet = self.packet(CoreCode::NetworkDataRequest, payload);

        let (pending, targets) = {
            let peers = self.peers.read();
            let targets: Vec<ConnectionId> = peers.iter().copied().collect();
            (self.pending.create(&state.correlation_id, targets.clone()), targets)
        };
        tracing::debug!(
            "{} {} sent to {} peer(s)",
            state.kind,
            state.correlation_id,
            targets.len()
        );

        for target in targets {
            if let Err(e) = self.send_to(target, &packet) {
                self.diagnostics
                    .warning(format!("Request {} to {} failed: {}", state.correlation_id, target, e));
                self.pending.resolve(&state.correlation_id, Some(target), None);
            }
        }
        Ok(pending.wait())
    }

    /// Fetch a registered object from the peers
    pub fn request_instance(&self, network_id: &str) -> SyncResult<Option<ObjectRef>> {
        self.fetch_object(network_id)
    }

    /// Fetch a registered object and downcast it
    pub fn request_instance_as<T: NetworkObject>(&self, network_id: &str) -> SyncResult<Option<Arc<T>>> {
        Ok(self.fetch_object(network_id)?.and_then(downcast::<T>))
    }

    /// Fetch the first registered instance of a type from the peers
    pub fn request_first_of_type(&self, type_name: &str) -> SyncResult<Option<ObjectRef>> {
        let reply = self.request(RequestState::of_type(type_name))?;
        Ok(reply.and_then(|v| v.as_object().cloned()))
    }

    /// Fetch on a background thread and hand the result to `callback`
    pub fn request_instance_with<F>(self: &Arc<Self>, network_id: &str, callback: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce(SyncResult<Option<ObjectRef>>) + Send + 'static,
    {
        let network = self.clone();
        let network_id = network_id.to_string();
        thread::Builder::new()
            .name("peersync-request".to_string())
            .spawn(move || callback(network.request_instance(&network_id)))
    }

    // Inbound

    fn process(&self, packet: Packet) {
        match packet.core_code() {
            Some(CoreCode::NetworkDataRequest | CoreCode::NetworkDataRequestResponse)
                if self.is_admitted(&packet) =>
            {
                self.handle(packet)
            }
            // Requests from a connection not yet accepted wait behind its NewClientConnected
            _ => self.schedule(move |net| net.handle(packet)),
        }
    }

    /// A host only takes packets other than NewClientConnected from accepted clients
    fn is_admitted(&self, packet: &Packet) -> bool {
        if self.role != Role::Host || packet.is(CoreCode::NewClientConnected) {
            return true;
        }
        match packet.source {
            Some(peer) => self.peers.read().contains(&peer),
            None => true,
        }
    }

    fn schedule<F>(&self, job: F)
    where
        F: FnOnce(&Network) + Send + 'static,
    {
        let marshaller = self.marshaller.read().clone();
        match marshaller {
            Some(marshaller) => {
                let Some(network) = self.me.upgrade() else {
                    return;
                };
                marshaller.invoke(Box::new(move || job(&network)));
            }
            None if self.direct_dispatch.load(Ordering::SeqCst) => job(self),
            None => self.diagnostics.exception(&SyncError::NoMarshaller),
        }
    }

    fn handle(&self, packet: Packet) {
        if !self.is_admitted(&packet) {
            if let Some(peer) = packet.source {
                self.diagnostics.warning(format!(
                    "Dropped packet {} from unaccepted connection {}",
                    packet.code, peer
                ));
            }
            return;
        }
        match self.table.decode(&self.registry, &packet) {
            Ok(Some(mut event)) => self.table.dispatch(self, &mut event),
            Ok(None) => {}
            Err(e) => self.diagnostics.exception(&e),
        }
    }

    /// Forward a peer's mutation to every other client
    fn relay(&self, packet: &Packet) -> SyncResult<()> {
        if self.role != Role::Host {
            return Ok(());
        }
        let exclude: Vec<ConnectionId> = packet.source.into_iter().collect();
        self.send_packet(packet, &exclude)?;
        Ok(())
    }

    fn drop_peer(&self, peer: ConnectionId) -> SyncResult<()> {
        self.transport()?.disconnect(peer)?;
        Ok(())
    }

    // Core handlers

    fn on_new_client(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        if self.role != Role::Host {
            return Ok(());
        }
        let Some(peer) = event.source() else {
            return Ok(());
        };

        let version = event
            .packet
            .header
            .get(VERSION_HEADER)
            .and_then(HeaderValue::as_i32);
        if version != Some(self.options.protocol_version) {
            self.diagnostics.warning(format!(
                "Rejecting {}: protocol version {:?}, expected {}",
                peer, version, self.options.protocol_version
            ));
            event.handled = true;
            return self.drop_peer(peer);
        }

        let accepted = {
            let mut peers = self.peers.write();
            let full = self
                .options
                .max_clients
                .is_some_and(|max| peers.len() >= max && !peers.contains(&peer));
            if !full {
                peers.insert(peer);
            }
            !full
        };
        if !accepted {
            self.diagnostics
                .warning(format!("Rejecting {}: client limit reached", peer));
            event.handled = true;
            return self.drop_peer(peer);
        }

        tracing::info!("Client {} connected", peer);
        Ok(())
    }

    fn on_property_updated(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        let (Some(target), Some(property)) = (&event.target, &event.property) else {
            return Ok(());
        };
        let value = event.value().cloned().unwrap_or(Value::Null);
        sync::apply_property(&self.registry, target, property, value)?;
        self.relay(&event.packet)
    }

    fn on_collection_changed(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        let (Some(target), EventData::Collection(change)) = (&event.target, &event.data) else {
            return Ok(());
        };
        sync::apply_collection(&self.registry, target, change)?;
        self.relay(&event.packet)
    }

    fn on_data_request(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        let (Some(peer), EventData::Request(request)) = (event.source(), &event.data) else {
            return Ok(());
        };
        let response = sync::answer(&self.registry, request);
        tracing::debug!(
            "Answering {} {} from {} ({})",
            request.kind,
            request.correlation_id,
            peer,
            if response.is_empty() { "empty" } else { "found" }
        );
        let payload = self.encode_with(
            CoreCode::NetworkDataRequestResponse,
            None,
            &ParseArgs::Request(response),
        )?;
        self.send_to(peer, &self.packet(CoreCode::NetworkDataRequestResponse, payload))
    }

    fn on_data_response(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        let EventData::Request(response) = &event.data else {
            return Ok(());
        };
        let reply = if response.is_empty() {
            None
        } else {
            for object in response.data.objects_in() {
                if let Err(e) = self.registry.register_recursive(&object) {
                    self.diagnostics
                        .warning(format!("Could not register fetched object: {}", e));
                }
            }
            Some(response.data.clone())
        };

        if !self
            .pending
            .resolve(&response.correlation_id, event.source(), reply)
        {
            self.diagnostics.notification(format!(
                "Response for unknown request {}",
                response.correlation_id
            ));
        }
        Ok(())
    }

    fn on_header_assigned(&self, event: &mut NetworkEvent) -> SyncResult<()> {
        if let EventData::Header(entry) = &event.data {
            self.header.write().set(entry.clone())?;
            tracing::debug!("Header {} assigned by {:?}", entry.name, event.source());
        }
        Ok(())
    }

    /// Tear down: drop every registered object, fail outstanding requests
    /// and close all connections
    pub fn shutdown(&self) {
        self.registry.clear();
        let failed = self.pending.fail_all();
        let peers = std::mem::take(&mut *self.peers.write());
        *self.reassembler.lock() = Reassembler::new();

        if let Ok(transport) = self.transport() {
            for peer in &peers {
                if let Err(e) = transport.disconnect(*peer) {
                    tracing::debug!("Disconnect of {} failed: {}", peer, e);
                }
            }
        }
        tracing::info!(
            "Network shut down ({} peers closed, {} requests failed)",
            peers.len(),
            failed
        );
    }
}

impl RemoteFetch for Network {
    fn fetch_object(&self, network_id: &str) -> SyncResult<Option<ObjectRef>> {
        let reply = self.request(RequestState::data(network_id))?;
        Ok(reply.and_then(|v| v.as_object().cloned()))
    }

    fn fetch_name(&self, type_name: &str) -> SyncResult<Option<String>> {
        let reply = self.request(RequestState::name(type_name))?;
        Ok(reply.and_then(|v| v.as_str().map(str::to_string)))
    }
}

impl TransportEvents for Network {
    fn on_connected(&self, peer: ConnectionId) {
        match self.role {
            Role::Client => {
                self.peers.write().insert(peer);
                let hello = self.packet(CoreCode::NewClientConnected, "null");
                if let Err(e) = self.send_to(peer, &hello) {
                    self.diagnostics.exception(&e);
                }
                tracing::info!("Connected to host {}", peer);
            }
            Role::Host => tracing::debug!("Connection {} opened", peer),
        }
    }

    fn on_packet_received(&self, peer: ConnectionId, frame: Bytes) {
        let _scope = DeliveryScope::enter();
        let packet = self
            .codec
            .decode(&frame)
            .and_then(|raw| self.reassembler.lock().push(peer, raw));
        match packet {
            Ok(Some(packet)) => self.process(packet),
            Ok(None) => {}
            Err(e) => self
                .diagnostics
                .notification(format!("Dropped malformed frame from {}: {}", peer, e)),
        }
    }

    fn on_disconnected(&self, peer: ConnectionId, reason: &str) {
        let _scope = DeliveryScope::enter();
        self.reassembler.lock().drop_source(peer);
        let known = self.peers.write().remove(&peer);
        let failed = self.pending.sweep_peer(peer);
        tracing::info!(
            "Peer {} disconnected: {} ({} requests failed)",
            peer,
            reason,
            failed
        );

        if known {
            let packet = self.packet(CoreCode::Disconnected, reason).with_source(peer);
            let event = NetworkEvent::new(packet, EventData::Value(Value::from(reason)));
            self.schedule(move |net| {
                let mut event = event;
                net.table.dispatch(net, &mut event);
            });
        }
    }

    fn on_error(&self, peer: Option<ConnectionId>, error: TransportError) {
        match error {
            TransportError::Codec(e) => self
                .diagnostics
                .notification(format!("Dropped malformed stream data from {:?}: {}", peer, e)),
            other => self.diagnostics.exception(&SyncError::Transport(other)),
        }
    }
}
