//! End-to-end scenarios over the in-process transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use peersync::dispatch::WorkerMarshaller;
use peersync::network::{
    MemoryTransport, Network, NetworkOptions, Transport, TransportError, TransportEvents,
};
use peersync::protocol::{ConnectionId, CoreCode, Header, HeaderValue, Packet, VERSION_HEADER};
use peersync::registry::Role;
use peersync::serialize::{
    downcast, NetworkList, NetworkObject, ObjectRef, ObservableList, Record, RecordSchema, Value,
    NETWORK_ID,
};
use peersync::SyncError;

struct Node {
    network: Arc<Network>,
    transport: Arc<MemoryTransport>,
}

fn player_schema() -> Arc<RecordSchema> {
    Arc::new(
        RecordSchema::new("demo.Player")
            .registrable()
            .value("Name", "")
            .value("Score", 0i32),
    )
}

fn node_with(role: Role, name: &str, options: NetworkOptions) -> Node {
    let network = Network::new(role, options).unwrap();
    network.registry().types().register_schema(&player_schema());
    let marshaller = WorkerMarshaller::new(format!("{}-dispatch", name)).unwrap();
    network.set_marshaller(Arc::new(marshaller));
    let transport = MemoryTransport::for_network(name, &network).unwrap();
    Node { network, transport }
}

fn node(role: Role, name: &str) -> Node {
    node_with(role, name, NetworkOptions::default())
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// Link a client to the host and wait until the host accepted it
fn join(host: &Node, client: &Node) {
    let before = host.network.peers().len();
    MemoryTransport::link(&host.transport, &client.transport);
    wait_until("host to accept the client", || {
        host.network.peers().len() == before + 1
    });
    assert!(client.network.is_connected());
}

fn new_player(name: &str) -> Arc<Record> {
    let player = Arc::new(Record::new(player_schema()));
    player.set_value("Name", name).unwrap();
    player
}

fn id_of(object: &Record) -> String {
    object.get_str(NETWORK_ID).unwrap_or_default()
}

#[test]
fn property_update_reaches_other_clients_but_not_its_origin() {
    let host = node(Role::Host, "host");
    let a = node(Role::Client, "a");
    let b = node(Role::Client, "b");
    join(&host, &a);
    join(&host, &b);

    let player = new_player("ann");
    host.network.register(player.clone()).unwrap();
    let id = id_of(&player);

    let on_a = a.network.request_instance_as::<Record>(&id).unwrap().unwrap();
    let on_b = b.network.request_instance_as::<Record>(&id).unwrap().unwrap();
    assert_eq!(on_a.get_str("Name").as_deref(), Some("ann"));

    let echoes = Arc::new(AtomicUsize::new(0));
    let counter = echoes.clone();
    a.network.on(CoreCode::PropertyUpdated, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    on_a.set_value("Score", 5i32).unwrap();

    wait_until("host to apply the score", || player.get_i64("Score") == Some(5));
    wait_until("b to receive the relay", || on_b.get_i64("Score") == Some(5));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(echoes.load(Ordering::SeqCst), 0);
    assert_eq!(on_a.get_i64("Score"), Some(5));
}

#[test]
fn host_change_is_broadcast_to_every_client() {
    let host = node(Role::Host, "host");
    let a = node(Role::Client, "a");
    let b = node(Role::Client, "b");
    join(&host, &a);
    join(&host, &b);

    let player = new_player("bob");
    host.network.register(player.clone()).unwrap();
    let id = id_of(&player);
    let on_a = a.network.request_instance_as::<Record>(&id).unwrap().unwrap();
    let on_b = b.network.request_instance_as::<Record>(&id).unwrap().unwrap();

    player.set_value("Name", "robert").unwrap();

    wait_until("a to see the rename", || on_a.get_str("Name").as_deref() == Some("robert"));
    wait_until("b to see the rename", || on_b.get_str("Name").as_deref() == Some("robert"));
}

#[test]
fn client_registration_gets_its_id_from_the_host() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let first = new_player("cid");
    let second = new_player("dee");
    client.network.register(first.clone()).unwrap();
    client.network.register(second.clone()).unwrap();

    let first_id = id_of(&first);
    let second_id = id_of(&second);
    assert!(first_id.starts_with("Player_"), "got {}", first_id);
    assert!(second_id.starts_with("Player_"), "got {}", second_id);
    assert_ne!(first_id, second_id);
    assert!(client.network.get(&first_id).is_some());
    assert!(host.network.get(&first_id).is_none());
}

#[test]
fn client_registration_without_host_fails() {
    let client = node(Role::Client, "lonely");
    let player = new_player("eve");
    let result = client.network.register(player);
    assert!(matches!(result, Err(SyncError::IdAssignmentFailed(_))));
}

#[test]
fn collection_insert_is_applied_at_its_index() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let list = Arc::new(ObservableList::from_items((0..5).map(Value::I32).collect()));
    host.network.register(list.clone()).unwrap();
    let id = list.identity().map(|i| i.id()).unwrap_or_default();

    let remote = client
        .network
        .request_instance_as::<ObservableList>(&id)
        .unwrap()
        .unwrap();
    assert_eq!(remote.len(), 5);

    remote.insert(2, Value::I32(99)).unwrap();

    wait_until("host list to grow", || list.len() == 6);
    assert_eq!(
        list.items(),
        vec![0, 1, 99, 2, 3, 4].into_iter().map(Value::I32).collect::<Vec<_>>()
    );

    list.remove_at(0).unwrap();
    wait_until("client list to shrink", || remote.len() == 5);
    assert_eq!(remote.get_item(0), Some(Value::I32(1)));
}

#[test]
fn fetch_by_id_and_by_type() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let player = new_player("fay");
    host.network.register(player.clone()).unwrap();

    let fetched: ObjectRef = client
        .network
        .request_first_of_type("demo.Player")
        .unwrap()
        .unwrap();
    let fetched = downcast::<Record>(fetched).unwrap();
    assert_eq!(id_of(&fetched), id_of(&player));
    assert_eq!(fetched.get_str("Name").as_deref(), Some("fay"));

    // Fetched objects are registered locally
    assert!(client.network.get(&id_of(&player)).is_some());

    assert!(client.network.request_instance("Player_404").unwrap().is_none());
    assert_eq!(client.network.pending_requests(), 0);
}

struct Silent;

impl TransportEvents for Silent {
    fn on_packet_received(&self, _peer: ConnectionId, _frame: Bytes) {}
    fn on_disconnected(&self, _peer: ConnectionId, _reason: &str) {}
    fn on_error(&self, _peer: Option<ConnectionId>, _error: TransportError) {}
}

#[test]
fn disconnect_wakes_a_blocked_request() {
    let client = node(Role::Client, "client");
    let silent_events: Arc<dyn TransportEvents> = Arc::new(Silent);
    let silent = MemoryTransport::new("silent", Arc::downgrade(&silent_events)).unwrap();
    let (silent_side, _) = MemoryTransport::link(&silent, &client.transport);
    wait_until("client to see the peer", || client.network.is_connected());

    let network = client.network.clone();
    let waiter = thread::spawn(move || network.request_instance("Player_1"));

    wait_until("request to be pending", || client.network.pending_requests() == 1);
    silent.disconnect(silent_side).unwrap();

    let result = waiter.join().unwrap();
    assert!(result.unwrap().is_none());
    assert_eq!(client.network.pending_requests(), 0);
    assert!(!client.network.is_connected());
}

#[test]
fn host_ignores_mutations_from_unaccepted_connections() {
    let host = node(Role::Host, "host");
    let member = node(Role::Client, "member");
    join(&host, &member);

    let player = new_player("gus");
    host.network.register(player.clone()).unwrap();
    let id = id_of(&player);
    let on_member = member.network.request_instance_as::<Record>(&id).unwrap().unwrap();

    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    host.network
        .diagnostics()
        .set_warning_handler(move |m| sink.lock().push(m.to_string()));

    let silent_events: Arc<dyn TransportEvents> = Arc::new(Silent);
    let intruder = MemoryTransport::new("intruder", Arc::downgrade(&silent_events)).unwrap();
    let (to_host, _) = MemoryTransport::link(&intruder, &host.transport);

    let codec = host.network.codec();
    let score = Packet::new(
        CoreCode::PropertyUpdated,
        format!("{}:Score:Int32:7", id),
        Header::new(),
    );
    let mut old_version = Header::new();
    old_version.push(VERSION_HEADER, 2i32).unwrap();
    let hello = Packet::new(CoreCode::NewClientConnected, "null", old_version);

    // Before any handshake, then right behind a rejected one
    for frame in codec.encode(&score).unwrap() {
        intruder.send(to_host, frame).unwrap();
    }
    for packet in [&hello, &score] {
        for frame in codec.encode(packet).unwrap() {
            let _ = intruder.send(to_host, frame);
        }
    }

    wait_until("intruder to be rejected", || {
        warnings.lock().iter().any(|w| w.contains("protocol version"))
    });
    wait_until("unaccepted packet to be dropped", || {
        warnings.lock().iter().any(|w| w.contains("unaccepted connection"))
    });
    thread::sleep(Duration::from_millis(50));

    assert_eq!(player.get_i64("Score"), Some(0));
    assert_eq!(on_member.get_i64("Score"), Some(0));
    assert_eq!(host.network.peers().len(), 1);
}

#[test]
fn version_mismatch_is_rejected() {
    let host = node(Role::Host, "host");
    let client = node_with(
        Role::Client,
        "old-client",
        NetworkOptions::default().with_protocol_version(2),
    );

    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    host.network
        .diagnostics()
        .set_warning_handler(move |m| sink.lock().push(m.to_string()));

    let disconnected = Arc::new(AtomicUsize::new(0));
    let counter = disconnected.clone();
    client.network.on(CoreCode::Disconnected, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    MemoryTransport::link(&host.transport, &client.transport);

    wait_until("client to be dropped", || disconnected.load(Ordering::SeqCst) == 1);
    assert!(host.network.peers().is_empty());
    assert!(!client.network.is_connected());
    assert!(warnings.lock().iter().any(|w| w.contains("protocol version")));
}

#[test]
fn client_limit_is_enforced() {
    let host = node_with(
        Role::Host,
        "small-host",
        NetworkOptions::default().with_max_clients(1),
    );
    let first = node(Role::Client, "first");
    let second = node(Role::Client, "second");
    join(&host, &first);

    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = dropped.clone();
    second.network.on(CoreCode::Disconnected, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    MemoryTransport::link(&host.transport, &second.transport);
    wait_until("second client to be dropped", || dropped.load(Ordering::SeqCst) == 1);
    assert!(!second.network.is_connected());
    assert_eq!(host.network.peers().len(), 1);
    assert!(first.network.is_connected());
}

#[test]
fn header_assignment_reaches_peers() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let sent = host
        .network
        .assign_header_value("room", Value::from("lobby"))
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        host.network.header().get("room"),
        Some(&HeaderValue::from("lobby"))
    );

    wait_until("client header to update", || {
        client.network.header().get("room") == Some(&HeaderValue::from("lobby"))
    });
}

#[test]
fn user_events_are_broadcast_and_decoded() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client.network.on(100, move |_, event| {
        if let Some(value) = event.value() {
            sink.lock().push(value.clone());
        }
        Ok(())
    });

    let payload = Value::list("String", vec![Value::from("a"), Value::from("b:c")]);
    assert_eq!(host.network.send_event(100, &payload).unwrap(), 1);

    wait_until("client to receive the event", || received.lock().len() == 1);
    assert_eq!(received.lock()[0], payload);
}

#[test]
fn large_payloads_are_reassembled() {
    let host = node(Role::Host, "host");
    let client = node(Role::Client, "client");
    join(&host, &client);

    let received = Arc::new(Mutex::new(None));
    let sink = received.clone();
    client.network.on(101, move |_, event| {
        *sink.lock() = event.value().cloned();
        Ok(())
    });

    let text = "x".repeat(host.network.options().buffer_size * 3);
    host.network.send_event(101, &Value::from(text.as_str())).unwrap();

    wait_until("large payload", || received.lock().is_some());
    assert_eq!(received.lock().clone(), Some(Value::from(text.as_str())));
}
