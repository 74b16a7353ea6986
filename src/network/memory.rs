//! In-process transport
//!
//! Endpoints are linked in pairs. Every endpoint owns a delivery thread,
//! so frames, connects and disconnects reach the network core on a
//! transport thread, in the order they were queued, as they would over TCP.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{Network, Transport, TransportError, TransportEvents, TransportResult};
use crate::protocol::ConnectionId;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

enum Delivery {
    Connected(ConnectionId),
    Frame(ConnectionId, Bytes),
    Disconnected(ConnectionId, String),
}

struct Link {
    remote: Weak<MemoryTransport>,
    remote_id: ConnectionId,
}

/// One end of an in-process connection set
pub struct MemoryTransport {
    name: String,
    links: RwLock<HashMap<ConnectionId, Link>>,
    queue: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>, events: Weak<dyn TransportEvents>) -> io::Result<Arc<Self>> {
        let name = name.into();
        let (queue, mut deliveries) = mpsc::unbounded_channel::<Delivery>();

        let worker = thread::Builder::new()
            .name(format!("{}-delivery", name))
            .spawn(move || {
                while let Some(delivery) = deliveries.blocking_recv() {
                    let Some(events) = events.upgrade() else {
                        break;
                    };
                    match delivery {
                        Delivery::Connected(peer) => events.on_connected(peer),
                        Delivery::Frame(peer, frame) => events.on_packet_received(peer, frame),
                        Delivery::Disconnected(peer, reason) => events.on_disconnected(peer, &reason),
                    }
                }
            })?;

        Ok(Arc::new(Self {
            name,
            links: RwLock::new(HashMap::new()),
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Create a transport feeding `network` and install it there
    pub fn for_network(name: impl Into<String>, network: &Arc<Network>) -> io::Result<Arc<Self>> {
        let events: Weak<dyn TransportEvents> = Arc::downgrade(network) as Weak<Network>;
        let transport = Self::new(name, events)?;
        network.set_transport(transport.clone());
        Ok(transport)
    }

    /// Connect two endpoints. Returns the connection id as seen from `a`
    /// and from `b`; `a` is notified first.
    pub fn link(a: &Arc<Self>, b: &Arc<Self>) -> (ConnectionId, ConnectionId) {
        let a_side = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::SeqCst));
        let b_side = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::SeqCst));

        a.links.write().insert(
            a_side,
            Link {
                remote: Arc::downgrade(b),
                remote_id: b_side,
            },
        );
        b.links.write().insert(
            b_side,
            Link {
                remote: Arc::downgrade(a),
                remote_id: a_side,
            },
        );
        tracing::debug!("Linked {} ({}) with {} ({})", a.name, a_side, b.name, b_side);

        a.enqueue(Delivery::Connected(a_side));
        b.enqueue(Delivery::Connected(b_side));
        (a_side, b_side)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.links.read().keys().copied().collect()
    }

    /// Stop the delivery thread after it drains its queue
    pub fn close(&self) {
        self.queue.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::error!("Delivery thread of {} panicked", self.name);
        }
    }

    fn enqueue(&self, delivery: Delivery) -> bool {
        match self.queue.lock().as_ref() {
            Some(queue) => queue.send(delivery).is_ok(),
            None => false,
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, target: ConnectionId, frame: Bytes) -> TransportResult<()> {
        let (remote, remote_id) = {
            let links = self.links.read();
            let link = links
                .get(&target)
                .ok_or(TransportError::UnknownConnection(target))?;
            (link.remote.clone(), link.remote_id)
        };
        let remote = remote.upgrade().ok_or(TransportError::Closed(target))?;
        if !remote.links.read().contains_key(&remote_id) {
            return Err(TransportError::Closed(target));
        }
        if remote.enqueue(Delivery::Frame(remote_id, frame)) {
            Ok(())
        } else {
            Err(TransportError::Closed(target))
        }
    }

    fn disconnect(&self, target: ConnectionId) -> TransportResult<()> {
        let link = self
            .links
            .write()
            .remove(&target)
            .ok_or(TransportError::UnknownConnection(target))?;
        if let Some(remote) = link.remote.upgrade() {
            remote.links.write().remove(&link.remote_id);
            remote.enqueue(Delivery::Disconnected(
                link.remote_id,
                "Disconnected by peer".to_string(),
            ));
        }
        self.enqueue(Delivery::Disconnected(target, "Disconnected locally".to_string()));
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.queue.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl TransportEvents for Recorder {
        fn on_connected(&self, peer: ConnectionId) {
            self.log.lock().push(format!("connected {}", peer));
        }

        fn on_packet_received(&self, peer: ConnectionId, frame: Bytes) {
            let text = String::from_utf8_lossy(&frame).into_owned();
            self.log.lock().push(format!("frame {} {}", peer, text));
        }

        fn on_disconnected(&self, peer: ConnectionId, reason: &str) {
            self.log.lock().push(format!("disconnected {} {}", peer, reason));
        }

        fn on_error(&self, _peer: Option<ConnectionId>, _error: TransportError) {}
    }

    fn settle(recorder: &Recorder, n: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.log.lock().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        recorder.log.lock().clone()
    }

    fn endpoint(name: &str, recorder: &Arc<Recorder>) -> Arc<MemoryTransport> {
        let events: Weak<dyn TransportEvents> = Arc::downgrade(recorder) as Weak<Recorder>;
        MemoryTransport::new(name, events).unwrap()
    }

    #[test]
    fn test_link_send_disconnect() {
        let host_log = Arc::new(Recorder::default());
        let client_log = Arc::new(Recorder::default());
        let host = endpoint("host", &host_log);
        let client = endpoint("client", &client_log);

        let (to_client, to_host) = MemoryTransport::link(&host, &client);
        client.send(to_host, Bytes::from_static(b"one")).unwrap();
        client.send(to_host, Bytes::from_static(b"two")).unwrap();

        let seen = settle(&host_log, 3);
        assert_eq!(
            seen,
            vec![
                format!("connected {}", to_client),
                format!("frame {} one", to_client),
                format!("frame {} two", to_client),
            ]
        );

        host.disconnect(to_client).unwrap();
        assert_eq!(
            settle(&client_log, 2)[1],
            format!("disconnected {} Disconnected by peer", to_host)
        );
        assert_eq!(
            settle(&host_log, 4)[3],
            format!("disconnected {} Disconnected locally", to_client)
        );

        assert!(matches!(
            client.send(to_host, Bytes::from_static(b"late")),
            Err(TransportError::UnknownConnection(_))
        ));
        assert!(host.connections().is_empty());

        host.close();
        client.close();
    }

    #[test]
    fn test_send_to_dropped_peer_fails() {
        let log = Arc::new(Recorder::default());
        let a = endpoint("a", &log);
        let b = endpoint("b", &log);
        let (a_side, _) = MemoryTransport::link(&a, &b);

        b.close();
        drop(b);
        assert!(matches!(
            a.send(a_side, Bytes::from_static(b"x")),
            Err(TransportError::Closed(_))
        ));
    }
}
