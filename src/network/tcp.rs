//! TCP transport
//!
//! One tokio task per connection reads the stream into a [`FrameReader`]
//! and drains a command channel into the socket. Frames from one
//! connection are delivered in order on that connection's task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use super::{Network, Transport, TransportError, TransportEvents, TransportResult};
use crate::protocol::{ConnectionId, FrameCodec, FrameReader};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum Command {
    Frame(Bytes),
    Close,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Frame(frame) => write!(f, "Frame({} bytes)", frame.len()),
            Command::Close => write!(f, "Close"),
        }
    }
}

/// A handle for queueing frames on a connection
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            id,
            addr,
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send(&self, command: Command) -> TransportResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.id));
        }
        self.sender
            .send(command)
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Check if the connection is still active
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Frames over TCP streams, for a host or a client
pub struct TcpTransport {
    events: Weak<dyn TransportEvents>,
    codec: FrameCodec,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn new(events: Weak<dyn TransportEvents>, codec: FrameCodec) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            events,
            codec,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown,
        })
    }

    /// Create a transport feeding `network` and install it there
    pub fn for_network(network: &Arc<Network>) -> Arc<Self> {
        let events: Weak<dyn TransportEvents> = Arc::downgrade(network) as Weak<Network>;
        let transport = Self::new(events, network.codec());
        network.set_transport(transport.clone());
        transport
    }

    /// Accept connections on `addr` until [`shutdown`](Self::shutdown).
    /// Returns the bound address.
    pub async fn listen(self: &Arc<Self>, addr: &str) -> TransportResult<SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TransportError::BindFailed(format!("Failed to bind to {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening on {}", local_addr);

        let transport = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);
                                transport.adopt(stream, addr);
                            }
                            Err(e) => {
                                transport.report(None, e.into());
                                tokio::time::sleep(ACCEPT_BACKOFF).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Listener on {} stopped", local_addr);
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Connect to a host. The connection is announced before this returns.
    pub async fn connect(self: &Arc<Self>, host: &str, port: u16, timeout: Duration) -> TransportResult<ConnectionId> {
        let addr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Unresolved(format!("{}:{}", host, port)))?;
        tracing::info!("Connecting to {}", addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(addr.to_string())),
        };
        Ok(self.adopt(stream, addr))
    }

    /// Open connections
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections.read().values().cloned().collect()
    }

    /// Close the listener and every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn adopt(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> ConnectionId {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on {}: {}", addr, e);
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, commands) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(id, addr, sender);
        self.connections.write().insert(id, handle.clone());

        if let Some(events) = self.events.upgrade() {
            events.on_connected(id);
        }
        tokio::spawn(self.clone().run_connection(stream, handle, commands));
        id
    }

    async fn run_connection(
        self: Arc<Self>,
        stream: TcpStream,
        handle: ConnectionHandle,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let id = handle.id;
        let (mut reader, mut writer) = stream.into_split();
        let mut frames = FrameReader::new(self.codec);
        let mut buf = vec![0u8; self.codec.buffer_size()];
        let mut shutdown = self.shutdown.subscribe();

        let reason = loop {
            if *shutdown.borrow() {
                break "Transport shut down".to_string();
            }
            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => break "Connection closed".to_string(),
                        Ok(n) => {
                            frames.extend(&buf[..n]);
                            self.drain(id, &mut frames);
                        }
                        Err(e) => break format!("Read error: {}", e),
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Frame(frame)) => {
                            if let Err(e) = writer.write_all(&frame).await {
                                break format!("Send error: {}", e);
                            }
                        }
                        Some(Command::Close) | None => break "Disconnected locally".to_string(),
                    }
                }
                _ = shutdown.changed() => {}
            }
        };

        handle.mark_disconnected();
        self.connections.write().remove(&id);
        let _ = writer.shutdown().await;

        tracing::debug!("Connection {} to {} ended: {}", id, handle.addr, reason);
        if let Some(events) = self.events.upgrade() {
            events.on_disconnected(id, &reason);
        }
    }

    fn drain(&self, id: ConnectionId, frames: &mut FrameReader) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => events.on_packet_received(id, frame),
                Ok(None) => break,
                Err(e) => {
                    events.on_error(Some(id), e.into());
                    break;
                }
            }
        }
    }

    fn report(&self, peer: Option<ConnectionId>, error: TransportError) {
        match self.events.upgrade() {
            Some(events) => events.on_error(peer, error),
            None => tracing::error!("Transport error: {}", error),
        }
    }

    fn handle(&self, target: ConnectionId) -> TransportResult<ConnectionHandle> {
        self.connections
            .read()
            .get(&target)
            .cloned()
            .ok_or(TransportError::UnknownConnection(target))
    }
}

impl Transport for TcpTransport {
    fn send(&self, target: ConnectionId, frame: Bytes) -> TransportResult<()> {
        self.handle(target)?.send(Command::Frame(frame))
    }

    fn disconnect(&self, target: ConnectionId) -> TransportResult<()> {
        self.handle(target)?.send(Command::Close)
    }
}
