//! Connectivity layer: TCP mesh formation and peer lifecycle.
//!
//! A [`Cluster`] is one node of a fully-connected mesh. Point it at any
//! member with [`Cluster::join`] and the handshake's peer-list gossip closes
//! the mesh transitively: every handshake carries the sender's routing
//! table, and every unknown peer learned this way is dialed in turn.
//!
//! Per-peer connection lifecycle:
//!
//! ```text
//!      NEW → HANDSHAKING → CONNECTED → CLOSING → GONE
//!                     \_ rejected _↗
//! ```
//!
//! A connection that fails its handshake (bad magic, version mismatch,
//! duplicate peer id, timeout) closes silently and emits no events. Once a
//! peer reaches CONNECTED it is visible in [`Cluster::peers_list`], its
//! `on_connect` event has fired, and its eventual teardown fires
//! `on_disconnect` exactly once.
//!
//! Every connection is owned by one worker scheduler: its reader loop and
//! writer task live there for the connection's whole life. Senders never
//! block: [`Cluster::send_message`] enqueues onto the peer's outbound queue
//! and the writer task drains it in order, which is what makes delivery
//! FIFO per connection.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use tidepool_core::{
    NetworkProvider, SchedulerHandle, SchedulerPool, Signal, TcpListenerTrait, TokioNetworkProvider,
};

use crate::message::{HandlerRegistration, HandlerTable, MessageHandler, UnknownTag};
use crate::types::{MessageTag, PeerAddress, PeerId};
use crate::wire;

const POISONED: &str = "connectivity lock poisoned";

/// Configuration for a cluster node.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Host to bind the listener on and to advertise to peers.
    pub host: String,
    /// Number of worker schedulers.
    pub schedulers: usize,
    /// How long a connection may sit in HANDSHAKING before it is abandoned.
    pub handshake_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            schedulers: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ClusterConfig {
    /// Default configuration with an explicit scheduler count.
    pub fn with_schedulers(schedulers: usize) -> Self {
        Self {
            schedulers,
            ..Self::default()
        }
    }
}

/// Per-peer routing state. Created on successful handshake, destroyed on
/// disconnect, never resurrected.
struct RoutingEntry {
    address: PeerAddress,
    /// Outbound frame queue; `None` for the local node's own entry.
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Identifies which physical connection backs this entry, so a replaced
    /// connection's teardown cannot remove its successor's entry.
    conn_id: u64,
    /// Pulsed to make the backing connection's tasks exit.
    close: Option<Arc<Signal>>,
}

struct SubscriberEntry {
    on_connect: Box<dyn FnMut(PeerId) + Send>,
    on_disconnect: Box<dyn FnMut(PeerId) + Send>,
}

#[derive(Default)]
pub(crate) struct SubscriberTable {
    next_id: u64,
    entries: HashMap<u64, SubscriberEntry>,
}

impl SubscriberTable {
    fn insert(&mut self, entry: SubscriberEntry) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    fn emit_connect(&mut self, peer: PeerId) {
        for entry in self.entries.values_mut() {
            (entry.on_connect)(peer);
        }
    }

    fn emit_disconnect(&mut self, peer: PeerId) {
        for entry in self.entries.values_mut() {
            (entry.on_disconnect)(peer);
        }
    }
}

/// State shared between the public handle, the accept loop, and every
/// connection task. Lock order: `subscribers` before `routing`; neither is
/// held across an await.
pub(crate) struct Shared {
    me: PeerId,
    listen_address: PeerAddress,
    handshake_timeout: Duration,
    routing: RwLock<HashMap<PeerId, RoutingEntry>>,
    subscribers: Mutex<SubscriberTable>,
    handlers: RwLock<HandlerTable>,
    dialing: Mutex<HashSet<PeerAddress>>,
    schedulers: Vec<SchedulerHandle>,
    next_conn_id: AtomicU64,
    next_scheduler: AtomicUsize,
}

impl Shared {
    fn new(
        me: PeerId,
        listen_address: PeerAddress,
        handshake_timeout: Duration,
        schedulers: Vec<SchedulerHandle>,
    ) -> Self {
        let mut routing = HashMap::new();
        routing.insert(
            me,
            RoutingEntry {
                address: listen_address.clone(),
                outbound: None,
                conn_id: 0,
                close: None,
            },
        );
        Self {
            me,
            listen_address,
            handshake_timeout,
            routing: RwLock::new(routing),
            subscribers: Mutex::new(SubscriberTable::default()),
            handlers: RwLock::new(HandlerTable::new()),
            dialing: Mutex::new(HashSet::new()),
            schedulers,
            next_conn_id: AtomicU64::new(1),
            next_scheduler: AtomicUsize::new(0),
        }
    }

    pub(crate) fn me(&self) -> PeerId {
        self.me
    }

    pub(crate) fn schedulers(&self) -> &[SchedulerHandle] {
        &self.schedulers
    }

    fn next_scheduler(&self) -> SchedulerHandle {
        let index = self.next_scheduler.fetch_add(1, Ordering::Relaxed) % self.schedulers.len();
        self.schedulers[index].clone()
    }

    pub(crate) fn peers_list(&self) -> HashSet<PeerId> {
        self.routing.read().expect(POISONED).keys().copied().collect()
    }

    pub(crate) fn peer_address(&self, peer: PeerId) -> Option<PeerAddress> {
        self.routing
            .read()
            .expect(POISONED)
            .get(&peer)
            .map(|entry| entry.address.clone())
    }

    pub(crate) fn has_peer(&self, peer: PeerId) -> bool {
        self.routing.read().expect(POISONED).contains_key(&peer)
    }

    pub(crate) fn with_handlers<R>(&self, f: impl FnOnce(&mut HandlerTable) -> R) -> R {
        f(&mut self.handlers.write().expect(POISONED))
    }

    pub(crate) fn lock_subscribers(&self) -> MutexGuard<'_, SubscriberTable> {
        self.subscribers.lock().expect(POISONED)
    }

    /// Serialize and enqueue a message for `peer`. Best-effort: unknown
    /// peers, torn-down connections and oversized payloads all drop
    /// silently. Messages to the local node dispatch in place.
    pub(crate) fn send_message(&self, peer: PeerId, tag: MessageTag, payload: &[u8]) {
        if peer == self.me {
            if self.dispatch(peer, tag, payload.to_vec()).is_err() {
                tracing::debug!(%tag, "dropping loopback message with unregistered tag");
            }
            return;
        }
        let frame = match wire::encode_frame(tag, payload) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "dropping oversized message");
                return;
            }
        };
        let sender = self
            .routing
            .read()
            .expect(POISONED)
            .get(&peer)
            .and_then(|entry| entry.outbound.clone());
        match sender {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => tracing::trace!(%peer, "dropping message to unknown peer"),
        }
    }

    fn dispatch(&self, peer: PeerId, tag: MessageTag, payload: Vec<u8>) -> Result<(), UnknownTag> {
        let handler = self.handlers.read().expect(POISONED).get(tag);
        match handler {
            Some(handler) => {
                handler(peer, payload);
                Ok(())
            }
            // Reserved tags belong to the core stack; a remote may send on
            // them before the local node has wired that layer up. Dropping
            // is the best-effort contract; only unknown user tags are a
            // protocol violation.
            None if tag.0 < MessageTag::FIRST_USER => {
                tracing::debug!(%peer, %tag, "dropping message for unwired reserved tag");
                Ok(())
            }
            None => Err(UnknownTag),
        }
    }

    fn local_handshake(&self) -> wire::Handshake {
        let routing = self.routing.read().expect(POISONED);
        wire::Handshake {
            peer_id: self.me,
            listen_port: self.listen_address.port,
            known_peers: routing
                .iter()
                .map(|(peer, entry)| (*peer, entry.address.clone()))
                .collect(),
        }
    }

    /// Try to install a freshly-handshaken connection in the routing table.
    ///
    /// Returns false if the connection lost the duplicate-peer tie-break and
    /// must close silently. On a win against an existing entry the old
    /// connection is told to close and the entry is taken over without any
    /// connect/disconnect events (the peer never left the table).
    fn admit(
        &self,
        peer: PeerId,
        address: PeerAddress,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        conn_id: u64,
        close: Arc<Signal>,
        initiated_by_us: bool,
    ) -> bool {
        let mut subscribers = self.lock_subscribers();
        let mut newly_connected = false;
        let mut superseded: Option<Arc<Signal>> = None;
        {
            let mut routing = self.routing.write().expect(POISONED);
            match routing.entry(peer) {
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    // Tie-break: the connection initiated by the numerically
                    // lower peer id survives a double-connect.
                    let we_win = initiated_by_us == (self.me < peer);
                    if !we_win {
                        return false;
                    }
                    let entry = occupied.get_mut();
                    superseded = entry.close.replace(close);
                    entry.outbound = Some(outbound);
                    entry.conn_id = conn_id;
                    entry.address = address;
                }
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(RoutingEntry {
                        address,
                        outbound: Some(outbound),
                        conn_id,
                        close: Some(close),
                    });
                    newly_connected = true;
                }
            }
        }
        if let Some(old) = superseded {
            old.pulse();
        }
        if newly_connected {
            subscribers.emit_connect(peer);
        }
        true
    }

    /// Remove the routing entry backed by connection `conn_id`, firing
    /// `on_disconnect` if the peer actually left the table.
    fn remove_connection(&self, peer: PeerId, conn_id: u64) {
        let mut subscribers = self.lock_subscribers();
        let removed = {
            let mut routing = self.routing.write().expect(POISONED);
            match routing.get(&peer) {
                Some(entry) if entry.conn_id == conn_id => {
                    routing.remove(&peer);
                    true
                }
                _ => false,
            }
        };
        if removed {
            tracing::debug!(%peer, "peer disconnected");
            subscribers.emit_disconnect(peer);
        }
    }
}

/// One node of the cluster mesh.
///
/// Construct with [`Cluster::bind`]; destroy by dropping, in any order
/// relative to its peers. The node owns its scheduler pool, so dropping it
/// cancels every connection task and closes every socket.
pub struct Cluster<N: NetworkProvider = TokioNetworkProvider> {
    shared: Arc<Shared>,
    network: N,
    pool: SchedulerPool,
}

impl Cluster<TokioNetworkProvider> {
    /// Bind a node on `127.0.0.1:port` with the default configuration.
    /// Port `0` picks an ephemeral port; see [`Cluster::listen_address`].
    pub fn bind(port: u16) -> io::Result<Self> {
        Self::with_network(TokioNetworkProvider::new(), port, ClusterConfig::default())
    }

    /// Bind a node with an explicit configuration.
    pub fn bind_with(port: u16, config: ClusterConfig) -> io::Result<Self> {
        Self::with_network(TokioNetworkProvider::new(), port, config)
    }
}

impl<N> Cluster<N>
where
    N: NetworkProvider + Send + Sync + 'static,
{
    /// Bind a node using the given network provider.
    ///
    /// Blocks the calling thread until the listener is bound (or has failed
    /// to bind); must not be called from one of the node's own schedulers.
    pub fn with_network(network: N, port: u16, config: ClusterConfig) -> io::Result<Self> {
        let pool = SchedulerPool::new(config.schedulers);
        let me = PeerId::random();
        let bind_addr = format!("{}:{}", config.host, port);

        let (port_tx, port_rx) = std::sync::mpsc::channel::<io::Result<u16>>();
        let (shared_tx, shared_rx) = tokio::sync::oneshot::channel::<Arc<Shared>>();
        {
            let network = network.clone();
            pool.handle(0).spawn(move || {
                tokio::task::spawn_local(async move {
                    let listener = match network.bind(&bind_addr).await {
                        Ok(listener) => listener,
                        Err(error) => {
                            let _ = port_tx.send(Err(error));
                            return;
                        }
                    };
                    let port = match listener.local_addr().and_then(|addr| port_of(&addr)) {
                        Ok(port) => port,
                        Err(error) => {
                            let _ = port_tx.send(Err(error));
                            return;
                        }
                    };
                    let _ = port_tx.send(Ok(port));
                    // The accept loop starts once the shared state exists.
                    let Ok(shared) = shared_rx.await else { return };
                    accept_loop(shared, network, listener).await;
                });
            });
        }
        let port = port_rx
            .recv()
            .map_err(|_| io::Error::other("scheduler pool unavailable"))??;

        let shared = Arc::new(Shared::new(
            me,
            PeerAddress::new(config.host, port),
            config.handshake_timeout,
            pool.handles(),
        ));
        let _ = shared_tx.send(shared.clone());
        tracing::debug!(me = %shared.me, address = %shared.listen_address, "cluster node listening");
        Ok(Self {
            shared,
            network,
            pool,
        })
    }

    /// This node's own peer id. Never nil.
    pub fn me(&self) -> PeerId {
        self.shared.me
    }

    /// The address this node's listener is bound to.
    pub fn listen_address(&self) -> PeerAddress {
        self.shared.listen_address.clone()
    }

    /// Ask this node to connect to the mesh member at `address`.
    ///
    /// Returns immediately; the dial, handshake and subsequent gossip all
    /// happen on the node's schedulers. Joining an address we are already
    /// connected to (or our own) is a no-op.
    pub fn join(&self, address: PeerAddress) {
        spawn_join(self.shared.clone(), self.network.clone(), address);
    }

    /// Snapshot of the routing table: this node plus every peer with a
    /// completed handshake and no observed disconnect.
    pub fn peers_list(&self) -> HashSet<PeerId> {
        self.shared.peers_list()
    }

    /// The address a peer can be reached at, if it is in the routing table.
    pub fn peer_address(&self, peer: PeerId) -> Option<PeerAddress> {
        self.shared.peer_address(peer)
    }

    /// Send a raw payload under an explicit tag. Prefer
    /// [`HandlerRegistration::send`], which supplies its own tag.
    ///
    /// Best-effort: if the peer is unknown or its connection is being torn
    /// down, the call silently succeeds without delivery. Never blocks the
    /// caller; safe from any thread.
    pub fn send_message(&self, peer: PeerId, tag: MessageTag, payload: &[u8]) {
        self.shared.send_message(peer, tag, payload);
    }

    /// Register a message handler under the next free user tag.
    ///
    /// The handler is invoked with the source peer and payload, in frame
    /// arrival order, on the scheduler owning the source connection.
    pub fn register_handler(
        &self,
        handler: impl Fn(PeerId, Vec<u8>) + Send + Sync + 'static,
    ) -> HandlerRegistration {
        let handler: MessageHandler = Arc::new(handler);
        let tag = self.shared.with_handlers(|table| table.allocate(handler));
        HandlerRegistration::new(self.shared.clone(), tag)
    }

    /// Suspend peers-list event delivery while the guard is held.
    ///
    /// Inside the freeze window the peers list cannot change, so a caller
    /// can inspect [`Cluster::peers_list`] and attach subscriptions without
    /// racing connect/disconnect events. Events that occur during the
    /// freeze are delivered after release.
    pub fn freeze_peers(&self) -> PeersListFreeze<'_> {
        PeersListFreeze {
            guard: self.shared.lock_subscribers(),
        }
    }

    /// Subscribe to peers-list changes. Requires a freeze so registration
    /// cannot race event delivery; see [`Cluster::freeze_peers`].
    pub fn subscribe_peers(
        &self,
        freeze: &mut PeersListFreeze<'_>,
        on_connect: impl FnMut(PeerId) + Send + 'static,
        on_disconnect: impl FnMut(PeerId) + Send + 'static,
    ) -> PeersSubscription {
        let id = freeze.guard.insert(SubscriberEntry {
            on_connect: Box::new(on_connect),
            on_disconnect: Box::new(on_disconnect),
        });
        PeersSubscription {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Number of worker schedulers this node runs.
    pub fn scheduler_count(&self) -> usize {
        self.pool.len()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Guard suspending peers-list event delivery. See [`Cluster::freeze_peers`].
pub struct PeersListFreeze<'a> {
    guard: MutexGuard<'a, SubscriberTable>,
}

/// A live peers-list subscription. Dropping it unsubscribes.
///
/// Must not be dropped while the same thread holds a [`PeersListFreeze`].
pub struct PeersSubscription {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for PeersSubscription {
    fn drop(&mut self) {
        self.shared.lock_subscribers().entries.remove(&self.id);
    }
}

/// One-shot latch that pulses when a peer leaves the routing table.
///
/// If the peer is already absent at construction time the watcher is born
/// pulsed. Pulsing is idempotent.
pub struct DisconnectWatcher {
    signal: Arc<Signal>,
    _subscription: Option<PeersSubscription>,
}

impl DisconnectWatcher {
    /// Watch for `peer` leaving `cluster`'s routing table.
    pub fn new<N>(cluster: &Cluster<N>, peer: PeerId) -> Self
    where
        N: NetworkProvider + Send + Sync + 'static,
    {
        let signal = Arc::new(Signal::new());
        let mut freeze = cluster.freeze_peers();
        if !cluster.shared.has_peer(peer) {
            signal.pulse();
            drop(freeze);
            return Self {
                signal,
                _subscription: None,
            };
        }
        let subscription = {
            let signal = signal.clone();
            cluster.subscribe_peers(
                &mut freeze,
                |_connected| {},
                move |disconnected| {
                    if disconnected == peer {
                        signal.pulse();
                    }
                },
            )
        };
        Self {
            signal,
            _subscription: Some(subscription),
        }
    }

    /// Whether the watched peer has been observed gone.
    pub fn is_pulsed(&self) -> bool {
        self.signal.is_pulsed()
    }

    /// Wait until the watched peer is gone.
    pub async fn wait(&self) {
        self.signal.wait().await
    }
}

// ── Connection machinery ────────────────────────────────────────────────

enum ConnectionOrigin {
    Inbound { remote_host: String },
    Outbound { address: PeerAddress },
}

async fn accept_loop<N>(shared: Arc<Shared>, network: N, listener: N::TcpListener)
where
    N: NetworkProvider + Send + Sync + 'static,
{
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::debug!(%remote, "accepted cluster connection");
                let remote_host = host_of(&remote);
                // Hand the connection to the scheduler that will own it.
                let scheduler = shared.next_scheduler();
                let shared = shared.clone();
                let network = network.clone();
                scheduler.spawn(move || {
                    tokio::task::spawn_local(run_connection(
                        shared,
                        network,
                        stream,
                        ConnectionOrigin::Inbound { remote_host },
                    ));
                });
            }
            Err(error) => {
                tracing::warn!(%error, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn spawn_join<N>(shared: Arc<Shared>, network: N, address: PeerAddress)
where
    N: NetworkProvider + Send + Sync + 'static,
{
    {
        let routing = shared.routing.read().expect(POISONED);
        if routing.values().any(|entry| entry.address == address) {
            return;
        }
    }
    if !shared.dialing.lock().expect(POISONED).insert(address.clone()) {
        return;
    }
    tracing::debug!(%address, "dialing cluster member");
    let scheduler = shared.next_scheduler();
    scheduler.spawn(move || {
        tokio::task::spawn_local(async move {
            let address_string = address.to_string();
            let connect = network.connect(&address_string);
            match tokio::time::timeout(shared.handshake_timeout, connect).await {
                Ok(Ok(stream)) => {
                    run_connection(
                        shared.clone(),
                        network,
                        stream,
                        ConnectionOrigin::Outbound {
                            address: address.clone(),
                        },
                    )
                    .await;
                }
                Ok(Err(error)) => tracing::debug!(%address, %error, "join attempt failed"),
                Err(_) => tracing::debug!(%address, "join attempt timed out"),
            }
            shared.dialing.lock().expect(POISONED).remove(&address);
        });
    });
}

/// Drive one connection from handshake to teardown. Runs entirely on the
/// connection's owning scheduler.
async fn run_connection<N>(
    shared: Arc<Shared>,
    network: N,
    stream: N::TcpStream,
    origin: ConnectionOrigin,
) where
    N: NetworkProvider + Send + Sync + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let local = wire::encode_handshake(&shared.local_handshake());
    if writer.write_all(&local).await.is_err() || writer.flush().await.is_err() {
        return;
    }

    let handshake = tokio::time::timeout(shared.handshake_timeout, wire::read_handshake(&mut reader));
    let remote = match handshake.await {
        Ok(Ok(remote)) => remote,
        Ok(Err(error)) => {
            tracing::warn!(%error, "rejecting connection: bad handshake");
            return;
        }
        Err(_) => {
            tracing::debug!("handshake timed out");
            return;
        }
    };

    if remote.peer_id == shared.me || remote.peer_id.is_nil() {
        tracing::debug!("closing connection to self or nil peer");
        return;
    }

    let initiated_by_us = matches!(origin, ConnectionOrigin::Outbound { .. });
    let remote_host = match &origin {
        ConnectionOrigin::Inbound { remote_host } => remote_host.clone(),
        ConnectionOrigin::Outbound { address } => address.host.clone(),
    };
    let remote_address = PeerAddress::new(remote_host, remote.listen_port);

    let conn_id = shared.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let close = Arc::new(Signal::new());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if !shared.admit(
        remote.peer_id,
        remote_address,
        out_tx,
        conn_id,
        close.clone(),
        initiated_by_us,
    ) {
        tracing::debug!(peer = %remote.peer_id, "closing duplicate connection");
        return;
    }
    tracing::debug!(peer = %remote.peer_id, "peer connected");

    // Writer task: drains the outbound queue in order. A write failure
    // pulses `close` so the reader side tears the connection down.
    let writer_task = {
        let close = close.clone();
        tokio::task::spawn_local(async move {
            while let Some(frame) = out_rx.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    close.pulse();
                    return;
                }
            }
        })
    };

    // Peer-list gossip: dial everything the remote knows that we don't.
    for (peer, address) in remote.known_peers {
        if peer == shared.me || peer.is_nil() || shared.has_peer(peer) {
            continue;
        }
        spawn_join(shared.clone(), network.clone(), address);
    }

    loop {
        tokio::select! {
            _ = close.wait() => break,
            frame = wire::read_frame(&mut reader) => match frame {
                Ok((tag, payload)) => {
                    if shared.dispatch(remote.peer_id, tag, payload).is_err() {
                        tracing::warn!(peer = %remote.peer_id, %tag, "unknown message tag, closing connection");
                        break;
                    }
                }
                Err(wire::WireError::Io(error)) => {
                    tracing::debug!(peer = %remote.peer_id, %error, "connection closed");
                    break;
                }
                Err(error) => {
                    tracing::warn!(peer = %remote.peer_id, %error, "protocol violation, closing connection");
                    break;
                }
            },
        }
    }

    writer_task.abort();
    shared.remove_connection(remote.peer_id, conn_id);
}

fn host_of(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some((host, _port)) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string(),
        None => addr.to_string(),
    }
}

fn port_of(addr: &str) -> io::Result<u16> {
    addr.rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| io::Error::other(format!("listener address has no port: {addr}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_port_and_brackets() {
        assert_eq!(host_of("127.0.0.1:4500"), "127.0.0.1");
        assert_eq!(host_of("[::1]:4500"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }

    #[test]
    fn port_of_parses_listener_addresses() {
        assert_eq!(port_of("127.0.0.1:4500").expect("port"), 4500);
        assert_eq!(port_of("[::1]:9").expect("port"), 9);
        assert!(port_of("nonsense").is_err());
    }
}
