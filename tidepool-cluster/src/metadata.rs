//! Metadata cluster: semilattice gossip.
//!
//! Every node holds a local copy of an application-defined metadata value
//! `M`. The only mutation is the semilattice join `⊔`, so each copy moves
//! monotonically upward and — because the whole value is re-broadcast on
//! every local change and on every new connection — eventually equals the
//! join of everything ever introduced at any peer. Idempotence of `⊔`
//! makes the redundant whole-value gossip harmless.
//!
//! The layer speaks a three-message sub-protocol on the reserved `UTILITY`
//! tag: `METADATA` (a serialized snapshot to join locally), `PING` and
//! `PING_RESPONSE` (ack correlation for the sync barriers). A peer answers
//! `PING` by flushing its current value *before* the response; per-
//! connection FIFO then gives [`RootView::sync_from`] its guarantee: when
//! the response arrives, the local value already covers everything the
//! peer knew when it received the ping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use tidepool_core::{JsonCodec, MessageCodec, NetworkProvider, Signal};

use crate::connectivity::{Cluster, PeersSubscription, Shared};
use crate::message::HandlerRegistration;
use crate::types::{MessageTag, PeerId};
use crate::wire::{self, UtilityMessage};

const POISONED: &str = "metadata lock poisoned";

/// A bounded join-semilattice value.
///
/// `join` must be commutative, associative and idempotent, with
/// `a ⊔ b ⊒ a` and `a ⊔ b ⊒ b`. Under those laws the gossip protocol
/// converges regardless of delivery order or duplication. Joining never
/// fails.
pub trait Semilattice:
    Clone + Default + PartialEq + Serialize + DeserializeOwned + Send + 'static
{
    /// Set `self` to the join of `self` and `other`.
    fn join(&mut self, other: Self);
}

/// Why a sync barrier did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The caller's interrupt signal pulsed before the peer acknowledged.
    #[error("sync interrupted")]
    Interrupted,
    /// The peer was not connected, or disconnected before acknowledging.
    #[error("sync failed: peer disconnected")]
    Failed,
}

struct PingWaiter {
    peer: PeerId,
    signal: Arc<Signal>,
    failed: Arc<AtomicBool>,
}

#[derive(Default)]
struct ChangePublisher {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Box<dyn Fn() + Send>>>,
}

impl ChangePublisher {
    fn notify(&self) {
        for callback in self.subscribers.lock().expect(POISONED).values() {
            callback();
        }
    }
}

/// A live change-notification subscription. Dropping it unsubscribes.
pub struct MetadataSubscription {
    publisher: Arc<ChangePublisher>,
    id: u64,
}

impl Drop for MetadataSubscription {
    fn drop(&mut self) {
        self.publisher
            .subscribers
            .lock()
            .expect(POISONED)
            .remove(&self.id);
    }
}

struct MetadataShared<M, C> {
    cluster: Arc<Shared>,
    codec: C,
    /// The change mutex: every join commits under it.
    value: Mutex<M>,
    /// Gates publishing so notifications fire in commit order with the
    /// change mutex already released.
    publish: Mutex<()>,
    publisher: Arc<ChangePublisher>,
    next_ping_id: AtomicU64,
    ping_waiters: Mutex<HashMap<u64, PingWaiter>>,
}

impl<M, C> MetadataShared<M, C>
where
    M: Semilattice,
    C: MessageCodec + Send + Sync,
{
    fn on_utility_message(&self, peer: PeerId, payload: Vec<u8>) {
        match wire::decode_utility(&payload) {
            Ok(UtilityMessage::Metadata(bytes)) => match self.codec.decode::<M>(&bytes) {
                Ok(snapshot) => self.join_locally(snapshot),
                Err(error) => {
                    tracing::warn!(%peer, %error, "dropping undecodable metadata snapshot");
                }
            },
            Ok(UtilityMessage::Ping(id)) => {
                // Flush our value first; FIFO makes the snapshot land
                // before the response, which is what sync_from relies on.
                self.send_snapshot(peer);
                self.cluster.send_message(
                    peer,
                    MessageTag::UTILITY,
                    &wire::encode_utility_ping_response(id),
                );
            }
            Ok(UtilityMessage::PingResponse(id)) => {
                if let Some(waiter) = self.ping_waiters.lock().expect(POISONED).get(&id) {
                    waiter.signal.pulse();
                }
            }
            Err(error) => tracing::warn!(%peer, %error, "dropping malformed utility message"),
        }
    }

    fn send_snapshot(&self, peer: PeerId) {
        let snapshot = {
            let value = self.value.lock().expect(POISONED);
            self.codec.encode(&*value)
        };
        match snapshot {
            Ok(bytes) => self.cluster.send_message(
                peer,
                MessageTag::UTILITY,
                &wire::encode_utility_metadata(&bytes),
            ),
            Err(error) => tracing::warn!(%error, "failed to encode metadata snapshot"),
        }
    }

    /// Join a snapshot received from the wire. No re-broadcast: the sender
    /// already gossiped it, and `⊔` is idempotent.
    fn join_locally(&self, delta: M) {
        let mut value = self.value.lock().expect(POISONED);
        let before = value.clone();
        value.join(delta);
        if *value == before {
            return;
        }
        let publish = self.publish.lock().expect(POISONED);
        drop(value);
        self.publisher.notify();
        drop(publish);
    }

    /// Join a locally-introduced delta, gossiping the new value to every
    /// connected peer if it changed.
    fn join_and_broadcast(&self, delta: M) {
        let mut value = self.value.lock().expect(POISONED);
        let before = value.clone();
        value.join(delta);
        if *value == before {
            return;
        }
        let snapshot = self.codec.encode(&*value);
        let publish = self.publish.lock().expect(POISONED);
        drop(value);
        match snapshot {
            Ok(bytes) => {
                let payload = wire::encode_utility_metadata(&bytes);
                for peer in self.cluster.peers_list() {
                    if peer != self.cluster.me() {
                        self.cluster
                            .send_message(peer, MessageTag::UTILITY, &payload);
                    }
                }
            }
            Err(error) => tracing::warn!(%error, "failed to encode metadata for broadcast"),
        }
        self.publisher.notify();
        drop(publish);
    }

    /// Fail every in-flight sync aimed at a peer that just disconnected.
    fn fail_pending_syncs(&self, peer: PeerId) {
        let waiters = self.ping_waiters.lock().expect(POISONED);
        for waiter in waiters.values() {
            if waiter.peer == peer {
                waiter.failed.store(true, Ordering::SeqCst);
                waiter.signal.pulse();
            }
        }
    }

    async fn ping(&self, peer: PeerId, interrupt: &Signal) -> Result<(), SyncError> {
        let id = self.next_ping_id.fetch_add(1, Ordering::Relaxed);
        let signal = Arc::new(Signal::new());
        let failed = Arc::new(AtomicBool::new(false));
        self.ping_waiters.lock().expect(POISONED).insert(
            id,
            PingWaiter {
                peer,
                signal: signal.clone(),
                failed: failed.clone(),
            },
        );
        let _cleanup = WaiterCleanup {
            waiters: &self.ping_waiters,
            id,
        };
        // Interruption is cooperative: check before suspending at all.
        if interrupt.is_pulsed() {
            return Err(SyncError::Interrupted);
        }
        // The waiter is registered before this check, so a disconnect
        // between the check and the response cannot be missed.
        if !self.cluster.has_peer(peer) {
            return Err(SyncError::Failed);
        }
        self.cluster
            .send_message(peer, MessageTag::UTILITY, &wire::encode_utility_ping(id));
        tokio::select! {
            _ = signal.wait() => {
                if failed.load(Ordering::SeqCst) {
                    Err(SyncError::Failed)
                } else {
                    Ok(())
                }
            }
            _ = interrupt.wait() => Err(SyncError::Interrupted),
        }
    }
}

struct WaiterCleanup<'a> {
    waiters: &'a Mutex<HashMap<u64, PingWaiter>>,
    id: u64,
}

impl Drop for WaiterCleanup<'_> {
    fn drop(&mut self) {
        self.waiters.lock().expect(POISONED).remove(&self.id);
    }
}

/// Gossips a [`Semilattice`] metadata value across the mesh.
///
/// One per node, layered on a [`Cluster`]; it claims the reserved `UTILITY`
/// message tag for its lifetime. On every new peer connection it sends its
/// current value, and on every local change it re-broadcasts, so a single
/// gossip round suffices for convergence.
pub struct MetadataCluster<M: Semilattice, C: MessageCodec = JsonCodec> {
    shared: Arc<MetadataShared<M, C>>,
    _registration: HandlerRegistration,
    _subscription: PeersSubscription,
}

impl<M: Semilattice> MetadataCluster<M, JsonCodec> {
    /// Attach a metadata cluster to `cluster` with the JSON codec.
    pub fn new<N>(cluster: &Cluster<N>, initial: M) -> Self
    where
        N: NetworkProvider + Send + Sync + 'static,
    {
        Self::with_codec(cluster, JsonCodec, initial)
    }
}

impl<M, C> MetadataCluster<M, C>
where
    M: Semilattice,
    C: MessageCodec + Send + Sync,
{
    /// Attach a metadata cluster with an explicit snapshot codec.
    pub fn with_codec<N>(cluster: &Cluster<N>, codec: C, initial: M) -> Self
    where
        N: NetworkProvider + Send + Sync + 'static,
    {
        let cluster_shared = cluster.shared().clone();
        let shared = Arc::new(MetadataShared {
            cluster: cluster_shared.clone(),
            codec,
            value: Mutex::new(initial),
            publish: Mutex::new(()),
            publisher: Arc::new(ChangePublisher::default()),
            next_ping_id: AtomicU64::new(0),
            ping_waiters: Mutex::new(HashMap::new()),
        });

        let handler = {
            let shared = shared.clone();
            Arc::new(move |peer: PeerId, payload: Vec<u8>| {
                shared.on_utility_message(peer, payload);
            })
        };
        let registration =
            HandlerRegistration::reserved(cluster_shared.clone(), MessageTag::UTILITY, handler);

        // Subscribe and run the initial exchange under one freeze, so no
        // peer can connect unseen between the snapshot sends and the
        // subscription taking effect.
        let mut freeze = cluster.freeze_peers();
        let subscription = {
            let on_connect = {
                let shared = shared.clone();
                move |peer: PeerId| shared.send_snapshot(peer)
            };
            let on_disconnect = {
                let shared = shared.clone();
                move |peer: PeerId| shared.fail_pending_syncs(peer)
            };
            cluster.subscribe_peers(&mut freeze, on_connect, on_disconnect)
        };
        for peer in cluster_shared.peers_list() {
            if peer != cluster_shared.me() {
                shared.send_snapshot(peer);
            }
        }
        drop(freeze);

        Self {
            shared,
            _registration: registration,
            _subscription: subscription,
        }
    }

    /// A read/write handle on the gossiped value.
    pub fn root_view(&self) -> RootView<M, C> {
        RootView {
            shared: self.shared.clone(),
        }
    }
}

/// Read/write view of the cluster metadata.
///
/// Cheap to clone; all clones observe the same value.
pub struct RootView<M: Semilattice, C: MessageCodec = JsonCodec> {
    shared: Arc<MetadataShared<M, C>>,
}

impl<M: Semilattice, C: MessageCodec> Clone for RootView<M, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M, C> RootView<M, C>
where
    M: Semilattice,
    C: MessageCodec + Send + Sync,
{
    /// Snapshot copy of the current value.
    pub fn get(&self) -> M {
        self.shared.value.lock().expect(POISONED).clone()
    }

    /// Join `delta` into the local value. If the value changes, the new
    /// value is gossiped to every connected peer and the change publisher
    /// fires. Joins are serialized by the change mutex and notifications
    /// fire in commit order. Never fails.
    pub fn join(&self, delta: M) {
        self.shared.join_and_broadcast(delta);
    }

    /// Ensure `peer` has observed every join that committed locally before
    /// this call: flush the current value, then wait for an ack.
    ///
    /// # Errors
    ///
    /// [`SyncError::Interrupted`] if `interrupt` pulses first,
    /// [`SyncError::Failed`] if the peer is absent or disconnects before
    /// acknowledging.
    pub async fn sync_to(&self, peer: PeerId, interrupt: &Signal) -> Result<(), SyncError> {
        self.shared.send_snapshot(peer);
        self.shared.ping(peer, interrupt).await
    }

    /// Ensure the local value reflects everything `peer` knew when it
    /// received the ping: the peer flushes its value ahead of the ack.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`RootView::sync_to`].
    pub async fn sync_from(&self, peer: PeerId, interrupt: &Signal) -> Result<(), SyncError> {
        self.shared.ping(peer, interrupt).await
    }

    /// Subscribe to change notifications. The callback fires once per
    /// value-changing join, in commit order, with the change mutex
    /// released. It must not join synchronously from inside the callback.
    pub fn subscribe(&self, callback: impl Fn() + Send + 'static) -> MetadataSubscription {
        let publisher = self.shared.publisher.clone();
        let id = publisher.next_id.fetch_add(1, Ordering::Relaxed);
        publisher
            .subscribers
            .lock()
            .expect(POISONED)
            .insert(id, Box::new(callback));
        MetadataSubscription { publisher, id }
    }
}
