//! Mailboxes: addressable, per-thread message endpoints.
//!
//! A [`Mailbox`] is owned by one worker scheduler, fixed at creation. Its
//! callback always runs on that scheduler: the mailbox handler hops to the
//! destination thread before looking the mailbox up, so callbacks never see
//! concurrency with each other or with the rest of the thread's tasks.
//!
//! Delivery is best-effort end to end. A message addressed to a mailbox
//! that has been destroyed (or never existed) is dropped silently; only a
//! send to the *nil* address is a programming error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use tidepool_core::NetworkProvider;

use crate::connectivity::{Cluster, Shared};
use crate::message::HandlerRegistration;
use crate::types::{MessageTag, PeerId};
use crate::wire;

const POISONED: &str = "mailbox lock poisoned";

/// Per-thread monotonically increasing mailbox id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxId(
    /// The raw counter value.
    pub u32,
);

impl std::fmt::Display for MailboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The triple that names a mailbox anywhere in the mesh.
///
/// Serializable, so it can be carried inside other messages — which is how
/// request/response protocols bootstrap themselves. The nil address has a
/// nil peer; sending to it panics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxAddress {
    /// The peer the mailbox lives on.
    pub peer: PeerId,
    /// The worker scheduler that owns the mailbox on that peer.
    pub thread: u16,
    /// The mailbox id within that thread.
    pub mailbox: MailboxId,
}

impl MailboxAddress {
    /// The nil address.
    pub fn nil() -> Self {
        Self {
            peer: PeerId::NIL,
            thread: 0,
            mailbox: MailboxId(0),
        }
    }

    /// Whether this is the nil address.
    pub fn is_nil(&self) -> bool {
        self.peer.is_nil()
    }

    /// The peer the mailbox lives on. Panics on a nil address.
    pub fn peer(&self) -> PeerId {
        assert!(!self.is_nil(), "peer() on nil mailbox address");
        self.peer
    }
}

impl std::fmt::Display for MailboxAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.peer, self.thread, self.mailbox.0)
    }
}

/// Ack continuation handed to mailbox callbacks.
///
/// A callback may invoke [`complete`](Completion::complete) to signal that
/// it is done with the message; request/response layers built on mailboxes
/// use this for correlation. For fire-and-forget messages the token is
/// simply dropped, which is silent and harmless.
pub struct Completion(());

impl Completion {
    /// Signal completion. Consumes the token.
    pub fn complete(self) {}
}

type MailboxCallback = Box<dyn FnMut(Vec<u8>, Completion) + Send>;

struct MailboxTable {
    next_id: u32,
    mailboxes: HashMap<u32, MailboxCallback>,
}

impl MailboxTable {
    fn new() -> Self {
        Self {
            next_id: 0,
            mailboxes: HashMap::new(),
        }
    }
}

struct MailboxShared {
    cluster: Arc<Shared>,
    tables: Vec<Mutex<MailboxTable>>,
}

impl MailboxShared {
    /// Runs on the destination thread. The table lock is held across the
    /// callback: a `Mailbox` being dropped from another thread blocks until
    /// an in-flight callback returns, so no callback fires after its
    /// mailbox's destruction completes.
    fn deliver(&self, thread: u16, mailbox: u32, payload: Vec<u8>) {
        let mut table = self.tables[thread as usize].lock().expect(POISONED);
        match table.mailboxes.get_mut(&mailbox) {
            Some(callback) => callback(payload, Completion(())),
            None => tracing::trace!(thread, mailbox, "dropping message for absent mailbox"),
        }
    }
}

/// Message routing for mailboxes, layered on a [`Cluster`].
///
/// One service per node; it claims the reserved `MAILBOX` message tag for
/// the node's lifetime (dropping the service releases it).
pub struct MailboxService {
    shared: Arc<MailboxShared>,
    _registration: HandlerRegistration,
}

impl MailboxService {
    /// Attach mailbox routing to `cluster`.
    pub fn new<N>(cluster: &Cluster<N>) -> Self
    where
        N: NetworkProvider + Send + Sync + 'static,
    {
        let cluster_shared = cluster.shared().clone();
        let tables = (0..cluster_shared.schedulers().len())
            .map(|_| Mutex::new(MailboxTable::new()))
            .collect();
        let shared = Arc::new(MailboxShared {
            cluster: cluster_shared.clone(),
            tables,
        });
        let handler = {
            let shared = shared.clone();
            Arc::new(move |peer: PeerId, mut payload: Vec<u8>| {
                let (thread, mailbox) = match wire::decode_mailbox_header(&payload) {
                    Ok(header) => header,
                    Err(error) => {
                        tracing::warn!(%peer, %error, "dropping malformed mailbox frame");
                        return;
                    }
                };
                let user = payload.split_off(wire::MAILBOX_HEADER_SIZE);
                let Some(scheduler) = shared.cluster.schedulers().get(thread as usize).cloned()
                else {
                    tracing::debug!(thread, "dropping mailbox message for unknown thread");
                    return;
                };
                let shared = shared.clone();
                // Hop to the owning scheduler; jobs from one connection to
                // one thread stay in order, preserving FIFO delivery.
                scheduler.spawn(move || shared.deliver(thread, mailbox, user));
            })
        };
        let registration =
            HandlerRegistration::reserved(cluster_shared, MessageTag::MAILBOX, handler);
        Self {
            shared,
            _registration: registration,
        }
    }

    /// Create a mailbox owned by worker scheduler `thread`.
    ///
    /// The callback runs on that scheduler for every message delivered to
    /// the mailbox's address, in per-sender order.
    ///
    /// # Panics
    ///
    /// Panics if `thread` is not a valid scheduler index for this node.
    pub fn open_mailbox(
        &self,
        thread: usize,
        callback: impl FnMut(Vec<u8>, Completion) + Send + 'static,
    ) -> Mailbox {
        let table = self
            .shared
            .tables
            .get(thread)
            .unwrap_or_else(|| panic!("mailbox thread index {thread} out of range"));
        let mut table = table.lock().expect(POISONED);
        let id = table.next_id;
        table.next_id = table
            .next_id
            .checked_add(1)
            .expect("mailbox id space exhausted");
        table.mailboxes.insert(id, Box::new(callback));
        Mailbox {
            shared: self.shared.clone(),
            thread: thread as u16,
            id: MailboxId(id),
        }
    }

    /// Send `payload` to the mailbox at `address`.
    ///
    /// Best-effort and non-blocking, safe from any thread: if the peer is
    /// unreachable or the mailbox no longer exists the message is silently
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics on the nil address.
    pub fn send(&self, address: &MailboxAddress, payload: &[u8]) {
        assert!(!address.is_nil(), "send to nil mailbox address");
        let framed = wire::encode_mailbox_payload(address.thread, address.mailbox.0, payload);
        self.shared
            .cluster
            .send_message(address.peer, MessageTag::MAILBOX, &framed);
    }
}

/// A live mailbox. Dropping it removes the routing entry; any message
/// arriving afterwards is dropped silently.
pub struct Mailbox {
    shared: Arc<MailboxShared>,
    thread: u16,
    id: MailboxId,
}

impl Mailbox {
    /// The address remote peers can send to.
    pub fn address(&self) -> MailboxAddress {
        MailboxAddress {
            peer: self.shared.cluster.me(),
            thread: self.thread,
            mailbox: self.id,
        }
    }

    /// The scheduler index that owns this mailbox.
    pub fn thread(&self) -> usize {
        self.thread as usize
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.shared.tables[self.thread as usize]
            .lock()
            .expect(POISONED)
            .mailboxes
            .remove(&self.id.0);
    }
}
