//! # tidepool-cluster
//!
//! The cluster messaging core of tidepool: four layers, built bottom-up,
//! that every higher-level feature of the system sits on.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Metadata cluster (semilattice gossip, sync, views)  │
//! ├──────────────────────────────────────────────────────┤
//! │  Mailboxes (per-thread addressable endpoints)        │
//! ├──────────────────────────────────────────────────────┤
//! │  Message service (tag-multiplexed handlers)          │
//! ├──────────────────────────────────────────────────────┤
//! │  Connectivity (TCP mesh, handshake, peer events)     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Cluster`] forms a fully-connected mesh over TCP. Give one node the
//!   address of another with [`Cluster::join`] and peer-list gossip closes
//!   the mesh transitively. Peers are identified by a random [`PeerId`]
//!   minted at node start; a reconnecting process is a *new* peer.
//! - Messages are framed with a [`MessageTag`] and routed to registered
//!   handlers; see [`Cluster::register_handler`]. Delivery is best-effort:
//!   sends to unknown or disconnecting peers succeed silently without
//!   delivery, and frames on one connection are strictly FIFO.
//! - [`MailboxService`] routes messages to [`Mailbox`] endpoints owned by a
//!   specific worker scheduler; callbacks always run on their owning
//!   scheduler.
//! - [`MetadataCluster`] gossips a [`Semilattice`] value so that every
//!   node's copy converges to the join of everything ever introduced
//!   anywhere, and offers point-to-point [`RootView::sync_to`] /
//!   [`RootView::sync_from`] barriers.

#![deny(missing_docs)]

mod connectivity;
mod mailbox;
mod message;
mod metadata;
pub mod wire;

mod types;

pub use connectivity::{
    Cluster, ClusterConfig, DisconnectWatcher, PeersListFreeze, PeersSubscription,
};
pub use mailbox::{Completion, Mailbox, MailboxAddress, MailboxId, MailboxService};
pub use message::HandlerRegistration;
pub use metadata::{MetadataCluster, MetadataSubscription, RootView, Semilattice, SyncError};
pub use types::{MessageTag, PeerAddress, PeerId};

pub use tidepool_core::{
    current_scheduler, CodecError, JsonCodec, MessageCodec, NetworkProvider, SchedulerHandle,
    SchedulerPool, Signal, TcpListenerTrait, TokioNetworkProvider,
};
