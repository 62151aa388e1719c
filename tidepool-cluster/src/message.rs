//! Tag-multiplexed message handlers.
//!
//! The message service multiplexes logical handlers over each peer-to-peer
//! byte stream. A handler registers under a [`MessageTag`]; incoming frames
//! carry the tag and are dispatched to the matching handler in arrival
//! order. Tags form a dense process-local id space: `0` and `1` are claimed
//! by the metadata and mailbox layers, user handlers get `2` upward, and a
//! dropped registration releases its tag for reuse.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connectivity::Shared;
use crate::types::{MessageTag, PeerId};

/// Callback invoked with the source peer and the frame payload.
pub(crate) type MessageHandler = Arc<dyn Fn(PeerId, Vec<u8>) + Send + Sync>;

/// Returned by dispatch when no handler is registered for a frame's tag.
/// On the wire this is a protocol violation: the connection closes.
pub(crate) struct UnknownTag;

pub(crate) struct HandlerTable {
    handlers: HashMap<u8, MessageHandler>,
    free: Vec<u8>,
    next: u16,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            free: Vec::new(),
            next: MessageTag::FIRST_USER as u16,
        }
    }

    /// Claim one of the reserved tags (below [`MessageTag::FIRST_USER`]).
    ///
    /// Panics if the tag is not reserved or is already claimed; both are
    /// programming errors in the layer above.
    pub(crate) fn claim_reserved(&mut self, tag: MessageTag, handler: MessageHandler) {
        assert!(
            tag.0 < MessageTag::FIRST_USER,
            "tag {tag} is not a reserved tag"
        );
        let previous = self.handlers.insert(tag.0, handler);
        assert!(previous.is_none(), "reserved tag {tag} claimed twice");
    }

    /// Allocate the next free user tag for `handler`.
    ///
    /// Panics if all 254 user tags are live; the id space is small by
    /// design and exhaustion means registrations are leaking.
    pub(crate) fn allocate(&mut self, handler: MessageHandler) -> MessageTag {
        let tag = match self.free.pop() {
            Some(tag) => tag,
            None => {
                assert!(self.next <= u8::MAX as u16, "message tag space exhausted");
                let tag = self.next as u8;
                self.next += 1;
                tag
            }
        };
        self.handlers.insert(tag, handler);
        MessageTag(tag)
    }

    /// Deregister `tag`, recycling it if it was a user tag.
    pub(crate) fn release(&mut self, tag: MessageTag) {
        if self.handlers.remove(&tag.0).is_some() && tag.0 >= MessageTag::FIRST_USER {
            self.free.push(tag.0);
        }
    }

    pub(crate) fn get(&self, tag: MessageTag) -> Option<MessageHandler> {
        self.handlers.get(&tag.0).cloned()
    }
}

/// A live handler registration.
///
/// Holding the registration keeps the handler routable; dropping it
/// deregisters immediately and releases the tag. [`send`] frames a payload
/// with the registration's own tag, so a matching registration on the
/// destination peer receives it.
///
/// [`send`]: HandlerRegistration::send
pub struct HandlerRegistration {
    shared: Arc<Shared>,
    tag: MessageTag,
}

impl HandlerRegistration {
    pub(crate) fn new(shared: Arc<Shared>, tag: MessageTag) -> Self {
        Self { shared, tag }
    }

    /// Register a handler under a reserved tag.
    pub(crate) fn reserved(shared: Arc<Shared>, tag: MessageTag, handler: MessageHandler) -> Self {
        shared.with_handlers(|table| table.claim_reserved(tag, handler));
        Self { shared, tag }
    }

    /// The tag this handler is registered under.
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    /// Send `payload` to the matching handler on `peer`. Best-effort: if the
    /// peer is unknown or its connection is being torn down, the call
    /// silently succeeds without delivery.
    pub fn send(&self, peer: PeerId, payload: &[u8]) {
        self.shared.send_message(peer, self.tag, payload);
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        let tag = self.tag;
        self.shared.with_handlers(|table| table.release(tag));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> MessageHandler {
        Arc::new(|_peer, _payload| {})
    }

    #[test]
    fn user_tags_are_dense_from_first_user() {
        let mut table = HandlerTable::new();
        assert_eq!(table.allocate(noop()), MessageTag(2));
        assert_eq!(table.allocate(noop()), MessageTag(3));
        assert_eq!(table.allocate(noop()), MessageTag(4));
    }

    #[test]
    fn released_tags_are_reused() {
        let mut table = HandlerTable::new();
        let a = table.allocate(noop());
        let b = table.allocate(noop());
        table.release(a);
        assert_eq!(table.allocate(noop()), a);
        assert!(table.get(b).is_some());
    }

    #[test]
    fn release_removes_the_handler() {
        let mut table = HandlerTable::new();
        let tag = table.allocate(noop());
        assert!(table.get(tag).is_some());
        table.release(tag);
        assert!(table.get(tag).is_none());
    }

    #[test]
    fn reserved_tags_do_not_collide_with_user_tags() {
        let mut table = HandlerTable::new();
        table.claim_reserved(MessageTag::UTILITY, noop());
        table.claim_reserved(MessageTag::MAILBOX, noop());
        let user = table.allocate(noop());
        assert!(user.0 >= MessageTag::FIRST_USER);
        assert!(table.get(MessageTag::UTILITY).is_some());
        assert!(table.get(MessageTag::MAILBOX).is_some());
    }

    #[test]
    #[should_panic(expected = "claimed twice")]
    fn double_reserved_claim_panics() {
        let mut table = HandlerTable::new();
        table.claim_reserved(MessageTag::UTILITY, noop());
        table.claim_reserved(MessageTag::UTILITY, noop());
    }
}
