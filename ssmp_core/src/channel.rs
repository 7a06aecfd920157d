//! # Point-to-point channel
//!
//! Send and receive over the mailbox grid. Within one ordered pair delivery
//! is FIFO because a second `send` waits for the first message to be drained.
//! Nothing here times out: a peer that never drains or never sends leaves
//! the caller spinning. [`Endpoint::send_is_free`], [`Endpoint::recv_is_ready`]
//! and [`Endpoint::try_recv_from`] are the building blocks for callers that
//! need their own bounded waits.

use crate::context::Endpoint;
use crate::mailbox::{Mailbox, Message};
use crate::platform::Backoff;
use crate::types::EndpointId;
use crate::utils::{self_send, unlikely};

impl Endpoint {
    #[inline(always)]
    fn outbox(&self, to: EndpointId) -> &Mailbox {
        self.check_peer(to);
        if unlikely(to == self.id()) {
            self_send(to);
        }
        self.region().mailbox(self.id(), to)
    }

    #[inline(always)]
    fn inbox_from(&self, from: EndpointId) -> &Mailbox {
        self.check_peer(from);
        if unlikely(from == self.id()) {
            self_send(from);
        }
        self.region().mailbox(from, self.id())
    }

    /// Wait until the slot to `to` is free, then publish `msg`.
    #[inline]
    pub fn send(&self, to: impl Into<EndpointId>, msg: &Message) {
        let to = to.into();
        self.outbox(to)
            .post(msg, self.id().get(), self.strategy_for(to), self.lock_wait());
    }

    /// Publish `msg` to `to` without checking the slot is free.
    ///
    /// An unread earlier message is overwritten; callers use this only when
    /// the protocol above guarantees the slot was drained.
    #[inline]
    pub fn send_no_sync(&self, to: impl Into<EndpointId>, msg: &Message) {
        let to = to.into();
        self.outbox(to).post_unsynced(msg, self.id().get());
    }

    /// Whether a `send` to `to` would go through without waiting.
    #[inline]
    pub fn send_is_free(&self, to: impl Into<EndpointId>) -> bool {
        self.outbox(to.into()).is_empty()
    }

    /// Whether `from` has a message waiting for this endpoint.
    #[inline]
    pub fn recv_is_ready(&self, from: impl Into<EndpointId>) -> bool {
        self.inbox_from(from.into()).has_message()
    }

    /// Wait for the next message from `from`.
    #[inline]
    pub fn recv_from(&self, from: impl Into<EndpointId>) -> Message {
        let from = from.into();
        let mut msg = self
            .inbox_from(from)
            .take(self.strategy_for(from), self.lock_wait());
        msg.sender = from.get();
        msg
    }

    /// Take the message from `from` if one is waiting.
    #[inline]
    pub fn try_recv_from(&self, from: impl Into<EndpointId>) -> Option<Message> {
        let from = from.into();
        let mut msg = self.inbox_from(from).try_take(self.strategy_for(from))?;
        msg.sender = from.get();
        Some(msg)
    }

    /// Wait for a message from any peer.
    ///
    /// Peers are polled round-robin starting after the one served last, so a
    /// chatty low id cannot starve the others. Costs O(N) per pass.
    pub fn recv(&self) -> Message {
        let n = self.num_endpoints();
        assert!(n > 1, "recv on a single-endpoint run would spin forever");
        let me = self.id().get();
        let inbox = self.region().inbox(self.id());
        let mut backoff = Backoff::mailbox();
        let mut from = self.recv_cursor.get();
        loop {
            for _ in 0..n {
                if from != me {
                    let peer = EndpointId::new(from);
                    if let Some(mut msg) = inbox[from as usize].try_take(self.strategy_for(peer)) {
                        msg.sender = from;
                        self.recv_cursor.set((from + 1) % n);
                        return msg;
                    }
                }
                from = (from + 1) % n;
            }
            backoff.snooze();
        }
    }

    /// Send `msg` to every other endpoint in id order.
    ///
    /// Each send blocks on its own slot; receivers see the message at
    /// different times.
    pub fn broadcast(&self, msg: &Message) {
        let me = self.id();
        for peer in (0..self.num_endpoints()).map(EndpointId::new) {
            if peer != me {
                self.send(peer, msg);
            }
        }
    }

    /// Like [`broadcast`](Self::broadcast) with `send_no_sync`.
    pub fn broadcast_no_sync(&self, msg: &Message) {
        let me = self.id();
        for peer in (0..self.num_endpoints()).map(EndpointId::new) {
            if peer != me {
                self.send_no_sync(peer, msg);
            }
        }
    }
}
