//! # Color registry
//!
//! A "color" is a membership test over endpoint ids. The same test selects
//! which peers a [`ColorBuffer`] polls and which endpoints take part in a
//! barrier.
//!
//! ```rust,ignore
//! let mut workers = endpoint.color_buf_init(&Predicate(|id: EndpointId| id.get() % 2 == 1));
//! let msg = workers.recv_color_start();
//! ```

use crate::context::Endpoint;
use crate::mailbox::{Mailbox, Message, SyncStrategy};
use crate::platform::{Backoff, CACHE_LINE_SIZE};
use crate::types::EndpointId;

/// How a membership can be stored in shared memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedForm {
    /// Every endpoint
    All,
    /// Bit `i` set means endpoint `i` is a member (ids below 64 only)
    Mask(u64),
    /// Only the local process can evaluate it
    Opaque,
}

/// Membership test over endpoint ids.
pub trait Membership: Send + Sync {
    fn contains(&self, id: EndpointId) -> bool;

    fn shared_form(&self) -> SharedForm {
        SharedForm::Opaque
    }
}

impl<M: Membership + ?Sized> Membership for &M {
    fn contains(&self, id: EndpointId) -> bool {
        (**self).contains(id)
    }

    fn shared_form(&self) -> SharedForm {
        (**self).shared_form()
    }
}

impl<M: Membership + ?Sized> Membership for Box<M> {
    fn contains(&self, id: EndpointId) -> bool {
        (**self).contains(id)
    }

    fn shared_form(&self) -> SharedForm {
        (**self).shared_form()
    }
}

/// Every endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllEndpoints;

impl Membership for AllEndpoints {
    fn contains(&self, _id: EndpointId) -> bool {
        true
    }

    fn shared_form(&self) -> SharedForm {
        SharedForm::All
    }
}

/// Static bitmask over the first 64 ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantMask(pub u64);

impl ParticipantMask {
    pub fn from_ids<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        Self(
            ids.into_iter()
                .filter(|&i| i < 64)
                .fold(0, |m, i| m | (1u64 << i)),
        )
    }
}

impl Membership for ParticipantMask {
    fn contains(&self, id: EndpointId) -> bool {
        id.get() < 64 && self.0 & (1u64 << id.get()) != 0
    }

    fn shared_form(&self) -> SharedForm {
        SharedForm::Mask(self.0)
    }
}

/// Explicit list of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerList(Vec<EndpointId>);

impl PeerList {
    pub fn new<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let mut ids: Vec<EndpointId> = ids.into_iter().map(EndpointId::new).collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn ids(&self) -> &[EndpointId] {
        &self.0
    }
}

impl Membership for PeerList {
    fn contains(&self, id: EndpointId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    fn shared_form(&self) -> SharedForm {
        match self.0.last() {
            Some(max) if max.get() >= 64 => SharedForm::Opaque,
            _ => SharedForm::Mask(ParticipantMask::from_ids(self.0.iter().map(|i| i.get())).0),
        }
    }
}

/// Arbitrary closure over ids.
#[derive(Clone, Copy)]
pub struct Predicate<F>(pub F);

impl<F> Membership for Predicate<F>
where
    F: Fn(EndpointId) -> bool + Send + Sync,
{
    fn contains(&self, id: EndpointId) -> bool {
        (self.0)(id)
    }
}

impl<F> std::fmt::Debug for Predicate<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Peers whose mailboxes an endpoint polls, in ascending id order.
///
/// Built once from a [`Membership`]; borrows the endpoint it was built from
/// and releases its tables when dropped.
pub struct ColorBuffer<'a> {
    peers: Vec<EndpointId>,
    slots: Vec<&'a Mailbox>,
    strategies: Vec<SyncStrategy>,
    cursor: usize,
}

/// Round `n` up so a table of `T` fills whole cache lines.
fn padded_capacity<T>(n: usize) -> usize {
    let per_line = (CACHE_LINE_SIZE / std::mem::size_of::<T>().max(1)).max(1);
    n.div_ceil(per_line).max(1) * per_line
}

impl<'a> ColorBuffer<'a> {
    pub fn new<M: Membership + ?Sized>(endpoint: &'a Endpoint, members: &M) -> Self {
        let me = endpoint.id();
        let matching: Vec<EndpointId> = (0..endpoint.num_endpoints())
            .map(EndpointId::new)
            .filter(|&peer| peer != me && members.contains(peer))
            .collect();

        let mut peers = Vec::with_capacity(padded_capacity::<EndpointId>(matching.len()));
        let mut slots = Vec::with_capacity(padded_capacity::<&Mailbox>(matching.len()));
        let mut strategies = Vec::with_capacity(padded_capacity::<SyncStrategy>(matching.len()));
        for peer in matching {
            peers.push(peer);
            slots.push(endpoint.region().mailbox(peer, me));
            strategies.push(endpoint.strategy_for(peer));
        }

        log::debug!("endpoint {} color buffer over {} peer(s)", me, peers.len());
        Self {
            peers,
            slots,
            strategies,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peers(&self) -> &[EndpointId] {
        &self.peers
    }

    /// Index the next `recv_color_start` scan begins at.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline(always)]
    fn poll(&mut self, i: usize) -> Option<Message> {
        let mut msg = self.slots[i].try_take(self.strategies[i])?;
        msg.sender = self.peers[i].get();
        self.cursor = if i + 1 == self.peers.len() { 0 } else { i + 1 };
        Some(msg)
    }

    fn assert_not_empty(&self) {
        assert!(
            !self.peers.is_empty(),
            "receiving on a color buffer with no peers would spin forever"
        );
    }

    /// Block until some peer has a message, scanning from the first peer.
    pub fn recv_color(&mut self) -> Message {
        self.assert_not_empty();
        let mut backoff = Backoff::mailbox();
        loop {
            for i in 0..self.peers.len() {
                if let Some(msg) = self.poll(i) {
                    return msg;
                }
            }
            backoff.snooze();
        }
    }

    /// Block until some peer has a message, resuming after the last peer served.
    ///
    /// Under continuous traffic every peer is served at least once in any
    /// `len()` consecutive calls.
    pub fn recv_color_start(&mut self) -> Message {
        self.assert_not_empty();
        let mut backoff = Backoff::mailbox();
        loop {
            if let Some(msg) = self.try_recv_color_start() {
                return msg;
            }
            backoff.snooze();
        }
    }

    /// One pass over all peers from the cursor.
    pub fn try_recv_color_start(&mut self) -> Option<Message> {
        let n = self.peers.len();
        let start = self.cursor;
        for k in 0..n {
            let i = (start + k) % n;
            if let Some(msg) = self.poll(i) {
                return Some(msg);
            }
        }
        None
    }

    /// Release the tables. Dropping the buffer does the same.
    pub fn free(self) {}
}

impl std::fmt::Debug for ColorBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorBuffer")
            .field("peers", &self.peers)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Endpoint {
    /// Build the filtered peer view for `members`.
    pub fn color_buf_init<M: Membership + ?Sized>(&self, members: &M) -> ColorBuffer<'_> {
        ColorBuffer::new(self, members)
    }
}
