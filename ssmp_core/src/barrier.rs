//! # Ticket barrier table
//!
//! A fixed table of reusable two-phase barriers in shared memory. Each slot
//! is one cache line:
//!
//! ```text
//! participants: u64 mask │ mode │ ticket │ cleared │ pad
//! ```
//!
//! A cycle goes `IDLE (ticket 0, cleared 0)` → `FILLING` → `FULL (ticket P,
//! cleared 1)` → `DRAINING` → `IDLE`. Entering waits for `cleared == 0`, so a
//! fast participant cannot lap a slow one that is still draining the
//! previous cycle.
//!
//! Membership comes in three shared forms (all, mask, predicate). A predicate
//! cannot be stored in shared memory, so the endpoint that registers one keeps
//! it locally and also writes the mask of ids below 64 for everyone else.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::color::{Membership, SharedForm};
use crate::context::Endpoint;
use crate::platform::{full_fence, Backoff};
use crate::types::{EndpointId, NUM_BARRIERS};

/// Every endpoint of the run participates
pub const MODE_ALL: u32 = 0;
/// Endpoints whose bit is set in the mask participate
pub const MODE_MASK: u32 = 1;
/// Membership is a predicate; the mask holds its value for ids below 64
pub const MODE_PREDICATE: u32 = 2;

/// One barrier in the shared table.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct BarrierSlot {
    participants: AtomicU64,
    mode: AtomicU32,
    ticket: AtomicU32,
    cleared: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<BarrierSlot>() == 64);

/// Snapshot of a barrier's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierState {
    pub ticket: u32,
    pub cleared: bool,
}

impl BarrierState {
    pub const IDLE: BarrierState = BarrierState {
        ticket: 0,
        cleared: false,
    };
}

impl BarrierSlot {
    /// Back to "all participate" with idle counters. Only the region creator
    /// calls this, before anyone attaches.
    pub(crate) fn reset(&self) {
        self.participants.store(u64::MAX, Ordering::Relaxed);
        self.mode.store(MODE_ALL, Ordering::Relaxed);
        self.ticket.store(0, Ordering::Relaxed);
        self.cleared.store(0, Ordering::Relaxed);
    }

    /// Replace the membership. Counters are left alone: a slot is idle
    /// between cycles, and several endpoints may configure the same barrier.
    pub(crate) fn configure(&self, mode: u32, mask: u64) {
        self.participants.store(mask, Ordering::Relaxed);
        self.mode.store(mode, Ordering::Release);
    }

    pub fn mode(&self) -> u32 {
        self.mode.load(Ordering::Acquire)
    }

    pub fn mask(&self) -> u64 {
        self.participants.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> BarrierState {
        BarrierState {
            ticket: self.ticket.load(Ordering::Acquire),
            cleared: self.cleared.load(Ordering::Acquire) != 0,
        }
    }

    /// Membership test from the shared form alone.
    #[inline]
    pub fn admits(&self, id: EndpointId) -> bool {
        match self.mode() {
            MODE_ALL => true,
            _ => id.get() < 64 && self.mask() & (1u64 << id.get()) != 0,
        }
    }

    /// Run one cycle with `participants` arrivals expected.
    pub fn wait(&self, participants: u32) {
        self.arrive(participants);
        let mut backoff = Backoff::barrier();
        while self.cleared.load(Ordering::Acquire) == 0 {
            backoff.snooze();
        }
        self.depart();
    }

    /// Take a ticket once the previous cycle has drained. The last of
    /// `participants` arrivals marks the slot cleared.
    fn arrive(&self, participants: u32) {
        let mut backoff = Backoff::barrier();
        while self.cleared.load(Ordering::Acquire) != 0 {
            backoff.snooze();
        }
        let arrived = self.ticket.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived == participants {
            self.cleared.store(1, Ordering::Release);
        }
    }

    /// Hand the ticket back; the last one out reopens the slot.
    fn depart(&self) {
        if self.ticket.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.cleared.store(0, Ordering::Release);
        }
    }
}

impl Endpoint {
    /// Reconfigure which endpoints take part in barrier `barrier`.
    ///
    /// Masks and "all" are stored in the shared slot and seen by every
    /// endpoint. A predicate is kept by this endpoint; others see only its
    /// value for ids below 64, so over larger runs every participant should
    /// register the same predicate. Out-of-range ids are ignored.
    pub fn barrier_init<M: Membership + 'static>(&self, barrier: usize, members: M) {
        let slot = match self.region().barrier(barrier) {
            Some(slot) => slot,
            None => {
                log::trace!("barrier_init({}) out of range, ignored", barrier);
                return;
            }
        };

        let local: Option<Arc<dyn Membership>> = match members.shared_form() {
            SharedForm::All => {
                slot.configure(MODE_ALL, u64::MAX);
                None
            }
            SharedForm::Mask(mask) => {
                slot.configure(MODE_MASK, mask);
                None
            }
            SharedForm::Opaque => {
                let limit = self.num_endpoints().min(64);
                let mask = (0..limit)
                    .filter(|&i| members.contains(EndpointId::new(i)))
                    .fold(0u64, |m, i| m | (1u64 << i));
                slot.configure(MODE_PREDICATE, mask);
                Some(Arc::new(members))
            }
        };
        self.predicates.borrow_mut()[barrier] = local;
        log::debug!(
            "endpoint {} configured barrier {} (mode {})",
            self.id(),
            barrier,
            slot.mode()
        );
    }

    /// Whether `id` takes part in barrier `barrier` as this endpoint sees it.
    pub fn barrier_admits(&self, barrier: usize, id: EndpointId) -> bool {
        let slot = match self.region().barrier(barrier) {
            Some(slot) => slot,
            None => return false,
        };
        if id.get() >= self.num_endpoints() {
            return false;
        }
        match &self.predicates.borrow()[barrier] {
            Some(pred) => pred.contains(id),
            None => slot.admits(id),
        }
    }

    /// Live participant count of barrier `barrier`.
    pub fn barrier_participants(&self, barrier: usize) -> u32 {
        (0..self.num_endpoints())
            .filter(|&i| self.barrier_admits(barrier, EndpointId::new(i)))
            .count() as u32
    }

    /// Block until every current participant of `barrier` has arrived.
    ///
    /// Returns at once when this endpoint is not a participant or the id is
    /// out of range.
    pub fn barrier_wait(&self, barrier: usize) {
        let slot = match self.region().barrier(barrier) {
            Some(slot) => slot,
            None => {
                log::trace!("barrier_wait({}) out of range, ignored", barrier);
                return;
            }
        };
        full_fence();
        if !self.barrier_admits(barrier, self.id()) {
            return;
        }
        slot.wait(self.barrier_participants(barrier));
    }

    /// Counters of barrier `barrier`, `None` when out of range.
    pub fn barrier_state(&self, barrier: usize) -> Option<BarrierState> {
        self.region().barrier(barrier).map(BarrierSlot::state)
    }

    pub fn num_barriers(&self) -> usize {
        NUM_BARRIERS
    }
}
