//! # Mailbox slot
//!
//! One cache line per ordered (sender, receiver) pair. The sender is the only
//! writer of the payload and the only one to move the flag out of `EMPTY`;
//! the receiver is the only reader and the only one to move it back.
//!
//! ```text
//! ┌──────────────────────────────────────────────┬────────┬───────┐
//! │ words[0..14]  (56 bytes, AtomicI32)           │ sender │ state │
//! └──────────────────────────────────────────────┴────────┴───────┘
//!                                             64 bytes, 64-aligned
//! ```
//!
//! Two ways to move the flag:
//!
//! - [`SyncStrategy::Plain`]: spin on an acquire load, copy, release store.
//! - [`SyncStrategy::Locked`]: CAS into `LOCKED` first, copy, then store the
//!   final value. Used across NUMA nodes.
//!
//! Payload words are atomics accessed with `Relaxed`; the release store of
//! the flag publishes them and the acquire load (or CAS) consumes them.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::platform::{wait_cycles, Backoff};
use crate::types::{EndpointId, MSG_WORDS};

/// Slot holds no message; the sender may write.
pub const EMPTY: u32 = 0;
/// Slot holds an unread message; the receiver may read.
pub const HAS_MESSAGE: u32 = 1;
/// Transient state while one side copies on the locked path.
pub const LOCKED: u32 = 2;

/// Flag discipline used between two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Same coherence domain: spin-read the flag
    Plain,
    /// Cross domain: CAS through `LOCKED`
    Locked,
}

/// Fixed-size message as seen by callers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Message {
    pub words: [i32; MSG_WORDS],
    /// Filled in on receive
    pub sender: u32,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message whose leading words are `words` (extra input is ignored).
    pub fn from_words(words: &[i32]) -> Self {
        let mut msg = Self::default();
        let n = words.len().min(MSG_WORDS);
        msg.words[..n].copy_from_slice(&words[..n]);
        msg
    }

    /// Message carrying a single value in `w0`.
    pub fn with_w0(w0: i32) -> Self {
        let mut msg = Self::default();
        msg.words[0] = w0;
        msg
    }

    #[inline]
    pub fn w0(&self) -> i32 {
        self.words[0]
    }

    #[inline]
    pub fn word(&self, i: usize) -> i32 {
        self.words[i]
    }

    #[inline]
    pub fn set_word(&mut self, i: usize, value: i32) {
        self.words[i] = value;
    }

    pub fn sender(&self) -> EndpointId {
        EndpointId::new(self.sender)
    }

    /// Raw bytes as they sit in the mailbox, sender included.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// One single-producer/single-consumer slot in shared memory.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct Mailbox {
    words: [AtomicI32; MSG_WORDS],
    sender: AtomicU32,
    state: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<Mailbox>() == 64);
const _: () = assert!(std::mem::align_of::<Mailbox>() == 64);
const _: () = assert!(std::mem::size_of::<Message>() == 60);

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current flag value.
    #[inline(always)]
    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.state() == EMPTY
    }

    #[inline(always)]
    pub fn has_message(&self) -> bool {
        self.state() == HAS_MESSAGE
    }

    /// Drop whatever the slot holds. Only valid while no peer can post to it.
    pub(crate) fn reset(&self) {
        self.state.store(EMPTY, Ordering::Release);
    }

    #[inline(always)]
    fn write_payload(&self, msg: &Message, sender: u32) {
        for (slot, &w) in self.words.iter().zip(msg.words.iter()) {
            slot.store(w, Ordering::Relaxed);
        }
        self.sender.store(sender, Ordering::Relaxed);
    }

    #[inline(always)]
    fn read_payload(&self) -> Message {
        let mut msg = Message::default();
        for (w, slot) in msg.words.iter_mut().zip(self.words.iter()) {
            *w = slot.load(Ordering::Relaxed);
        }
        msg.sender = self.sender.load(Ordering::Relaxed);
        msg
    }

    /// Block until the slot is free, then publish `msg`.
    #[inline]
    pub fn post(&self, msg: &Message, sender: u32, strategy: SyncStrategy, lock_wait: u64) {
        match strategy {
            SyncStrategy::Plain => {
                let mut backoff = Backoff::mailbox();
                while self.state.load(Ordering::Acquire) != EMPTY {
                    backoff.snooze();
                }
            }
            SyncStrategy::Locked => {
                while self
                    .state
                    .compare_exchange_weak(EMPTY, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
                {
                    wait_cycles(lock_wait);
                }
            }
        }
        self.write_payload(msg, sender);
        self.state.store(HAS_MESSAGE, Ordering::Release);
    }

    /// Publish `msg` without waiting for the slot to drain.
    ///
    /// Overwrites an unread message. Callers use it only when they know the
    /// slot is free.
    #[inline]
    pub fn post_unsynced(&self, msg: &Message, sender: u32) {
        self.write_payload(msg, sender);
        self.state.store(HAS_MESSAGE, Ordering::Release);
    }

    /// Block until a message arrives, copy it out and free the slot.
    #[inline]
    pub fn take(&self, strategy: SyncStrategy, lock_wait: u64) -> Message {
        match strategy {
            SyncStrategy::Plain => {
                let mut backoff = Backoff::mailbox();
                while self.state.load(Ordering::Acquire) != HAS_MESSAGE {
                    backoff.snooze();
                }
            }
            SyncStrategy::Locked => {
                while self
                    .state
                    .compare_exchange_weak(HAS_MESSAGE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
                {
                    wait_cycles(lock_wait);
                }
            }
        }
        let msg = self.read_payload();
        self.state.store(EMPTY, Ordering::Release);
        msg
    }

    /// One poll: take the message if there is one.
    #[inline]
    pub fn try_take(&self, strategy: SyncStrategy) -> Option<Message> {
        match strategy {
            SyncStrategy::Plain => {
                if self.state.load(Ordering::Acquire) != HAS_MESSAGE {
                    return None;
                }
            }
            SyncStrategy::Locked => {
                if self
                    .state
                    .compare_exchange(HAS_MESSAGE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
                {
                    return None;
                }
            }
        }
        let msg = self.read_payload();
        self.state.store(EMPTY, Ordering::Release);
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn message_helpers() {
        let msg = Message::from_words(&[7, 8, 9]);
        assert_eq!(msg.w0(), 7);
        assert_eq!(msg.word(2), 9);
        assert_eq!(msg.word(3), 0);
        assert_eq!(msg.as_bytes().len(), 60);

        let long: Vec<i32> = (0..40).collect();
        assert_eq!(Message::from_words(&long).word(MSG_WORDS - 1), 13);
    }

    #[test]
    fn post_then_take_round_trip() {
        for strategy in [SyncStrategy::Plain, SyncStrategy::Locked] {
            let slot = Mailbox::new();
            let mut msg = Message::with_w0(42);
            msg.set_word(13, -1);
            slot.post(&msg, 3, strategy, 0);
            assert!(slot.has_message());

            let got = slot.take(strategy, 0);
            assert_eq!(got.words, msg.words);
            assert_eq!(got.sender, 3);
            assert!(slot.is_empty());
        }
    }

    #[test]
    fn try_take_on_empty_slot() {
        let slot = Mailbox::new();
        assert!(slot.try_take(SyncStrategy::Plain).is_none());
        assert!(slot.try_take(SyncStrategy::Locked).is_none());
        assert_eq!(slot.state(), EMPTY);
    }

    #[test]
    fn unsynced_post_overwrites() {
        let slot = Mailbox::new();
        slot.post_unsynced(&Message::with_w0(1), 0);
        slot.post_unsynced(&Message::with_w0(2), 0);
        assert_eq!(slot.take(SyncStrategy::Plain, 0).w0(), 2);
    }

    #[test]
    fn ping_pong_between_threads() {
        for strategy in [SyncStrategy::Plain, SyncStrategy::Locked] {
            let to_b = Arc::new(Mailbox::new());
            let to_a = Arc::new(Mailbox::new());
            let (tb, ta) = (to_b.clone(), to_a.clone());

            let echo = thread::spawn(move || {
                for _ in 0..2000 {
                    let m = tb.take(strategy, 8);
                    ta.post(&Message::with_w0(m.w0() + 1), 1, strategy, 8);
                }
            });

            for i in 0..2000 {
                to_b.post(&Message::with_w0(i), 0, strategy, 8);
                let reply = to_a.take(strategy, 8);
                assert_eq!(reply.w0(), i + 1);
                assert_eq!(reply.sender, 1);
            }
            echo.join().unwrap();
        }
    }
}
