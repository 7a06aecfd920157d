//! # Chunked bulk transfer
//!
//! Each endpoint owns one [`CHUNK_SIZE`]-byte slot that peers write into.
//! A payload of `L` bytes moves as `L / CHUNK_SIZE` full chunks plus one
//! short tail chunk when `L` is not a multiple. The total length travels out
//! of band (usually in a mailbox message sent first).
//!
//! Slot states: `EMPTY → WRITING` (sender CAS) `→ FULL` (release) `→ EMPTY`
//! (receiver, release). The CAS keeps two senders from interleaving bytes in
//! one chunk; the sender id in the header lets the receiver spot a chunk
//! that is not from the peer it expects.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::context::Endpoint;
use crate::error::{SsmpError, SsmpResult};
use crate::platform::Backoff;
use crate::ssmp_internal;
use crate::types::{EndpointId, CHUNK_SIZE};
use crate::utils::{self_send, unlikely};

pub const CHUNK_EMPTY: u32 = 0;
pub const CHUNK_WRITING: u32 = 1;
pub const CHUNK_FULL: u32 = 2;

#[repr(C, align(64))]
#[derive(Debug, Default)]
struct ChunkHeader {
    state: AtomicU32,
    sender: AtomicU32,
    len: AtomicU32,
}

/// One receiver's chunk buffer in shared memory.
#[repr(C, align(64))]
pub struct ChunkSlot {
    header: ChunkHeader,
    data: UnsafeCell<[u8; CHUNK_SIZE]>,
}

const _: () = assert!(std::mem::size_of::<ChunkSlot>() == 64 + CHUNK_SIZE);

// SAFETY: `data` is written only by the sender that won the EMPTY→WRITING CAS
// and read only after an acquire load of FULL, so accesses never overlap
unsafe impl Sync for ChunkSlot {}
unsafe impl Send for ChunkSlot {}

impl Default for ChunkSlot {
    fn default() -> Self {
        Self {
            header: ChunkHeader::default(),
            data: UnsafeCell::new([0; CHUNK_SIZE]),
        }
    }
}

impl std::fmt::Debug for ChunkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSlot")
            .field("state", &self.state())
            .field("sender", &self.header.sender.load(Ordering::Relaxed))
            .field("len", &self.header.len.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChunkSlot {
    pub fn state(&self) -> u32 {
        self.header.state.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.state() == CHUNK_FULL
    }

    pub(crate) fn reset(&self) {
        self.header.state.store(CHUNK_EMPTY, Ordering::Release);
    }

    /// Block until the slot is empty, then store one chunk from `sender`.
    pub fn write_chunk(&self, sender: u32, bytes: &[u8]) {
        debug_assert!(bytes.len() <= CHUNK_SIZE);
        let len = bytes.len().min(CHUNK_SIZE);

        let mut backoff = Backoff::mailbox();
        while self
            .header
            .state
            .compare_exchange_weak(
                CHUNK_EMPTY,
                CHUNK_WRITING,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            backoff.snooze();
        }

        // SAFETY: the CAS above gives this sender exclusive access until FULL is published
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data.get().cast::<u8>(), len);
        }
        self.header.sender.store(sender, Ordering::Relaxed);
        self.header.len.store(len as u32, Ordering::Relaxed);
        self.header.state.store(CHUNK_FULL, Ordering::Release);
    }

    /// Block until a chunk is present, check it came from `expected` with
    /// `out.len()` bytes, copy it out and free the slot.
    ///
    /// On a mismatch the chunk stays in the slot untouched.
    pub fn read_chunk(&self, expected: u32, out: &mut [u8]) -> SsmpResult<()> {
        let mut backoff = Backoff::mailbox();
        while self.header.state.load(Ordering::Acquire) != CHUNK_FULL {
            backoff.snooze();
        }

        let sender = self.header.sender.load(Ordering::Relaxed);
        let len = self.header.len.load(Ordering::Relaxed) as usize;
        if unlikely(len > CHUNK_SIZE) {
            // writers clamp to the slot, so this is a corrupted region
            return Err(ssmp_internal!(
                "chunk header claims {} bytes, slot holds {}",
                len,
                CHUNK_SIZE
            ));
        }
        if unlikely(sender != expected) {
            log::warn!(
                "chunk from endpoint {} while expecting endpoint {}",
                sender,
                expected
            );
            return Err(SsmpError::protocol(format!(
                "chunk written by endpoint {}, expected endpoint {}",
                sender, expected
            )));
        }
        if unlikely(len != out.len()) {
            log::warn!("chunk of {} bytes while expecting {}", len, out.len());
            return Err(SsmpError::protocol(format!(
                "chunk of {} bytes from endpoint {}, expected {}",
                len,
                sender,
                out.len()
            )));
        }

        // SAFETY: FULL was observed with acquire, so the writer is done; len <= CHUNK_SIZE
        unsafe {
            std::ptr::copy_nonoverlapping(self.data.get().cast::<u8>(), out.as_mut_ptr(), len);
        }
        self.header.state.store(CHUNK_EMPTY, Ordering::Release);
        Ok(())
    }
}

/// Number of chunks a payload of `len` bytes travels in.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

impl Endpoint {
    /// Stream `data` into `to`'s chunk buffer.
    ///
    /// The receiver must call `recv_from_big` with the same length; at most
    /// one bulk transfer may target a receiver at a time.
    pub fn send_big(&self, to: impl Into<EndpointId>, data: &[u8]) {
        let to = to.into();
        self.check_peer(to);
        if unlikely(to == self.id()) {
            self_send(to);
        }
        let slot = self.region().chunk(to);
        let me = self.id().get();
        for chunk in data.chunks(CHUNK_SIZE) {
            slot.write_chunk(me, chunk);
        }
    }

    /// Fill `out` with a bulk transfer from `from`.
    ///
    /// Fails with a protocol error when a chunk from another sender, or of
    /// another length, shows up in this endpoint's buffer.
    pub fn recv_from_big(&self, from: impl Into<EndpointId>, out: &mut [u8]) -> SsmpResult<()> {
        let from = from.into();
        self.check_peer(from);
        if unlikely(from == self.id()) {
            self_send(from);
        }
        let slot = self.region().chunk(self.id());
        for chunk in out.chunks_mut(CHUNK_SIZE) {
            slot.read_chunk(from.get(), chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE + 1), 2);
        assert_eq!(chunk_count(10 * CHUNK_SIZE + 37), 11);
    }

    #[test]
    fn write_then_read() {
        let slot = ChunkSlot::default();
        slot.write_chunk(4, b"hello");
        assert!(slot.is_full());

        let mut out = [0u8; 5];
        slot.read_chunk(4, &mut out).unwrap();
        assert_eq!(&out, b"hello");
        assert_eq!(slot.state(), CHUNK_EMPTY);
    }

    #[test]
    fn wrong_sender_leaves_chunk_in_place() {
        let slot = ChunkSlot::default();
        slot.write_chunk(1, &[9; 16]);

        let mut out = [0u8; 16];
        let err = slot.read_chunk(2, &mut out).unwrap_err();
        assert!(matches!(err, SsmpError::Protocol(_)));
        assert!(!err.is_fatal());
        assert!(slot.is_full());
        assert_eq!(out, [0; 16]);

        slot.read_chunk(1, &mut out).unwrap();
        assert_eq!(out, [9; 16]);
    }

    #[test]
    fn wrong_length_is_protocol_error() {
        let slot = ChunkSlot::default();
        slot.write_chunk(1, &[1; 10]);
        let mut out = [0u8; 11];
        assert!(matches!(
            slot.read_chunk(1, &mut out),
            Err(SsmpError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_header_length_is_internal_error() {
        let slot = ChunkSlot::default();
        slot.write_chunk(1, &[3; 4]);
        slot.header
            .len
            .store((CHUNK_SIZE + 1) as u32, Ordering::Relaxed);

        let mut out = [0u8; 4];
        let err = slot.read_chunk(1, &mut out).unwrap_err();
        assert!(matches!(err, SsmpError::Internal { .. }));
        assert!(err.is_fatal());
        assert!(slot.is_full());
    }

    #[test]
    fn reset_discards_a_pending_chunk() {
        let slot = ChunkSlot::default();
        slot.write_chunk(2, &[5; 32]);
        slot.reset();
        assert_eq!(slot.state(), CHUNK_EMPTY);
        // the slot is writable again without a reader
        slot.write_chunk(2, &[6; 32]);
        assert!(slot.is_full());
    }

    #[test]
    fn streams_many_chunks_between_threads() {
        let slot = Arc::new(ChunkSlot::default());
        let payload: Vec<u8> = (0..3 * CHUNK_SIZE + 100).map(|i| (i % 251) as u8).collect();

        let writer = {
            let slot = slot.clone();
            let payload = payload.clone();
            thread::spawn(move || {
                for chunk in payload.chunks(CHUNK_SIZE) {
                    slot.write_chunk(7, chunk);
                }
            })
        };

        let mut received = vec![0u8; payload.len()];
        for chunk in received.chunks_mut(CHUNK_SIZE) {
            slot.read_chunk(7, chunk).unwrap();
        }
        writer.join().unwrap();
        assert_eq!(received, payload);
    }
}
