//! Typed view of one run's shared region.
//!
//! ```text
//! ┌────────────────┐ 0
//! │ RegionHeader   │ one line: magic, version, state, sizes, creator pid
//! ├────────────────┤
//! │ BarrierSlot×16 │
//! ├────────────────┤
//! │ init flag × N  │ one padded flag per endpoint (startup rendezvous)
//! ├────────────────┤
//! │ ChunkSlot × N  │ one per receiver
//! ├────────────────┤
//! │ Mailbox × N²   │ receiver-major: index = receiver * N + sender
//! └────────────────┘
//! ```
//!
//! The creator lays the region out and publishes `READY` last; attachers
//! wait for it and then check that the header describes the run they expect.
//!
//! A region outlives a run when its creator never drops it. The last endpoint
//! to terminate puts every slot and flag back to the just-created state, and
//! a region whose creator process is gone is unlinked and created afresh.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::barrier::BarrierSlot;
use crate::chunk::ChunkSlot;
use crate::config::SsmpConfig;
use crate::error::{SsmpError, SsmpResult};
use crate::mailbox::Mailbox;
use crate::memory::shm_region::{process_alive, unlink_region, ShmRegion};
use crate::platform::CACHE_LINE_SIZE;
use crate::types::{EndpointId, CHUNK_SIZE, MAX_ENDPOINTS, MSG_WORDS, NUM_BARRIERS};
use crate::utils::{invalid_peer, unlikely, PaddedFlag};

/// "SSMPREG1"
pub const REGION_MAGIC: u64 = 0x5353_4D50_5245_4731;

/// Bumped whenever the byte layout changes
pub const REGION_VERSION: u32 = 1;

pub const REGION_UNINIT: u32 = 0;
pub const REGION_READY: u32 = 1;

/// First cache line of the region.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct RegionHeader {
    magic: AtomicU64,
    total_size: AtomicU64,
    version: AtomicU32,
    state: AtomicU32,
    num_endpoints: AtomicU32,
    cache_line: AtomicU32,
    msg_words: AtomicU32,
    chunk_size: AtomicU32,
    num_barriers: AtomicU32,
    creator_pid: AtomicU32,
    /// Endpoints of the current run that have terminated
    departed: AtomicU32,
}

const _: () = assert!(size_of::<RegionHeader>() == 64);

impl RegionHeader {
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == REGION_READY
    }

    pub fn num_endpoints(&self) -> u32 {
        self.num_endpoints.load(Ordering::Relaxed)
    }

    pub fn creator_pid(&self) -> u32 {
        self.creator_pid.load(Ordering::Relaxed)
    }

    fn write(&self, layout: &RegionLayout) {
        self.magic.store(REGION_MAGIC, Ordering::Relaxed);
        self.version.store(REGION_VERSION, Ordering::Relaxed);
        self.num_endpoints.store(layout.num_endpoints, Ordering::Relaxed);
        self.cache_line.store(CACHE_LINE_SIZE as u32, Ordering::Relaxed);
        self.msg_words.store(MSG_WORDS as u32, Ordering::Relaxed);
        self.chunk_size.store(CHUNK_SIZE as u32, Ordering::Relaxed);
        self.num_barriers.store(NUM_BARRIERS as u32, Ordering::Relaxed);
        self.total_size.store(layout.size as u64, Ordering::Relaxed);
        self.creator_pid.store(std::process::id(), Ordering::Relaxed);
        self.departed.store(0, Ordering::Relaxed);
    }

    fn publish(&self) {
        self.state.store(REGION_READY, Ordering::Release);
    }

    /// Compare every field against what this build and `layout` expect.
    fn validate(&self, name: &str, layout: &RegionLayout) -> SsmpResult<()> {
        let check = |field: &str, found: u64, expected: u64| {
            if found == expected {
                Ok(())
            } else {
                Err(SsmpError::layout_mismatch(
                    name,
                    format!("{} is {}, this run expects {}", field, found, expected),
                ))
            }
        };
        check("magic", self.magic.load(Ordering::Relaxed), REGION_MAGIC)?;
        check(
            "layout version",
            self.version.load(Ordering::Relaxed) as u64,
            REGION_VERSION as u64,
        )?;
        check(
            "endpoint count",
            self.num_endpoints() as u64,
            layout.num_endpoints as u64,
        )?;
        check(
            "cache line size",
            self.cache_line.load(Ordering::Relaxed) as u64,
            CACHE_LINE_SIZE as u64,
        )?;
        check(
            "message words",
            self.msg_words.load(Ordering::Relaxed) as u64,
            MSG_WORDS as u64,
        )?;
        check(
            "chunk size",
            self.chunk_size.load(Ordering::Relaxed) as u64,
            CHUNK_SIZE as u64,
        )?;
        check(
            "barrier count",
            self.num_barriers.load(Ordering::Relaxed) as u64,
            NUM_BARRIERS as u64,
        )?;
        check(
            "region size",
            self.total_size.load(Ordering::Relaxed),
            layout.size as u64,
        )
    }
}

/// Byte offsets of each section for a given endpoint count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub num_endpoints: u32,
    pub barriers: usize,
    pub init_flags: usize,
    pub chunks: usize,
    pub mailboxes: usize,
    pub size: usize,
}

const fn align_up(x: usize) -> usize {
    (x + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
}

impl RegionLayout {
    pub fn new(num_endpoints: u32) -> SsmpResult<Self> {
        if num_endpoints == 0 || num_endpoints > MAX_ENDPOINTS {
            return Err(SsmpError::invalid_input(format!(
                "endpoint count {} outside 1..={}",
                num_endpoints, MAX_ENDPOINTS
            )));
        }
        let n = num_endpoints as usize;
        let barriers = align_up(size_of::<RegionHeader>());
        let init_flags = align_up(barriers + NUM_BARRIERS * size_of::<BarrierSlot>());
        let chunks = align_up(init_flags + n * size_of::<PaddedFlag>());
        let mailboxes = align_up(chunks + n * size_of::<ChunkSlot>());
        let size = align_up(mailboxes + n * n * size_of::<Mailbox>());
        Ok(Self {
            num_endpoints,
            barriers,
            init_flags,
            chunks,
            mailboxes,
            size,
        })
    }
}

/// A mapped, laid-out and validated region.
#[derive(Debug)]
pub struct SharedRegion {
    shm: ShmRegion,
    layout: RegionLayout,
}

impl SharedRegion {
    /// Create or attach to the region named in `config`, sized for `num_endpoints`.
    pub fn open(config: &SsmpConfig, num_endpoints: u32) -> SsmpResult<Self> {
        let layout = RegionLayout::new(num_endpoints)?;
        let timeout = Duration::from_millis(config.attach_timeout_ms);
        let shm = ShmRegion::create_or_attach(&config.shm_name, layout.size, timeout)?;
        let mut region = Self { shm, layout };

        if region.left_by_dead_creator() {
            let stale_pid = region.header().creator_pid();
            log::warn!(
                "region '{}' was left by pid {}, which is gone; recreating it",
                config.shm_name,
                stale_pid
            );
            drop(region);
            unlink_region(&config.shm_name)?;
            let shm = ShmRegion::create_or_attach(&config.shm_name, layout.size, timeout)?;
            region = Self { shm, layout };
        }

        if region.shm.is_owner() {
            region.initialize();
            log::info!(
                "created region '{}' for {} endpoints ({} bytes)",
                config.shm_name,
                num_endpoints,
                layout.size
            );
        } else {
            region.wait_ready(timeout)?;
            region.header().validate(&config.shm_name, &layout)?;
            log::info!(
                "attached to region '{}' created by pid {}",
                config.shm_name,
                region.header().creator_pid()
            );
        }
        Ok(region)
    }

    fn initialize(&self) {
        let header = self.header();
        header.write(&self.layout);
        for slot in self.barriers() {
            slot.reset();
        }
        for flag in self.init_flags() {
            flag.0.store(0, Ordering::Relaxed);
        }
        header.publish();
    }

    /// An attached, published region whose creator process no longer exists
    /// and which is still the object behind the name.
    fn left_by_dead_creator(&self) -> bool {
        !self.shm.is_owner()
            && self.header().is_ready()
            && !process_alive(self.header().creator_pid())
            && self.shm.still_linked()
    }

    /// Empty every slot `receiver` reads. Runs before its init flag goes up,
    /// so no peer of the run can have posted yet.
    pub(crate) fn reset_inbound(&self, receiver: EndpointId) {
        for slot in self.inbox(receiver) {
            slot.reset();
        }
        self.chunk(receiver).reset();
    }

    /// Count one endpoint out of the run. The last one recycles the region
    /// and gets `true`.
    pub(crate) fn depart(&self) -> bool {
        let header = self.header();
        let departed = header.departed.fetch_add(1, Ordering::AcqRel) + 1;
        if departed < self.layout.num_endpoints {
            return false;
        }
        for slot in self.barriers() {
            slot.reset();
        }
        for slot in self.mailboxes() {
            slot.reset();
        }
        for slot in self.chunks() {
            slot.reset();
        }
        for flag in self.init_flags() {
            flag.0.store(0, Ordering::Relaxed);
        }
        header.departed.store(0, Ordering::Release);
        true
    }

    fn wait_ready(&self, timeout: Duration) -> SsmpResult<()> {
        let deadline = Instant::now() + timeout;
        while !self.header().is_ready() {
            if Instant::now() >= deadline {
                return Err(SsmpError::Timeout(format!(
                    "region '{}' was never published by its creator",
                    self.shm.name()
                )));
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    pub fn is_owner(&self) -> bool {
        self.shm.is_owner()
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    pub fn num_endpoints(&self) -> u32 {
        self.layout.num_endpoints
    }

    /// # Safety
    /// `offset + count * size_of::<T>()` must lie within the mapping and
    /// `offset` must be aligned for `T`. Every `T` used here is made of
    /// atomics or guarded cells, so shared references are sound.
    unsafe fn section<T>(&self, offset: usize, count: usize) -> &[T] {
        std::slice::from_raw_parts(self.shm.as_ptr().add(offset).cast::<T>(), count)
    }

    pub fn header(&self) -> &RegionHeader {
        // SAFETY: the header sits at offset 0 of a page-aligned mapping
        unsafe { &self.section::<RegionHeader>(0, 1)[0] }
    }

    pub fn barriers(&self) -> &[BarrierSlot] {
        // SAFETY: offsets come from RegionLayout, which sized the mapping
        unsafe { self.section(self.layout.barriers, NUM_BARRIERS) }
    }

    /// Barrier slot `id`, `None` when out of range.
    pub fn barrier(&self, id: usize) -> Option<&BarrierSlot> {
        self.barriers().get(id)
    }

    pub fn init_flags(&self) -> &[PaddedFlag] {
        // SAFETY: as for barriers
        unsafe { self.section(self.layout.init_flags, self.layout.num_endpoints as usize) }
    }

    pub(crate) fn init_flag(&self, id: EndpointId) -> &AtomicU32 {
        &self.init_flags()[id.index()].0
    }

    pub fn chunks(&self) -> &[ChunkSlot] {
        // SAFETY: as for barriers
        unsafe { self.section(self.layout.chunks, self.layout.num_endpoints as usize) }
    }

    /// Chunk buffer owned by `receiver`.
    pub fn chunk(&self, receiver: EndpointId) -> &ChunkSlot {
        self.check(receiver);
        &self.chunks()[receiver.index()]
    }

    pub fn mailboxes(&self) -> &[Mailbox] {
        let n = self.layout.num_endpoints as usize;
        // SAFETY: as for barriers
        unsafe { self.section(self.layout.mailboxes, n * n) }
    }

    /// The slot `sender` writes and `receiver` reads.
    #[inline]
    pub fn mailbox(&self, sender: EndpointId, receiver: EndpointId) -> &Mailbox {
        self.check(sender);
        self.check(receiver);
        let n = self.layout.num_endpoints as usize;
        &self.mailboxes()[receiver.index() * n + sender.index()]
    }

    /// All slots `receiver` reads, indexed by sender.
    pub fn inbox(&self, receiver: EndpointId) -> &[Mailbox] {
        self.check(receiver);
        let n = self.layout.num_endpoints as usize;
        let start = receiver.index() * n;
        &self.mailboxes()[start..start + n]
    }

    #[inline(always)]
    fn check(&self, id: EndpointId) {
        if unlikely(id.get() >= self.layout.num_endpoints) {
            invalid_peer(id, self.layout.num_endpoints);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::barrier::{BarrierState, MODE_ALL};
    use crate::mailbox::{Message, SyncStrategy};

    fn test_config(tag: &str) -> SsmpConfig {
        let mut config = SsmpConfig::with_shm_name(format!(
            "/lay_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .subsec_nanos()
        ));
        config.attach_timeout_ms = 200;
        config
    }

    #[test]
    fn sections_are_cache_aligned_and_ordered() {
        let layout = RegionLayout::new(5).unwrap();
        for offset in [layout.barriers, layout.init_flags, layout.chunks, layout.mailboxes] {
            assert_eq!(offset % CACHE_LINE_SIZE, 0);
        }
        assert!(layout.barriers < layout.init_flags);
        assert!(layout.init_flags < layout.chunks);
        assert!(layout.chunks < layout.mailboxes);
        assert_eq!(layout.size, layout.mailboxes + 25 * 64);
    }

    #[test]
    fn rejects_bad_endpoint_counts() {
        assert!(RegionLayout::new(0).is_err());
        assert!(RegionLayout::new(MAX_ENDPOINTS + 1).is_err());
    }

    #[test]
    fn creator_publishes_default_barriers() {
        let config = test_config("create");
        let region = SharedRegion::open(&config, 3).unwrap();
        assert!(region.is_owner());
        assert!(region.header().is_ready());
        assert_eq!(region.header().num_endpoints(), 3);
        for slot in region.barriers() {
            assert_eq!(slot.mode(), MODE_ALL);
            assert_eq!(slot.state(), BarrierState::IDLE);
        }
        assert!(region.barrier(NUM_BARRIERS).is_none());
    }

    #[test]
    fn attacher_sees_creator_writes() {
        let config = test_config("attach");
        let owner = SharedRegion::open(&config, 4).unwrap();
        let other = SharedRegion::open(&config, 4).unwrap();
        assert!(!other.is_owner());

        let (a, b) = (EndpointId::new(1), EndpointId::new(3));
        owner
            .mailbox(a, b)
            .post(&Message::with_w0(77), a.get(), SyncStrategy::Plain, 0);
        assert!(other.inbox(b)[a.index()].has_message());
        assert_eq!(other.mailbox(a, b).take(SyncStrategy::Plain, 0).w0(), 77);
    }

    #[test]
    fn endpoint_count_mismatch_is_fatal() {
        let config = test_config("mismatch");
        let _owner = SharedRegion::open(&config, 4).unwrap();
        // a smaller run fits in the object but the header disagrees
        let err = SharedRegion::open(&config, 2).unwrap_err();
        assert!(matches!(err, SsmpError::LayoutMismatch { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn last_departure_recycles_the_region() {
        let config = test_config("depart");
        let region = SharedRegion::open(&config, 2).unwrap();
        let (a, b) = (EndpointId::new(0), EndpointId::new(1));
        region
            .mailbox(a, b)
            .post(&Message::with_w0(1), a.get(), SyncStrategy::Plain, 0);
        region.chunk(b).write_chunk(a.get(), &[1; 8]);
        region.init_flag(a).store(1, Ordering::Relaxed);
        region.init_flag(b).store(1, Ordering::Relaxed);

        assert!(!region.depart());
        assert!(region.mailbox(a, b).has_message());

        assert!(region.depart());
        assert!(region.mailboxes().iter().all(Mailbox::is_empty));
        assert!(region.chunks().iter().all(|c| !c.is_full()));
        assert!(region.init_flags().iter().all(|f| f.0.load(Ordering::Relaxed) == 0));
        // the count starts over for the next run
        assert!(!region.depart());
    }

    #[test]
    fn reset_inbound_clears_only_that_receiver() {
        let config = test_config("inbound");
        let region = SharedRegion::open(&config, 3).unwrap();
        let (a, b, c) = (EndpointId::new(0), EndpointId::new(1), EndpointId::new(2));
        region
            .mailbox(a, b)
            .post(&Message::with_w0(1), a.get(), SyncStrategy::Plain, 0);
        region
            .mailbox(c, b)
            .post(&Message::with_w0(2), c.get(), SyncStrategy::Plain, 0);
        region
            .mailbox(b, a)
            .post(&Message::with_w0(3), b.get(), SyncStrategy::Plain, 0);
        region.chunk(b).write_chunk(a.get(), &[1; 8]);

        region.reset_inbound(b);
        assert!(region.inbox(b).iter().all(Mailbox::is_empty));
        assert!(!region.chunk(b).is_full());
        assert!(region.mailbox(b, a).has_message());
    }

    #[test]
    fn region_left_by_dead_creator_is_recreated() {
        let config = test_config("stale");
        let stale = SharedRegion::open(&config, 2).unwrap();
        let (a, b) = (EndpointId::new(1), EndpointId::new(0));
        stale
            .mailbox(a, b)
            .post(&Message::with_w0(666), a.get(), SyncStrategy::Plain, 0);
        stale.init_flag(b).store(1, Ordering::Relaxed);
        // no process can have this pid; pid_max is far below it
        stale
            .header()
            .creator_pid
            .store(i32::MAX as u32, Ordering::Relaxed);
        // keep the old handle from unlinking the name the fresh region takes
        std::mem::forget(stale);

        let fresh = SharedRegion::open(&config, 2).unwrap();
        assert!(fresh.is_owner());
        assert_eq!(fresh.header().creator_pid(), std::process::id());
        assert!(!fresh.mailbox(a, b).has_message());
        assert_eq!(fresh.init_flag(b).load(Ordering::Relaxed), 0);
    }

    #[test]
    fn region_of_live_creator_is_attached() {
        let config = test_config("live");
        let owner = SharedRegion::open(&config, 2).unwrap();
        assert!(owner.shm.still_linked());
        let other = SharedRegion::open(&config, 2).unwrap();
        assert!(!other.is_owner());
        assert!(!other.left_by_dead_creator());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn mailbox_index_is_bounds_checked() {
        let config = test_config("bounds");
        let region = SharedRegion::open(&config, 2).unwrap();
        region.mailbox(EndpointId::new(0), EndpointId::new(2));
    }
}
