//! Run and endpoint contexts.
//!
//! [`Ssmp`] is the run: one shared region plus the topology, created once
//! (typically by a launcher before it forks) and cheap to clone. Each
//! participant turns it into an [`Endpoint`] with [`Ssmp::mem_init`], which
//! builds the per-peer tables and waits for every other endpoint to arrive.
//!
//! ```rust,ignore
//! let ssmp = Ssmp::init(2)?;
//! // in the process (or thread) playing endpoint 1:
//! let ep = ssmp.mem_init(1)?;
//! ep.send(0, &Message::with_w0(42));
//! ep.term();
//! ```

use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::color::Membership;
use crate::config::SsmpConfig;
use crate::error::{SsmpError, SsmpResult};
use crate::mailbox::SyncStrategy;
use crate::memory::SharedRegion;
use crate::platform::{calibrate_ticks_correction, full_fence, Backoff};
use crate::topology::Topology;
use crate::types::{EndpointId, NUM_BARRIERS};
use crate::utils::{invalid_peer, unlikely};

/// One run of `N` endpoints sharing a region.
#[derive(Debug, Clone)]
pub struct Ssmp {
    config: SsmpConfig,
    topology: Arc<Topology>,
    region: Arc<SharedRegion>,
}

impl Ssmp {
    /// Set up a run of `num_endpoints` with defaults and environment overrides.
    pub fn init(num_endpoints: u32) -> SsmpResult<Self> {
        Self::with_config(SsmpConfig::from_env()?, num_endpoints)
    }

    /// Set up (create or attach to) the region described by `config`.
    pub fn with_config(config: SsmpConfig, num_endpoints: u32) -> SsmpResult<Self> {
        let topology = Topology::detect(num_endpoints, &config)?;
        let region = SharedRegion::open(&config, num_endpoints)?;
        Ok(Self {
            config,
            topology: Arc::new(topology),
            region: Arc::new(region),
        })
    }

    pub fn num_endpoints(&self) -> u32 {
        self.region.num_endpoints()
    }

    pub fn config(&self) -> &SsmpConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Whether this handle created the region (and will unlink it).
    pub fn is_owner(&self) -> bool {
        self.region.is_owner()
    }

    /// Physical core endpoint `id` is placed on.
    pub fn core_of(&self, id: u32) -> usize {
        self.config.core_for(id)
    }

    /// Become endpoint `id`: build local tables, empty the slots this endpoint
    /// reads, then rendezvous with every other endpoint of the run.
    pub fn mem_init(&self, id: u32) -> SsmpResult<Endpoint> {
        let n = self.num_endpoints();
        if id >= n {
            return Err(SsmpError::invalid_input(format!(
                "endpoint id {} out of range for a run of {} endpoints",
                id, n
            )));
        }
        let me = EndpointId::new(id);
        let strategies = (0..n)
            .map(|peer| self.topology.strategy(me, EndpointId::new(peer)))
            .collect();

        // the locked path's back-off reads the correction inside its spin
        calibrate_ticks_correction();
        self.region.reset_inbound(me);

        let endpoint = Endpoint {
            id: me,
            num_endpoints: n,
            lock_wait: self.config.cross_socket_wait_cycles,
            strategies,
            recv_cursor: Cell::new((id + 1) % n),
            predicates: RefCell::new(vec![None; NUM_BARRIERS]),
            region: Arc::clone(&self.region),
        };
        endpoint.rendezvous();
        log::debug!("endpoint {} of {} initialized", id, n);
        Ok(endpoint)
    }
}

/// One participant's view of the run.
///
/// Every operation runs on the owning thread; the type is `Send` but not
/// `Sync`.
pub struct Endpoint {
    id: EndpointId,
    num_endpoints: u32,
    lock_wait: u64,
    strategies: Vec<SyncStrategy>,
    pub(crate) recv_cursor: Cell<u32>,
    pub(crate) predicates: RefCell<Vec<Option<Arc<dyn Membership>>>>,
    region: Arc<SharedRegion>,
}

impl Endpoint {
    #[inline(always)]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[inline(always)]
    pub fn num_endpoints(&self) -> u32 {
        self.num_endpoints
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Flag discipline used with `peer`.
    #[inline(always)]
    pub fn strategy_for(&self, peer: EndpointId) -> SyncStrategy {
        self.strategies[peer.index()]
    }

    #[inline(always)]
    pub(crate) fn lock_wait(&self) -> u64 {
        self.lock_wait
    }

    #[inline(always)]
    pub(crate) fn check_peer(&self, peer: EndpointId) {
        if unlikely(peer.get() >= self.num_endpoints) {
            invalid_peer(peer, self.num_endpoints);
        }
    }

    /// Raise this endpoint's init flag, then spin until every flag is up.
    fn rendezvous(&self) {
        self.region.init_flag(self.id).store(1, Ordering::Release);
        let mut backoff = Backoff::mailbox();
        for peer in 0..self.num_endpoints {
            let flag = self.region.init_flag(EndpointId::new(peer));
            while flag.load(Ordering::Acquire) == 0 {
                backoff.snooze();
                full_fence();
            }
        }
    }

    /// Leave the run. The region itself goes away with the last handle of
    /// the process that created it; dropping the endpoint does the same.
    pub fn term(self) {
        log::debug!("endpoint {} terminated", self.id);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.region.depart() {
            log::debug!(
                "last endpoint left region '{}', slots recycled",
                self.region.name()
            );
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("num_endpoints", &self.num_endpoints)
            .field("region", &self.region.name())
            .finish()
    }
}
