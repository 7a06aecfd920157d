//! Identifiers and fixed sizes shared by every module.

use std::fmt;

/// `i32` payload words carried by one mailbox message
pub const MSG_WORDS: usize = 14;

/// Bytes per bulk-transfer chunk
pub const CHUNK_SIZE: usize = 8192;

/// Slots in the barrier table
pub const NUM_BARRIERS: usize = 16;

/// Barrier slot every endpoint joins by default
pub const BARRIER_ALL: usize = 0;

/// Largest endpoint count a run supports.
///
/// The mailbox grid grows as N², so 1024 endpoints already map 64 MiB.
pub const MAX_ENDPOINTS: u32 = 1024;

/// Logical participant id in `0..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EndpointId(u32);

impl EndpointId {
    #[inline(always)]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline(always)]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for EndpointId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<EndpointId> for u32 {
    fn from(id: EndpointId) -> Self {
        id.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
