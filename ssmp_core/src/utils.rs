//! Internal helpers shared across modules.

use std::sync::atomic::AtomicU32;

use crate::types::EndpointId;

/// Hint that a branch is unlikely to be taken (cold path)
#[inline(always)]
#[cold]
fn cold() {}

/// Mark a condition as unlikely. Used for the bounds checks on the send and
/// receive paths.
#[inline(always)]
pub(crate) fn unlikely(b: bool) -> bool {
    if b {
        cold()
    }
    b
}

/// Abort on an out-of-range peer id, the way slice indexing would.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn invalid_peer(peer: EndpointId, num_endpoints: u32) -> ! {
    panic!(
        "endpoint id {} out of range for a run of {} endpoints",
        peer, num_endpoints
    )
}

#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn self_send(peer: EndpointId) -> ! {
    panic!("endpoint {} cannot message itself", peer)
}

/// Cache-line aligned wrapper for flags that must not share a line.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(pub T);

/// One padded word in shared memory.
pub type PaddedFlag = CachePadded<AtomicU32>;

const _: () = assert!(std::mem::size_of::<PaddedFlag>() == 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlikely_is_identity() {
        assert!(unlikely(true));
        assert!(!unlikely(false));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn invalid_peer_panics() {
        invalid_peer(EndpointId::new(9), 4);
    }
}
