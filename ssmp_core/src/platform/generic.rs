use std::sync::OnceLock;
use std::time::Instant;

use super::Platform;

/// Fallback for targets without a user-readable cycle counter.
///
/// Ticks are nanoseconds since the first read in this process.
pub struct Generic;

fn epoch() -> &'static Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now)
}

impl Platform for Generic {
    const NAME: &'static str = "generic";
    const CACHE_LINE_SIZE: usize = 64;

    #[inline(always)]
    fn pause() {
        std::hint::spin_loop();
    }

    #[inline(always)]
    fn read_cycles() -> u64 {
        epoch().elapsed().as_nanos() as u64
    }
}
