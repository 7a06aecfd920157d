//! # Platform primitives
//!
//! Everything above this module spins on shared flags, so it needs the same
//! handful of machine operations on every target:
//!
//! - **pause**: relax the pipeline inside a spin loop
//! - **cycle counter**: a monotonic per-core tick source for back-off and timing
//! - **fences**: load, store and full barriers around payload copies
//! - **cache line size**: alignment for every shared slot
//!
//! Each architecture implements [`Platform`] once and the build picks one as
//! [`Native`]. Atomic load/store/CAS come straight from `std::sync::atomic`,
//! which already lowers to the right instructions per target.

mod affinity;
mod ticks;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod generic;
#[cfg(target_arch = "x86_64")]
mod x86_64;

pub use affinity::{get_cpu, online_cpus, set_cpu};
pub use ticks::{
    calibrate_ticks_correction, get_ticks, ticks_calibrated, ticks_correction, wait_cycles, wtime,
    Ticks, GETTICKS_CALC_REPS,
};

#[cfg(target_arch = "aarch64")]
pub use aarch64::Aarch64 as Native;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub use generic::Generic as Native;
#[cfg(target_arch = "x86_64")]
pub use x86_64::X86_64 as Native;

use std::sync::atomic::{fence, Ordering};

/// Cache line size every shared structure is aligned and padded to.
///
/// All supported targets use 64-byte lines; the `#[repr(align(64))]`
/// attributes on the shared structs must agree with this value.
pub const CACHE_LINE_SIZE: usize = 64;

/// Per-architecture machine primitives.
pub trait Platform {
    /// Human-readable architecture name (reported by the benchmarks)
    const NAME: &'static str;

    /// Coherence granule of the target
    const CACHE_LINE_SIZE: usize;

    /// Spin-loop hint.
    fn pause();

    /// Monotonic cycle counter.
    fn read_cycles() -> u64;

    /// Orders earlier loads before later loads and stores.
    #[inline(always)]
    fn load_fence() {
        fence(Ordering::Acquire);
    }

    /// Orders earlier loads and stores before later stores.
    #[inline(always)]
    fn store_fence() {
        fence(Ordering::Release);
    }

    /// Full two-way barrier.
    #[inline(always)]
    fn full_fence() {
        fence(Ordering::SeqCst);
    }
}

const _: () = assert!(<Native as Platform>::CACHE_LINE_SIZE == CACHE_LINE_SIZE);

/// Spin-loop hint on the native platform.
#[inline(always)]
pub fn pause() {
    Native::pause();
}

/// Issue `reps` pause instructions.
#[inline(always)]
pub fn pause_rep(reps: u32) {
    for _ in 0..reps {
        Native::pause();
    }
}

/// Full memory barrier on the native platform.
#[inline(always)]
pub fn full_fence() {
    Native::full_fence();
}

/// Load barrier on the native platform.
#[inline(always)]
pub fn load_fence() {
    Native::load_fence();
}

/// Store barrier on the native platform.
#[inline(always)]
pub fn store_fence() {
    Native::store_fence();
}

/// Round up to the next power of two (`x` itself if it already is one, 1 for 0).
pub fn pow2_roundup(x: u32) -> u32 {
    if x == 0 {
        return 1;
    }
    let mut x = x - 1;
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x.wrapping_add(1)
}

/// Bounded back-off for busy-wait loops.
///
/// Each call to [`Backoff::snooze`] pauses one step longer than the last,
/// wrapping at `mask` so a long wait never drifts into multi-microsecond
/// sleeps that would hurt wake latency.
#[derive(Debug, Clone)]
pub struct Backoff {
    step: u32,
    mask: u32,
}

impl Backoff {
    /// Mask used while polling a mailbox flag
    pub const MAILBOX: u32 = 63;
    /// Mask used while spinning on a barrier's cleared flag
    pub const BARRIER: u32 = 255;

    pub fn new(mask: u32) -> Self {
        Self { step: 0, mask }
    }

    /// Back-off tuned for mailbox polling.
    pub fn mailbox() -> Self {
        Self::new(Self::MAILBOX)
    }

    /// Back-off tuned for barrier spinning.
    pub fn barrier() -> Self {
        Self { step: 1, mask: Self::BARRIER }
    }

    #[inline(always)]
    pub fn snooze(&mut self) {
        pause_rep(self.step);
        self.step = self.step.wrapping_add(1) & self.mask;
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow2_roundup_matches_next_power_of_two() {
        assert_eq!(pow2_roundup(0), 1);
        assert_eq!(pow2_roundup(1), 1);
        assert_eq!(pow2_roundup(3), 4);
        assert_eq!(pow2_roundup(64), 64);
        assert_eq!(pow2_roundup(65), 128);
        for x in 1..5000u32 {
            assert_eq!(pow2_roundup(x), x.next_power_of_two());
        }
    }

    #[test]
    fn backoff_wraps_at_mask() {
        let mut b = Backoff::new(3);
        for _ in 0..10 {
            b.snooze();
            assert!(b.step <= 3);
        }
        b.reset();
        assert_eq!(b.step, 0);
    }

    #[test]
    fn native_platform_reports_cache_line() {
        assert_eq!(<Native as Platform>::CACHE_LINE_SIZE, 64);
        assert!(!<Native as Platform>::NAME.is_empty());
    }
}
