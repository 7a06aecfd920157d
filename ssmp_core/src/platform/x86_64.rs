use super::Platform;

/// x86_64: `pause`, `rdtsc`, and `mfence` for the full barrier.
///
/// Loads and stores are already ordered by TSO, so the acquire/release
/// defaults only have to stop the compiler from reordering.
pub struct X86_64;

impl Platform for X86_64 {
    const NAME: &'static str = "x86_64";
    const CACHE_LINE_SIZE: usize = 64;

    #[inline(always)]
    fn pause() {
        std::hint::spin_loop();
    }

    #[inline(always)]
    fn read_cycles() -> u64 {
        // SAFETY: rdtsc is available on every x86_64 CPU and has no memory effects
        #[allow(unused_unsafe)]
        unsafe {
            core::arch::x86_64::_rdtsc()
        }
    }

    #[inline(always)]
    fn full_fence() {
        // SAFETY: mfence is part of the x86_64 baseline (SSE2)
        #[allow(unused_unsafe)]
        unsafe {
            core::arch::x86_64::_mm_mfence();
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    }
}
