use super::Platform;

/// aarch64: `isb`-based spin hint and the virtual counter `cntvct_el0`.
pub struct Aarch64;

impl Platform for Aarch64 {
    const NAME: &'static str = "aarch64";
    const CACHE_LINE_SIZE: usize = 64;

    #[inline(always)]
    fn pause() {
        std::hint::spin_loop();
    }

    #[inline(always)]
    fn read_cycles() -> u64 {
        let ticks: u64;
        // SAFETY: cntvct_el0 is readable from EL0 on Linux and macOS
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack));
        }
        ticks
    }
}
