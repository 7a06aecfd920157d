//! Cycle counter reads and call-overhead calibration.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{full_fence, Native, Platform};

/// Raw cycle-counter reading
pub type Ticks = u64;

/// Back-to-back reads averaged when calibrating the correction
pub const GETTICKS_CALC_REPS: u32 = 2_000_000;

static CORRECTION: OnceLock<Ticks> = OnceLock::new();

/// Read the native cycle counter.
#[inline(always)]
pub fn get_ticks() -> Ticks {
    Native::read_cycles()
}

fn measure_correction(reps: u32) -> Ticks {
    let reps = reps.max(1);
    let mut total: Ticks = 0;
    for _ in 0..reps {
        full_fence();
        let start = get_ticks();
        let end = get_ticks();
        total = total.saturating_add(end.saturating_sub(start));
    }
    total / reps as Ticks
}

/// Average cost of one `get_ticks()` call, measured once per process.
///
/// Subtract it from a start/end delta to get the cost of the code in between.
pub fn ticks_correction() -> Ticks {
    *CORRECTION.get_or_init(|| {
        let value = measure_correction(GETTICKS_CALC_REPS);
        log::debug!("ticks correction calibrated to {} cycles", value);
        value
    })
}

/// Force calibration now (before pinning or timing loops) and return it.
pub fn calibrate_ticks_correction() -> Ticks {
    ticks_correction()
}

/// Whether this process has measured the correction yet.
pub fn ticks_calibrated() -> bool {
    CORRECTION.get().is_some()
}

/// Spin for roughly `cycles` ticks.
#[inline]
pub fn wait_cycles(cycles: Ticks) {
    let correction = ticks_correction().saturating_mul(2);
    if cycles <= correction {
        return;
    }
    let target = cycles - correction;
    let start = get_ticks();
    while get_ticks().wrapping_sub(start) < target {
        Native::pause();
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn wtime() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances() {
        let start = get_ticks();
        let mut now = start;
        for _ in 0..1_000_000 {
            now = get_ticks();
            if now != start {
                break;
            }
        }
        assert_ne!(now, start);
    }

    #[test]
    fn correction_is_stable_once_calibrated() {
        let first = calibrate_ticks_correction();
        assert!(ticks_calibrated());
        assert_eq!(first, ticks_correction());
    }

    #[test]
    fn small_sample_correction_is_finite() {
        // a counter read costs tens of cycles, never a million
        assert!(measure_correction(1000) < 1_000_000);
    }

    #[test]
    fn wait_cycles_returns() {
        wait_cycles(0);
        wait_cycles(10_000);
    }

    #[test]
    fn wtime_is_after_2020() {
        assert!(wtime() > 1_577_836_800.0);
    }
}
