//! Tick-to-nanosecond conversion for the cycle counter.

use std::time::{Duration, Instant};

use ssmp_core::{calibrate_ticks_correction, get_ticks, platform::full_fence, Ticks};

/// Calibration of the cycle counter against the monotonic clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickCalibration {
    /// Counter frequency
    pub ticks_per_sec: f64,
    pub ns_per_tick: f64,
    /// Cost of one `get_ticks()` call, subtracted from every sample
    pub correction: Ticks,
}

impl TickCalibration {
    /// Busy-wait `duration_ms` and compare counter progress with wall time.
    pub fn measure(duration_ms: u64) -> Self {
        let correction = calibrate_ticks_correction();
        let duration = Duration::from_millis(duration_ms.max(1));

        full_fence();
        let start_ticks = get_ticks();
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
        let ticks = get_ticks().wrapping_sub(start_ticks).max(1);
        let elapsed = start.elapsed();

        let ticks_per_sec = ticks as f64 / elapsed.as_secs_f64();
        Self {
            ticks_per_sec,
            ns_per_tick: elapsed.as_nanos() as f64 / ticks as f64,
            correction,
        }
    }

    /// Sample of `end - start` minus the call overhead.
    #[inline(always)]
    pub fn elapsed(&self, start: Ticks, end: Ticks) -> Ticks {
        end.wrapping_sub(start).saturating_sub(self.correction)
    }

    #[inline(always)]
    pub fn ticks_to_ns(&self, ticks: Ticks) -> u64 {
        (ticks as f64 * self.ns_per_tick) as u64
    }

    pub fn ns_to_ticks(&self, ns: u64) -> Ticks {
        (ns as f64 / self.ns_per_tick) as Ticks
    }
}
