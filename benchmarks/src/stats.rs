//! Summary statistics over per-operation samples.
//!
//! Samples are nanoseconds after tick conversion; everything here is plain
//! arithmetic over `u64` slices.

use serde::{Deserialize, Serialize};

/// Summary of one benchmark run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    /// Samples dropped by Tukey filtering
    pub outliers_removed: usize,
}

impl Statistics {
    /// Compute statistics from raw samples, optionally dropping outliers first.
    pub fn from_samples(samples: &[u64], drop_outliers: bool) -> Self {
        let mut sorted = if drop_outliers {
            filter_outliers(samples)
        } else {
            samples.to_vec()
        };
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        Self {
            count,
            mean: mean(&sorted),
            median: median(&sorted),
            std_dev: std_dev(&sorted),
            min: sorted[0],
            max: sorted[count - 1],
            p90: calculate_percentile(&sorted, 90.0),
            p99: calculate_percentile(&sorted, 99.0),
            p999: calculate_percentile(&sorted, 99.9),
            outliers_removed: samples.len() - count,
        }
    }
}

pub fn mean(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&x| x as f64).sum::<f64>() / samples.len() as f64
}

/// Median of sorted input
pub fn median(sorted_samples: &[u64]) -> f64 {
    let len = sorted_samples.len();
    if len == 0 {
        return 0.0;
    }
    if len % 2 == 0 {
        (sorted_samples[len / 2 - 1] as f64 + sorted_samples[len / 2] as f64) / 2.0
    } else {
        sorted_samples[len / 2] as f64
    }
}

/// Population standard deviation
pub fn std_dev(samples: &[u64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples
        .iter()
        .map(|&x| {
            let diff = x as f64 - m;
            diff * diff
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt()
}

/// Percentile of sorted input with linear interpolation
pub fn calculate_percentile(sorted_samples: &[u64], percentile: f64) -> u64 {
    let len = sorted_samples.len();
    if len == 0 {
        return 0;
    }
    if percentile <= 0.0 {
        return sorted_samples[0];
    }
    if percentile >= 100.0 {
        return sorted_samples[len - 1];
    }

    let rank = (percentile / 100.0) * (len - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(len - 1);
    let frac = rank - lower as f64;

    let lower_val = sorted_samples[lower] as f64;
    let upper_val = sorted_samples[upper] as f64;
    (lower_val + frac * (upper_val - lower_val)) as u64
}

/// Drop samples outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`.
///
/// Preemptions and page faults show up as huge single samples; this keeps
/// them from dominating the mean.
pub fn filter_outliers(samples: &[u64]) -> Vec<u64> {
    if samples.len() < 4 {
        return samples.to_vec();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let q1 = calculate_percentile(&sorted, 25.0) as f64;
    let q3 = calculate_percentile(&sorted, 75.0) as f64;
    let iqr = q3 - q1;
    let (lower_fence, upper_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    samples
        .iter()
        .copied()
        .filter(|&x| {
            let xf = x as f64;
            xf >= lower_fence && xf <= upper_fence
        })
        .collect()
}
