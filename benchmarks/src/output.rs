//! Result records: console summary and JSON export.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use ssmp_core::{wtime, SsmpResult};

use crate::stats::Statistics;

/// One benchmark run as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub num_endpoints: u32,
    pub iterations: u64,
    /// Bytes moved per iteration (message or bulk payload)
    pub payload_bytes: usize,
    /// Nanosecond statistics per iteration
    pub statistics: Statistics,
    pub duration_secs: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl BenchmarkResult {
    pub fn new(name: &str, num_endpoints: u32, payload_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            num_endpoints,
            iterations: 0,
            payload_bytes,
            statistics: Statistics::default(),
            duration_secs: 0.0,
            timestamp: wtime(),
        }
    }

    pub fn ops_per_sec(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.iterations as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    pub fn mb_per_sec(&self) -> f64 {
        self.ops_per_sec() * self.payload_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn print_summary(&self) {
        let s = &self.statistics;
        println!("== {} ({} endpoints) ==", self.name, self.num_endpoints);
        println!(
            "  iterations: {}  duration: {:.3}s  rate: {:.0} ops/s",
            self.iterations,
            self.duration_secs,
            self.ops_per_sec()
        );
        if self.payload_bytes > 0 {
            println!("  throughput: {:.1} MiB/s", self.mb_per_sec());
        }
        if s.count > 0 {
            println!(
                "  ns: mean {:.1}  median {:.1}  std {:.1}  min {}  p90 {}  p99 {}  p99.9 {}  max {}",
                s.mean, s.median, s.std_dev, s.min, s.p90, s.p99, s.p999, s.max
            );
            println!("  outliers removed: {}", s.outliers_removed);
        }
    }
}

/// Write `result` as pretty JSON.
pub fn write_json_report<P: AsRef<Path>>(path: P, result: &BenchmarkResult) -> SsmpResult<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)
        .map_err(|e| ssmp_core::SsmpError::config(format!("JSON encoding failed: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    log::info!("report written to {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut result = BenchmarkResult::new("one2one", 2, 60);
        result.iterations = 1000;
        result.duration_secs = 0.5;
        result.statistics = Statistics::from_samples(&[100, 200, 300], false);
        write_json_report(&path, &result).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: BenchmarkResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.name, "one2one");
        assert_eq!(back.iterations, 1000);
        assert_eq!(back.statistics.count, 3);
        assert_eq!(back.statistics.max, 300);
    }

    #[test]
    fn rates_derive_from_duration() {
        let mut result = BenchmarkResult::new("big", 2, 1024 * 1024);
        result.iterations = 10;
        result.duration_secs = 2.0;
        assert_eq!(result.ops_per_sec(), 5.0);
        assert_eq!(result.mb_per_sec(), 5.0);

        result.duration_secs = 0.0;
        assert_eq!(result.ops_per_sec(), 0.0);
    }
}
