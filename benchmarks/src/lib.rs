//! # SSMP Benchmark Suite
//!
//! Client programs that drive the messaging API across forked processes.
//!
//! - **one2one**: round-trip latency between two endpoints
//! - **one2one_big**: chunked bulk transfer throughput
//! - **barrier_test**: random barrier crossings announced by broadcast
//! - **client_server**: one server polling a color registry of clients
//!
//! Every program creates the region in the parent, forks one process per
//! endpoint, pins it to its core and reaps the children at the end.

pub mod launch;
pub mod output;
pub mod stats;
pub mod timing;

use clap::Args;
use ssmp_core::config::parse_core_map;
use ssmp_core::{SsmpConfig, SsmpResult, SyncMode};

pub use launch::launch;
pub use output::{write_json_report, BenchmarkResult};
pub use stats::{calculate_percentile, filter_outliers, mean, median, std_dev, Statistics};
pub use timing::TickCalibration;

/// Options every benchmark program accepts
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Shared-memory object name
    #[arg(long, default_value = ssmp_core::DEFAULT_SHM_NAME)]
    pub shm_name: String,

    /// Endpoint -> core list, e.g. "0,2,4-7" (identity when omitted)
    #[arg(long)]
    pub cores: Option<String>,

    /// Mailbox synchronization: auto, plain or locked
    #[arg(long, default_value = "auto")]
    pub sync: SyncMode,

    /// Write the result as JSON to this path
    #[arg(long)]
    pub json: Option<String>,
}

impl CommonArgs {
    /// Environment first, then command-line overrides.
    pub fn to_config(&self) -> SsmpResult<SsmpConfig> {
        let mut config = SsmpConfig::from_env()?;
        config.shm_name = self.shm_name.clone();
        config.sync_strategy = self.sync;
        if let Some(cores) = &self.cores {
            config.core_map = parse_core_map(cores)?;
        }
        Ok(config)
    }
}

/// Install `env_logger` with `info` as the default level.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn cli_overrides_reach_the_config() {
        let cli = Cli::parse_from(["bench", "--shm-name", "/bench_x", "--cores", "2-3", "--sync", "locked"]);
        let config = cli.common.to_config().unwrap();
        assert_eq!(config.shm_name, "/bench_x");
        assert_eq!(config.core_map, vec![2, 3]);
        assert_eq!(config.sync_strategy, SyncMode::Locked);
    }

    #[test]
    fn defaults_leave_identity_mapping() {
        let cli = Cli::parse_from(["bench"]);
        assert_eq!(cli.common.sync, SyncMode::Auto);
        assert!(cli.common.cores.is_none());
        assert!(cli.common.json.is_none());
    }
}
