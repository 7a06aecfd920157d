//! Run configuration for an SSMP region
//!
//! Every field has a default, so an empty file (or no file at all) gives the
//! stock layout: region `/ssmp_mem`, endpoint `i` on core `i`, sync strategy
//! picked per peer from the NUMA topology.
use crate::error::{SsmpError, SsmpResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the POSIX shared-memory object when none is configured
pub const DEFAULT_SHM_NAME: &str = "/ssmp_mem";

/// Cycles to back off between cross-socket CAS attempts
pub const CROSS_SOCKET_WAIT_CYCLES: u64 = 66;

/// How long an attacher waits for the creator to publish the region
pub const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 10_000;

/// Environment override for [`SsmpConfig::shm_name`]
pub const ENV_SHM_NAME: &str = "SSMP_SHM_NAME";
/// Environment override for [`SsmpConfig::core_map`] (comma-separated core ids)
pub const ENV_CORE_MAP: &str = "SSMP_CORE_MAP";
/// Environment override for [`SsmpConfig::sync_strategy`]
pub const ENV_SYNC: &str = "SSMP_SYNC";

/// Which mailbox synchronization to use between a pair of endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Plain spin-read within a NUMA node, CAS through `LOCKED` across nodes
    #[default]
    Auto,
    /// Plain spin-read for every pair
    Plain,
    /// CAS through `LOCKED` for every pair
    Locked,
}

impl std::str::FromStr for SyncMode {
    type Err = SsmpError;

    fn from_str(s: &str) -> SsmpResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "plain" => Ok(SyncMode::Plain),
            "locked" => Ok(SyncMode::Locked),
            other => Err(SsmpError::config(format!(
                "unknown sync strategy '{}' (expected auto, plain or locked)",
                other
            ))),
        }
    }
}

/// Configuration shared by every endpoint of one run.
///
/// All processes of a run must agree on `shm_name`; the rest only affects the
/// local view (pinning, sync choice, attach patience).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsmpConfig {
    /// POSIX shared-memory object name, leading slash included
    pub shm_name: String,

    /// Endpoint id -> physical core. Empty means identity.
    pub core_map: Vec<usize>,

    pub sync_strategy: SyncMode,

    /// Back-off between CAS attempts on the locked path
    pub cross_socket_wait_cycles: u64,

    /// Bound on waiting for the creator to publish the region
    pub attach_timeout_ms: u64,
}

impl Default for SsmpConfig {
    fn default() -> Self {
        Self {
            shm_name: DEFAULT_SHM_NAME.to_string(),
            core_map: Vec::new(),
            sync_strategy: SyncMode::Auto,
            cross_socket_wait_cycles: CROSS_SOCKET_WAIT_CYCLES,
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
        }
    }
}

impl SsmpConfig {
    /// Default configuration with a different region name.
    pub fn with_shm_name<S: Into<String>>(name: S) -> Self {
        Self {
            shm_name: name.into(),
            ..Self::default()
        }
    }

    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> SsmpResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SsmpError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str());
        match extension {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents)),
        }
    }

    /// Parse config from TOML string
    pub fn from_toml(contents: &str) -> SsmpResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Parse config from YAML string
    pub fn from_yaml(contents: &str) -> SsmpResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply `SSMP_SHM_NAME`, `SSMP_CORE_MAP` and `SSMP_SYNC` from the process environment.
    pub fn apply_env(self) -> SsmpResult<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> SsmpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_SHM_NAME) {
            self.shm_name = name;
        }
        if let Some(map) = lookup(ENV_CORE_MAP) {
            self.core_map = parse_core_map(&map)?;
        }
        if let Some(sync) = lookup(ENV_SYNC) {
            self.sync_strategy = sync.parse()?;
        }
        Ok(self)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> SsmpResult<Self> {
        Self::default().apply_env()
    }

    /// Check the configuration can describe a run of `num_endpoints` endpoints.
    pub fn validate(&self, num_endpoints: u32) -> SsmpResult<()> {
        if num_endpoints == 0 {
            return Err(SsmpError::invalid_input("endpoint count must be at least 1"));
        }
        if !self.shm_name.starts_with('/') || self.shm_name.len() < 2 {
            return Err(SsmpError::config(format!(
                "shm_name '{}' must start with '/' and name an object",
                self.shm_name
            )));
        }
        if self.shm_name[1..].contains('/') {
            return Err(SsmpError::config(format!(
                "shm_name '{}' may not contain a second '/'",
                self.shm_name
            )));
        }
        // NAME_MAX on Linux, leading slash excluded
        if self.shm_name.len() > 255 {
            return Err(SsmpError::config("shm_name longer than 255 bytes"));
        }
        if !self.core_map.is_empty() && self.core_map.len() < num_endpoints as usize {
            return Err(SsmpError::config(format!(
                "core_map lists {} cores for {} endpoints",
                self.core_map.len(),
                num_endpoints
            )));
        }
        Ok(())
    }

    /// Physical core for `endpoint`.
    pub fn core_for(&self, endpoint: u32) -> usize {
        self.core_map
            .get(endpoint as usize)
            .copied()
            .unwrap_or(endpoint as usize)
    }
}

/// Parse `"0,2,4-7"` into a core list.
pub fn parse_core_map(s: &str) -> SsmpResult<Vec<usize>> {
    let mut cores = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse()?;
                let hi: usize = hi.trim().parse()?;
                if hi < lo {
                    return Err(SsmpError::config(format!("descending core range '{}'", part)));
                }
                cores.extend(lo..=hi);
            }
            None => cores.push(part.parse()?),
        }
    }
    Ok(cores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_stock_layout() {
        let config = SsmpConfig::default();
        assert_eq!(config.shm_name, "/ssmp_mem");
        assert_eq!(config.cross_socket_wait_cycles, 66);
        assert_eq!(config.sync_strategy, SyncMode::Auto);
        assert_eq!(config.core_for(5), 5);
    }

    #[test]
    fn parse_toml() {
        let config = SsmpConfig::from_toml(
            r#"
            shm_name = "/bench"
            core_map = [0, 2, 4, 6]
            sync_strategy = "locked"
            "#,
        )
        .unwrap();
        assert_eq!(config.shm_name, "/bench");
        assert_eq!(config.core_for(2), 4);
        assert_eq!(config.sync_strategy, SyncMode::Locked);
        assert_eq!(config.attach_timeout_ms, DEFAULT_ATTACH_TIMEOUT_MS);
    }

    #[test]
    fn parse_yaml() {
        let config = SsmpConfig::from_yaml(
            r#"
            shm_name: /bench
            sync_strategy: plain
            attach_timeout_ms: 500
            "#,
        )
        .unwrap();
        assert_eq!(config.sync_strategy, SyncMode::Plain);
        assert_eq!(config.attach_timeout_ms, 500);
        assert!(config.core_map.is_empty());
    }

    #[test]
    fn from_file_detects_format() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "shm_name: /from_yaml").unwrap();
        assert_eq!(SsmpConfig::from_file(yaml.path()).unwrap().shm_name, "/from_yaml");

        let mut toml = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(toml, "shm_name = \"/from_toml\"").unwrap();
        assert_eq!(SsmpConfig::from_file(toml.path()).unwrap().shm_name, "/from_toml");

        let mut bare = tempfile::NamedTempFile::new().unwrap();
        writeln!(bare, "shm_name: /guessed").unwrap();
        assert_eq!(SsmpConfig::from_file(bare.path()).unwrap().shm_name, "/guessed");
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_SHM_NAME, "/env_region"),
            (ENV_CORE_MAP, "3,1-2"),
            (ENV_SYNC, "Locked"),
        ]
        .into_iter()
        .collect();
        let config = SsmpConfig::default()
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.shm_name, "/env_region");
        assert_eq!(config.core_map, vec![3, 1, 2]);
        assert_eq!(config.sync_strategy, SyncMode::Locked);
    }

    #[test]
    fn bad_sync_strategy_is_config_error() {
        let err = SsmpConfig::default()
            .apply_vars(|k| (k == ENV_SYNC).then(|| "sometimes".to_string()))
            .unwrap_err();
        assert!(matches!(err, SsmpError::Config(_)));
    }

    #[test]
    fn core_map_parsing() {
        assert_eq!(parse_core_map("0, 4-6 ,9").unwrap(), vec![0, 4, 5, 6, 9]);
        assert!(parse_core_map("").unwrap().is_empty());
        assert!(parse_core_map("5-3").is_err());
        assert!(parse_core_map("x").is_err());
    }

    #[test]
    fn validate_rejects_bad_names_and_short_maps() {
        assert!(SsmpConfig::default().validate(4).is_ok());
        assert!(SsmpConfig::default().validate(0).is_err());
        assert!(SsmpConfig::with_shm_name("no_slash").validate(2).is_err());
        assert!(SsmpConfig::with_shm_name("/a/b").validate(2).is_err());
        assert!(SsmpConfig::with_shm_name("/").validate(2).is_err());

        let config = SsmpConfig {
            core_map: vec![0, 1],
            ..SsmpConfig::default()
        };
        assert!(config.validate(2).is_ok());
        assert!(config.validate(3).is_err());
    }
}
