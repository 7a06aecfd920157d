//! Endpoint placement: which core each endpoint runs on, which NUMA node that
//! core belongs to, and therefore which mailbox synchronization each pair uses.

use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

use crate::config::{parse_core_map, SsmpConfig, SyncMode};
use crate::error::{SsmpError, SsmpResult};
use crate::mailbox::SyncStrategy;
use crate::platform::online_cpus;
use crate::EndpointId;

#[cfg(target_os = "linux")]
const NODE_DIR: &str = "/sys/devices/system/node";

/// Immutable endpoint -> core -> node table for one run.
#[derive(Debug, Clone)]
pub struct Topology {
    cores: Vec<usize>,
    nodes: Vec<Option<u32>>,
    sync_mode: SyncMode,
}

impl Topology {
    /// Build the table for `num_endpoints` endpoints from `config` and sysfs.
    pub fn detect(num_endpoints: u32, config: &SsmpConfig) -> SsmpResult<Self> {
        config.validate(num_endpoints)?;

        let available = online_cpus();
        let cores: Vec<usize> = (0..num_endpoints).map(|id| config.core_for(id)).collect();
        for (endpoint, &core) in cores.iter().enumerate() {
            if core >= available {
                return Err(SsmpError::InsufficientCores {
                    endpoint: endpoint as u32,
                    core,
                    available,
                });
            }
        }

        let topology = Self::from_parts(cores, &read_core_nodes(), config.sync_strategy);
        log::debug!(
            "topology: {} endpoints over {} NUMA node(s), sync {:?}",
            num_endpoints,
            topology.node_count(),
            topology.sync_mode
        );
        Ok(topology)
    }

    /// Assemble a table from an explicit core list and core -> node map.
    pub fn from_parts(
        cores: Vec<usize>,
        core_nodes: &HashMap<usize, u32>,
        sync_mode: SyncMode,
    ) -> Self {
        let nodes = cores.iter().map(|c| core_nodes.get(c).copied()).collect();
        Self {
            cores,
            nodes,
            sync_mode,
        }
    }

    pub fn num_endpoints(&self) -> u32 {
        self.cores.len() as u32
    }

    pub fn core_of(&self, id: EndpointId) -> usize {
        self.cores[id.index()]
    }

    /// NUMA node of the endpoint's core, `None` when the OS does not say.
    pub fn node_of(&self, id: EndpointId) -> Option<u32> {
        self.nodes[id.index()]
    }

    /// Distinct known nodes in use (at least 1).
    pub fn node_count(&self) -> usize {
        let mut seen: Vec<u32> = self.nodes.iter().flatten().copied().collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len().max(1)
    }

    /// Whether two endpoints share a cache-coherence domain.
    ///
    /// Unknown placement counts as shared.
    pub fn same_domain(&self, a: EndpointId, b: EndpointId) -> bool {
        match (self.node_of(a), self.node_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        }
    }

    /// Mailbox synchronization for traffic between `a` and `b`.
    pub fn strategy(&self, a: EndpointId, b: EndpointId) -> SyncStrategy {
        match self.sync_mode {
            SyncMode::Plain => SyncStrategy::Plain,
            SyncMode::Locked => SyncStrategy::Locked,
            SyncMode::Auto if self.same_domain(a, b) => SyncStrategy::Plain,
            SyncMode::Auto => SyncStrategy::Locked,
        }
    }
}

/// core -> NUMA node, read from `/sys/devices/system/node/node*/cpulist`.
#[cfg(target_os = "linux")]
fn read_core_nodes() -> HashMap<usize, u32> {
    read_core_nodes_from(Path::new(NODE_DIR))
}

#[cfg(not(target_os = "linux"))]
fn read_core_nodes() -> HashMap<usize, u32> {
    HashMap::new()
}

#[cfg(target_os = "linux")]
fn read_core_nodes_from(dir: &Path) -> HashMap<usize, u32> {
    let mut map = HashMap::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return map,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let node = match name
            .to_str()
            .and_then(|s| s.strip_prefix("node"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            Some(node) => node,
            None => continue,
        };
        let list = match fs::read_to_string(entry.path().join("cpulist")) {
            Ok(list) => list,
            Err(_) => continue,
        };
        match parse_core_map(&list) {
            Ok(cores) => {
                for core in cores {
                    map.insert(core, node);
                }
            }
            Err(e) => log::warn!("ignoring unreadable cpulist for node {}: {}", node, e),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_socket() -> HashMap<usize, u32> {
        (0..8).map(|c| (c, (c / 4) as u32)).collect()
    }

    #[test]
    fn auto_picks_locked_across_nodes() {
        let topo = Topology::from_parts(vec![0, 1, 4, 5], &two_socket(), SyncMode::Auto);
        let (a, b, c) = (EndpointId::new(0), EndpointId::new(1), EndpointId::new(2));
        assert!(topo.same_domain(a, b));
        assert!(!topo.same_domain(a, c));
        assert_eq!(topo.strategy(a, b), SyncStrategy::Plain);
        assert_eq!(topo.strategy(a, c), SyncStrategy::Locked);
        assert_eq!(topo.node_count(), 2);
        assert_eq!(topo.core_of(c), 4);
    }

    #[test]
    fn forced_modes_ignore_placement() {
        let plain = Topology::from_parts(vec![0, 4], &two_socket(), SyncMode::Plain);
        let locked = Topology::from_parts(vec![0, 1], &two_socket(), SyncMode::Locked);
        let (a, b) = (EndpointId::new(0), EndpointId::new(1));
        assert_eq!(plain.strategy(a, b), SyncStrategy::Plain);
        assert_eq!(locked.strategy(a, b), SyncStrategy::Locked);
    }

    #[test]
    fn unknown_nodes_count_as_same_domain() {
        let topo = Topology::from_parts(vec![0, 100], &two_socket(), SyncMode::Auto);
        assert_eq!(topo.node_of(EndpointId::new(1)), None);
        assert!(topo.same_domain(EndpointId::new(0), EndpointId::new(1)));
    }

    #[test]
    fn detect_rejects_missing_cores() {
        let config = SsmpConfig {
            core_map: vec![0, online_cpus() + 3],
            ..SsmpConfig::default()
        };
        match Topology::detect(2, &config) {
            Err(SsmpError::InsufficientCores { endpoint, .. }) => assert_eq!(endpoint, 1),
            other => panic!("expected InsufficientCores, got {:?}", other),
        }
    }

    #[test]
    fn detect_accepts_shared_core() {
        let config = SsmpConfig {
            core_map: vec![0; 6],
            ..SsmpConfig::default()
        };
        let topo = Topology::detect(6, &config).unwrap();
        assert_eq!(topo.num_endpoints(), 6);
        assert!(topo.same_domain(EndpointId::new(0), EndpointId::new(5)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_fake_sysfs_tree() {
        let dir = tempfile::tempdir().unwrap();
        for (node, list) in [(0, "0-1\n"), (1, "2,3\n")] {
            let path = dir.path().join(format!("node{}", node));
            fs::create_dir(&path).unwrap();
            fs::write(path.join("cpulist"), list).unwrap();
        }
        fs::create_dir(dir.path().join("power")).unwrap();

        let map = read_core_nodes_from(dir.path());
        assert_eq!(map.get(&1), Some(&0));
        assert_eq!(map.get(&3), Some(&1));
        assert_eq!(map.len(), 4);
    }
}
