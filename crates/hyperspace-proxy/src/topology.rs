//! Topology cache: double-buffered roster + partition map, refreshed
//! by background timers from the Master Coordinator.
//!
//! "Double-buffered" here means readers always see a complete,
//! internally-consistent `Topology` snapshot: the refresh loop builds
//! a brand new `Arc<Topology>` off to the side and only then swaps the
//! shared pointer, so a request never observes a roster from one tick
//! paired with a partition map from another, and readers never block
//! on a refresh in progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator_client::CoordinatorClient;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeRole {
    #[serde(rename = "master")]
    Master,
    #[serde(rename = "backup")]
    Backup,
}

impl NodeRole {
    pub fn from_wire(role: u8) -> Self {
        if role == 1 {
            NodeRole::Master
        } else {
            NodeRole::Backup
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node_id: u64,
    pub url: String,
    pub role: NodeRole,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    /// Filtered to `status == "active"` on ingest.
    pub nodes: Vec<NodeEntry>,
}

impl Roster {
    pub fn nodes_in_partition<'a>(&'a self, node_ids: &'a [u64]) -> impl Iterator<Item = &'a NodeEntry> + 'a {
        self.nodes.iter().filter(move |n| node_ids.contains(&n.node_id))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub partition_key: String,
    pub number_of_partitions: u32,
    pub partitions: HashMap<u32, Vec<u64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    pub roster: Roster,
    pub partitions: PartitionConfig,
}

pub struct TopologyCache {
    active: RwLock<Arc<Topology>>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Arc::new(Topology::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<Topology> {
        self.active.read().clone()
    }

    fn publish(&self, topology: Topology) {
        *self.active.write() = Arc::new(topology);
    }

    /// Publishes a topology snapshot outside the refresh loop, used
    /// once at startup to populate the cache before serving traffic.
    pub fn publish_initial(&self, topology: Topology) {
        self.publish(topology);
    }

    /// Spawns the two independent background refresh timers (30s
    /// roster / 5min partitions by default, both overridable).
    pub fn spawn_refresh_tasks(
        self: Arc<Self>,
        client: Arc<CoordinatorClient>,
        roster_interval: Duration,
        partition_interval: Duration,
    ) {
        let cache = self.clone();
        let roster_client = client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(roster_interval);
            loop {
                ticker.tick().await;
                match roster_client.get_instance().await {
                    Ok(nodes) => {
                        let mut current = (*cache.snapshot()).clone();
                        current.roster = nodes;
                        cache.publish(current);
                        info!("roster refreshed");
                    }
                    Err(e) => warn!(error = %e, "roster refresh failed"),
                }
            }
        });

        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(partition_interval);
            loop {
                ticker.tick().await;
                match client.get_partition_config().await {
                    Ok(partitions) => {
                        let mut current = (*cache.snapshot()).clone();
                        current.partitions = partitions;
                        cache.publish(current);
                        info!("partition config refreshed");
                    }
                    Err(e) => warn!(error = %e, "partition config refresh failed"),
                }
            }
        });
    }
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new()
    }
}
