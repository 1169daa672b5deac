//! Routing logic: partition-key hashing, master/round-robin node
//! selection. Kept as pure functions over a `Topology` snapshot so
//! they're unit-testable without a running HTTP server or a real
//! Master Coordinator.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::topology::{NodeEntry, NodeRole, Topology};

/// A stable hash: `std::collections::hash_map::DefaultHasher` is
/// SipHash seeded with fixed keys (not `RandomState`'s per-process
/// random seed), so the same value hashes to the same partition on
/// every node and across restarts, which routing requires.
pub fn stable_hash(value: &Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical_string(value).hash(&mut hasher);
    hasher.finish()
}

fn canonical_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn partition_id_for(value: &Value, number_of_partitions: u32) -> u32 {
    if number_of_partitions == 0 {
        return 0;
    }
    (stable_hash(value) % u64::from(number_of_partitions)) as u32
}

/// Round-robin counter shared across requests on one proxy process,
/// used to spread reads across the available nodes in a partition.
#[derive(Default)]
pub struct RoundRobin(AtomicU64);

impl RoundRobin {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Selects the target node for a partition. Writes (`/upsert`) and
/// any request with `forceMaster=true` must land on a master;
/// everything else round-robins across the partition's available
/// nodes.
pub fn select_target_node<'a>(
    topology: &'a Topology,
    partition_id: u32,
    is_write: bool,
    force_master: bool,
    round_robin: &RoundRobin,
) -> Option<&'a NodeEntry> {
    let node_ids = topology.partitions.partitions.get(&partition_id)?;
    let candidates: Vec<&NodeEntry> = topology.roster.nodes_in_partition(node_ids).collect();
    if candidates.is_empty() {
        return None;
    }

    if is_write || force_master {
        return candidates.into_iter().find(|n| n.role == NodeRole::Master);
    }

    let idx = (round_robin.next() as usize) % candidates.len();
    Some(candidates[idx])
}

/// All distinct partition ids currently configured, used for
/// broadcast fan-out.
pub fn all_partition_ids(topology: &Topology) -> Vec<u32> {
    let mut ids: Vec<u32> = topology.partitions.partitions.keys().copied().collect();
    ids.sort_unstable();
    ids
}
