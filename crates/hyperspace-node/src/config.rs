//! Storage-node config file: the binary takes one positional argument,
//! a config file path, plus a `--fresh` override.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use hyperspace_core::{DistanceMetric, IndexKind};
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "HyperspaceDB storage node", long_about = None)]
pub struct Args {
    /// Path to the node's JSON config file.
    pub config_path: PathBuf,

    /// Wipe the scalar KV on startup instead of opening the existing
    /// one. The safe default is to open the existing store.
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub db_path: PathBuf,
    pub wal_path: PathBuf,
    pub node_id: u64,
    pub endpoint: String,
    pub port: u16,
    pub http_server_address: String,
    pub http_server_port: u16,

    pub dim: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_index_kinds")]
    pub index_kinds: Vec<String>,

    #[serde(default)]
    pub fresh_start: bool,
    #[serde(default = "default_true")]
    pub flush_on_write: bool,

    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_m")]
    pub m: usize,

    /// Other nodes in the cluster, known at boot (`node_id -> http
    /// endpoint`); membership changes after boot go through
    /// `/admin/addFollower`.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub node_id: u64,
    pub endpoint: String,
}

fn default_metric() -> String {
    "l2".to_string()
}

fn default_index_kinds() -> Vec<String> {
    vec!["FLAT".to_string(), "HNSW".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_ef_search() -> usize {
    100
}

fn default_ef_construction() -> usize {
    200
}

fn default_m() -> usize {
    16
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        let cfg: NodeConfig = serde_json::from_str(&text)?;
        Ok(cfg)
    }

    pub fn metric(&self) -> DistanceMetric {
        match self.metric.to_lowercase().as_str() {
            "inner_product" | "ip" | "dot" => DistanceMetric::InnerProduct,
            _ => DistanceMetric::L2,
        }
    }

    pub fn index_kinds(&self) -> Vec<IndexKind> {
        let mut kinds: Vec<IndexKind> = self
            .index_kinds
            .iter()
            .filter_map(|s| IndexKind::from_request_str(s))
            .collect();
        kinds.push(IndexKind::Filter);
        kinds
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_server_address, self.http_server_port)
    }
}
