//! Proxy config file: `master_coordinator_url`, `http_server_address`,
//! `http_server_port`, plus the two topology refresh intervals
//! (defaults: 30s roster / 5min partitions).

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "HyperspaceDB proxy", long_about = None)]
pub struct Args {
    /// Path to the proxy's JSON config file.
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub instance_id: String,
    pub master_coordinator_url: String,
    pub http_server_address: String,
    pub http_server_port: u16,

    #[serde(default = "default_roster_refresh_secs")]
    pub roster_refresh_secs: u64,
    #[serde(default = "default_partition_refresh_secs")]
    pub partition_refresh_secs: u64,
}

fn default_roster_refresh_secs() -> u64 {
    30
}

fn default_partition_refresh_secs() -> u64 {
    300
}

impl ProxyConfig {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_server_address, self.http_server_port)
    }
}
