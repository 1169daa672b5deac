//! `RaftNetwork` implementation: transports vote / append-entries
//! / install-snapshot RPCs to peers over plain HTTP, the same
//! transport the rest of this node speaks. Peers are looked up in a
//! shared, mutable registry so `addServer` (membership changes) can
//! grow it at runtime without restarting the harness.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_raft::network::RaftNetwork;
use async_raft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use async_raft::NodeId;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::types::ClientRequest;

#[derive(Default)]
pub struct NodeRegistry {
    endpoints: RwLock<HashMap<NodeId, String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node_id: NodeId, endpoint: String) {
        self.endpoints.write().insert(node_id, endpoint);
    }

    pub fn get(&self, node_id: NodeId) -> Option<String> {
        self.endpoints.read().get(&node_id).cloned()
    }

    pub fn all(&self) -> Vec<(NodeId, String)> {
        self.endpoints
            .read()
            .iter()
            .map(|(id, ep)| (*id, ep.clone()))
            .collect()
    }
}

pub struct RaftNetworkImpl {
    registry: Arc<NodeRegistry>,
    client: reqwest::Client,
}

impl RaftNetworkImpl {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, target: NodeId) -> Result<String> {
        self.registry
            .get(target)
            .ok_or_else(|| anyhow!("no known endpoint for node {target}"))
    }
}

#[async_trait]
impl RaftNetwork<ClientRequest> for RaftNetworkImpl {
    async fn append_entries(
        &self,
        target: NodeId,
        rpc: AppendEntriesRequest<ClientRequest>,
    ) -> Result<AppendEntriesResponse> {
        let url = format!("{}/raft/append-entries", self.endpoint(target)?);
        let resp = self.client.post(url).json(&rpc).send().await?;
        Ok(resp.json().await?)
    }

    async fn install_snapshot(
        &self,
        target: NodeId,
        rpc: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        let url = format!("{}/raft/install-snapshot", self.endpoint(target)?);
        let resp = self.client.post(url).json(&rpc).send().await?;
        Ok(resp.json().await?)
    }

    async fn vote(&self, target: NodeId, rpc: VoteRequest) -> Result<VoteResponse> {
        let url = format!("{}/raft/vote", self.endpoint(target)?);
        let resp = self.client.post(url).json(&rpc).send().await?;
        Ok(resp.json().await?)
    }
}
