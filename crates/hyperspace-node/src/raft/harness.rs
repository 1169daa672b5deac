//! `RaftHarness`: consensus lifecycle, membership, leader check.
//! Wraps the black-box consensus library behind a small surface —
//! `init`, `isLeader`, `getAllNodesInfo`, `getCurrentNodeInfo`,
//! `addServer`, `appendEntries` — so the HTTP layer never touches
//! `async_raft` types directly.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_raft::config::Config;
use async_raft::raft::ClientWriteRequest;
use async_raft::{NodeId, Raft};
use hyperspace_core::CoreError;
use tracing::{info, warn};

use super::network::{NodeRegistry, RaftNetworkImpl};
use super::storage::{normal_entry, RaftStorageImpl};
use super::types::{ClientRequest, CommitReply, NodeInfo};
use crate::vector_database::VectorDatabase;

/// 200-400ms election timeout, 100ms heartbeat, 3000ms client request
/// timeout, snapshot block size 5, blocking append-entries return mode
/// (the blocking mode is the default of `client_write` itself — there
/// is no separate non-blocking entrypoint exposed).
pub struct RaftParams {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
    pub client_req_timeout_ms: u64,
}

impl Default for RaftParams {
    fn default() -> Self {
        Self {
            election_timeout_min: 200,
            election_timeout_max: 400,
            heartbeat_interval: 100,
            client_req_timeout_ms: 3000,
        }
    }
}

type RaftImpl = Raft<ClientRequest, CommitReply, RaftNetworkImpl, RaftStorageImpl>;

pub struct RaftHarness {
    node_id: NodeId,
    endpoint: String,
    raft: RaftImpl,
    registry: Arc<NodeRegistry>,
    client_req_timeout_ms: u64,
}

impl RaftHarness {
    /// `init(node_id, endpoint, port, vector_db)`: construct the log
    /// state machine and in-memory state-mgr, pass harness params,
    /// launch.
    pub async fn init(
        node_id: NodeId,
        endpoint: String,
        raft_log_path: PathBuf,
        vector_db: Arc<VectorDatabase>,
        peers: &[(NodeId, String)],
        params: RaftParams,
    ) -> Result<Self, CoreError> {
        let registry = Arc::new(NodeRegistry::new());
        registry.insert(node_id, endpoint.clone());
        for (id, ep) in peers {
            registry.insert(*id, ep.clone());
        }

        let config = Config::build("hyperspace-raft".into())
            .election_timeout_min(params.election_timeout_min)
            .election_timeout_max(params.election_timeout_max)
            .heartbeat_interval(params.heartbeat_interval)
            .validate()
            .map_err(|e| CoreError::FatalInit(e.to_string()))?;

        let network = Arc::new(RaftNetworkImpl::new(registry.clone()));
        let storage = Arc::new(
            RaftStorageImpl::new(node_id, raft_log_path, vector_db)
                .map_err(|e| CoreError::FatalInit(e.to_string()))?,
        );

        let raft = Raft::new(node_id, Arc::new(config), network, storage);

        let mut members: HashSet<NodeId> = peers.iter().map(|(id, _)| *id).collect();
        members.insert(node_id);
        if let Err(e) = raft.initialize(members).await {
            // Already-initialized is expected on every restart after the
            // first; anything else is worth a warning since it means
            // this node can never win an election.
            warn!(error = %e, "raft.initialize (already-initialized is normal on restart)");
        }

        info!(node_id, %endpoint, "raft harness started");
        Ok(Self {
            node_id,
            endpoint,
            raft,
            registry,
            client_req_timeout_ms: params.client_req_timeout_ms,
        })
    }

    pub fn raft(&self) -> &RaftImpl {
        &self.raft
    }

    /// `isLeader()`.
    pub async fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    /// `getCurrentNodeInfo()`.
    pub async fn get_current_node_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id,
            endpoint: self.endpoint.clone(),
            is_leader: self.is_leader().await,
        }
    }

    /// `getAllNodesInfo()`.
    pub async fn get_all_nodes_info(&self) -> Vec<NodeInfo> {
        let leader = self.raft.metrics().borrow().current_leader;
        self.registry
            .all()
            .into_iter()
            .map(|(node_id, endpoint)| NodeInfo {
                is_leader: leader == Some(node_id),
                node_id,
                endpoint,
            })
            .collect()
    }

    /// `addServer(id, endpoint)`: leader-only membership change.
    pub async fn add_server(&self, node_id: NodeId, endpoint: String) -> Result<(), CoreError> {
        if !self.is_leader().await {
            return Err(CoreError::NotLeader);
        }
        self.registry.insert(node_id, endpoint);
        self.raft
            .add_non_voter(node_id)
            .await
            .map_err(|e| CoreError::BadRequest(e.to_string()))?;
        let mut members: HashSet<NodeId> = self.registry.all().into_iter().map(|(id, _)| id).collect();
        members.insert(self.node_id);
        self.raft
            .change_membership(members)
            .await
            .map_err(|e| CoreError::BadRequest(e.to_string()))?;
        Ok(())
    }

    /// `appendEntries(raw_request_bytes)`: leader-only. Submits the
    /// decoded `/upsert` body to the consensus log and resolves once
    /// it commits (blocking return mode).
    pub async fn append_entries(&self, request: ClientRequest) -> Result<CommitReply, CoreError> {
        if !self.is_leader().await {
            return Err(CoreError::NotLeader);
        }
        let write = ClientWriteRequest::new(normal_entry(request));
        let timeout = std::time::Duration::from_millis(self.client_req_timeout_ms);
        match tokio::time::timeout(timeout, self.raft.client_write(write)).await {
            Ok(Ok(resp)) => Ok(resp.data),
            Ok(Err(e)) => Err(CoreError::UpstreamFail(e.to_string())),
            Err(_) => Err(CoreError::UpstreamFail("client request timed out".to_string())),
        }
    }
}
