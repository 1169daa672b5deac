//! Wire types for the consensus harness.
//!
//! The consensus library itself is the external collaborator here;
//! these are the `AppData`/`AppDataResponse` payloads our state
//! machine carries through it. `ClientRequest` mirrors the raw HTTP
//! `/upsert` body verbatim — `appendEntries` serialises the request
//! into this shape and submits it to the consensus log without
//! reshaping it first.

use async_raft::{AppData, AppDataResponse, NodeId};
use hyperspace_core::IndexKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub id: u64,
    pub kind: IndexKind,
    pub payload: Value,
}

impl AppData for ClientRequest {}

/// The commit callback "returns `log_idx` as an 8-byte big-endian
/// reply buffer"; `CommitReply` is the typed equivalent before
/// it's framed onto the wire at the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitReply {
    pub log_idx: u64,
}

impl AppDataResponse for CommitReply {}

/// One entry of `getAllNodesInfo()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub endpoint: String,
    pub is_leader: bool,
}
