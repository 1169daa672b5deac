//! HTTP server: request decoding, validation, dispatch, and the
//! canonical `{retCode, ...}` response envelope.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hyperspace_core::{CoreError, FilterExpr, IndexKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::raft::{ClientRequest, RaftHarness};
use crate::vector_database::{SearchRequest, VectorDatabase};

pub struct AppState {
    pub vector_db: Arc<VectorDatabase>,
    pub raft: Arc<RaftHarness>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/insert", post(upsert))
        .route("/upsert", post(upsert))
        .route("/query", post(query))
        .route("/admin/snapshot", post(admin_snapshot))
        .route("/admin/setLeader", post(admin_set_leader))
        .route("/admin/addFollower", post(admin_add_follower))
        .route("/admin/listNode", get(admin_list_node))
        .route("/admin/getNode", get(admin_get_node))
        .route("/raft/vote", post(raft_vote))
        .route("/raft/append-entries", post(raft_append_entries))
        .route("/raft/install-snapshot", post(raft_install_snapshot))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{retCode, ...}` response envelope. `retCode` is `0` on
/// success, `-1` on error.
#[derive(Debug, Serialize, Default)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "errorMsg", skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vectors: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distances: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<Vec<crate::raft::NodeInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<crate::raft::NodeInfo>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    record: Option<Map<String, Value>>,
}

fn ok() -> Envelope {
    Envelope { ret_code: 0, ..Default::default() }
}

fn http_error(err: CoreError) -> Response {
    error!(error = %err, "request failed");
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Envelope {
        ret_code: -1,
        error_msg: Some(err.to_string()),
        ..Default::default()
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    vectors: Vec<f32>,
    k: usize,
    #[serde(rename = "indexType", default = "default_index_type")]
    index_type: String,
    filter: Option<FilterExpr>,
}

fn default_index_type() -> String {
    "FLAT".to_string()
}

async fn search(State(state): State<Arc<AppState>>, Json(body): Json<SearchBody>) -> Response {
    let Some(kind) = IndexKind::from_request_str(&body.index_type) else {
        return http_error(CoreError::BadRequest(format!("unknown indexType {}", body.index_type)));
    };
    let request = SearchRequest {
        vector: body.vectors,
        k: body.k,
        kind,
        filter: body.filter,
    };
    match state.vector_db.search(&request) {
        Ok(resp) => {
            let (ids, distances) = strip_padding(resp.ids, resp.distances);
            if ids.is_empty() {
                return (StatusCode::OK, Json(ok())).into_response();
            }
            let body = Envelope {
                vectors: Some(ids),
                distances: Some(distances),
                ..ok()
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => http_error(e),
    }
}

/// `-1` in the id slot is the index's internal "no result" padding when
/// fewer than `k` candidates exist; strip it before it reaches a client
/// (§4.2 — no spec scenario ever shows a `-1` in a response).
fn strip_padding(ids: Vec<i64>, distances: Vec<f32>) -> (Vec<i64>, Vec<f32>) {
    ids.into_iter()
        .zip(distances)
        .filter(|(id, _)| *id != -1)
        .unzip()
}

#[derive(Debug, Deserialize)]
struct UpsertBody {
    id: u64,
    #[serde(rename = "indexType", default = "default_index_type")]
    index_type: String,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// `/upsert` and `/insert` share the write path (validation
/// table lists them with identical required fields; the prose
/// description only narrates `/upsert`'s semantics, so `/insert` is
/// treated as an alias — see DESIGN.md).
async fn upsert(State(state): State<Arc<AppState>>, Json(body): Json<UpsertBody>) -> Response {
    let Some(kind) = IndexKind::from_request_str(&body.index_type) else {
        return http_error(CoreError::BadRequest(format!("unknown indexType {}", body.index_type)));
    };
    if !body.rest.contains_key("vectors") {
        return http_error(CoreError::BadRequest("missing required field: vectors".to_string()));
    }

    let mut payload = body.rest;
    payload.insert("id".to_string(), Value::from(body.id));
    // Persisted so the WAL/consensus log records which index kind this
    // upsert targeted — `reload_database`'s replay recovers it from
    // here rather than assuming FLAT (§4.2/§4.6, (I2)/(P3)).
    payload.insert("indexType".to_string(), Value::from(kind.as_wire_str()));

    let req = ClientRequest { id: body.id, kind, payload: Value::Object(payload) };
    match state.raft.append_entries(req).await {
        Ok(_) => (StatusCode::OK, Json(ok())).into_response(),
        Err(e) => http_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    id: u64,
}

async fn query(State(state): State<Arc<AppState>>, Json(body): Json<QueryBody>) -> Response {
    match state.vector_db.query(body.id) {
        Ok(obj) => {
            let record = obj.as_object().cloned().filter(|m| !m.is_empty());
            (StatusCode::OK, Json(Envelope { record, ..ok() })).into_response()
        }
        Err(e) => http_error(e),
    }
}

async fn admin_snapshot(State(state): State<Arc<AppState>>) -> Response {
    match state.vector_db.take_snapshot() {
        Ok(()) => (StatusCode::OK, Json(ok())).into_response(),
        Err(e) => http_error(e),
    }
}

/// This node's consensus library doesn't expose a "force step down a
/// leader" primitive beyond normal election timeouts; `/admin/setLeader`
/// is a readiness probe here — it succeeds only when this node already
/// is the leader, and otherwise reports `NotLeader` the same way a
/// rejected write would (see DESIGN.md Open Question).
async fn admin_set_leader(State(state): State<Arc<AppState>>) -> Response {
    if state.raft.is_leader().await {
        (StatusCode::OK, Json(ok())).into_response()
    } else {
        http_error(CoreError::NotLeader)
    }
}

#[derive(Debug, Deserialize)]
struct AddFollowerBody {
    #[serde(rename = "nodeId")]
    node_id: u64,
    endpoint: String,
}

async fn admin_add_follower(State(state): State<Arc<AppState>>, Json(body): Json<AddFollowerBody>) -> Response {
    match state.raft.add_server(body.node_id, body.endpoint).await {
        Ok(()) => (StatusCode::OK, Json(ok())).into_response(),
        Err(e) => http_error(e),
    }
}

async fn admin_list_node(State(state): State<Arc<AppState>>) -> Response {
    let nodes = state.raft.get_all_nodes_info().await;
    (StatusCode::OK, Json(Envelope { nodes: Some(nodes), ..ok() })).into_response()
}

async fn admin_get_node(State(state): State<Arc<AppState>>) -> Response {
    let node = state.raft.get_current_node_info().await;
    (StatusCode::OK, Json(Envelope { node: Some(node), ..ok() })).into_response()
}

async fn raft_vote(
    State(state): State<Arc<AppState>>,
    Json(rpc): Json<async_raft::raft::VoteRequest>,
) -> Response {
    match state.raft.raft().vote(rpc).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn raft_append_entries(
    State(state): State<Arc<AppState>>,
    Json(rpc): Json<async_raft::raft::AppendEntriesRequest<ClientRequest>>,
) -> Response {
    match state.raft.raft().append_entries(rpc).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn raft_install_snapshot(
    State(state): State<Arc<AppState>>,
    Json(rpc): Json<async_raft::raft::InstallSnapshotRequest>,
) -> Response {
    match state.raft.raft().install_snapshot(rpc).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_index_type_is_flat() {
        assert_eq!(default_index_type(), "FLAT");
    }

    #[test]
    fn strip_padding_drops_trailing_sentinel_entries() {
        let (ids, distances) = strip_padding(vec![3, 1, -1, -1], vec![0.1, 0.2, 0.0, 0.0]);
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(distances, vec![0.1, 0.2]);
    }

    #[test]
    fn strip_padding_of_all_sentinels_is_empty() {
        let (ids, distances) = strip_padding(vec![-1, -1], vec![0.0, 0.0]);
        assert!(ids.is_empty());
        assert!(distances.is_empty());
    }
}
