//! Proxy HTTP surface: forwards `/upsert` and `/search` to the right
//! storage node(s) and exposes `/topology` for observability.

use std::sync::Arc;

use axum::extract::{Query as QueryExtractor, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::coordinator_client::CoordinatorClient;
use crate::router::{all_partition_ids, partition_id_for, select_target_node, RoundRobin};
use crate::topology::TopologyCache;

pub struct AppState {
    pub topology: Arc<TopologyCache>,
    pub client: reqwest::Client,
    pub round_robin: RoundRobin,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upsert", post(forward_write))
        .route("/insert", post(forward_write))
        .route("/search", post(forward_search))
        .route("/topology", get(get_topology))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize, Default)]
pub struct ForceMasterQuery {
    #[serde(rename = "forceMaster", default)]
    force_master: bool,
}

async fn get_topology(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let topology = state.topology.snapshot();
    Json(json!({ "retCode": 0, "roster": topology.roster, "partitions": topology.partitions }))
}

async fn forward_write(
    State(state): State<Arc<AppState>>,
    QueryExtractor(q): QueryExtractor<ForceMasterQuery>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    route_single(&state, "/upsert", true, q.force_master, body).await
}

async fn forward_search(
    State(state): State<Arc<AppState>>,
    QueryExtractor(q): QueryExtractor<ForceMasterQuery>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let topology = state.topology.snapshot();
    let partition_key = topology.partitions.partition_key.clone();
    let has_key = body.get(&partition_key).is_some();

    if has_key {
        route_single(&state, "/search", false, q.force_master, body).await
    } else {
        broadcast_search(&state, body).await
    }
}

/// Hashes the partition key, picks a node, forwards the request body
/// verbatim and streams back its response.
async fn route_single(
    state: &AppState,
    path: &str,
    is_write: bool,
    force_master: bool,
    body: Value,
) -> axum::response::Response {
    let topology = state.topology.snapshot();
    let partition_key = topology.partitions.partition_key.clone();

    let key_value = match body.get(&partition_key) {
        Some(v) => v.clone(),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"retCode": -1, "errorMsg": format!("missing partition key '{partition_key}'") })),
            )
                .into_response()
        }
    };

    let partition_id = partition_id_for(&key_value, topology.partitions.number_of_partitions);
    let target = match select_target_node(&topology, partition_id, is_write, force_master, &state.round_robin) {
        Some(n) => n.clone(),
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"retCode": -1, "errorMsg": "no available node for partition"})),
            )
                .into_response()
        }
    };

    match state
        .client
        .post(format!("{}{}", target.url, path))
        .json(&body)
        .send()
        .await
    {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            match resp.json::<Value>().await {
                Ok(payload) => (status, Json(payload)).into_response(),
                Err(e) => {
                    error!(error = %e, "upstream returned non-JSON body");
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"retCode": -1, "errorMsg": "bad upstream response"}))).into_response()
                }
            }
        }
        Err(e) => {
            warn!(error = %e, node = target.node_id, "forward failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"retCode": -1, "errorMsg": "upstream unreachable"}))).into_response()
        }
    }
}

/// No partition key present means scatter-gather — one node per
/// partition in parallel, merge `{vectors, distances}` sorted
/// ascending by distance, truncated to `k`.
async fn broadcast_search(state: &AppState, body: Value) -> axum::response::Response {
    let topology = state.topology.snapshot();
    let k = body.get("k").and_then(Value::as_u64).unwrap_or(10) as usize;
    let partition_ids = all_partition_ids(&topology);

    if partition_ids.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"retCode": -1, "errorMsg": "no partitions configured"}))).into_response();
    }

    let futures = partition_ids.into_iter().map(|pid| {
        let topology = topology.clone();
        let body = body.clone();
        let client = state.client.clone();
        let round_robin = &state.round_robin;
        async move {
            let target = select_target_node(&topology, pid, false, false, round_robin)?.clone();
            let resp = client
                .post(format!("{}/search", target.url))
                .json(&body)
                .send()
                .await
                .ok()?;
            resp.json::<Value>().await.ok()
        }
    });

    let results: Vec<Value> = futures::future::join_all(futures).await.into_iter().flatten().collect();
    let (vectors, distances) = merge_broadcast_results(results, k);

    Json(json!({ "retCode": 0, "vectors": vectors, "distances": distances })).into_response()
}

/// Merges each partition's `{vectors, distances}` response into one
/// global top-`k`, ascending by distance (P6). `vectors[i] == -1` is
/// the storage node's "no result" padding for a partition with fewer
/// than `k` real matches; dropped here before sorting so it can never
/// sort ahead of a genuine non-negative distance and displace a real
/// result.
fn merge_broadcast_results(results: Vec<Value>, k: usize) -> (Vec<Value>, Vec<Value>) {
    let mut merged: Vec<(f64, Value, Value)> = Vec::new();
    for result in results {
        let vectors = result.get("vectors").and_then(Value::as_array).cloned().unwrap_or_default();
        let distances = result.get("distances").and_then(Value::as_array).cloned().unwrap_or_default();
        for (v, d) in vectors.into_iter().zip(distances.into_iter()) {
            if v.as_i64() == Some(-1) {
                continue;
            }
            let dist = d.as_f64().unwrap_or(f64::MAX);
            merged.push((dist, v, d));
        }
    }

    merged.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(k);

    let vectors = merged.iter().map(|(_, v, _)| v.clone()).collect();
    let distances = merged.iter().map(|(_, _, d)| d.clone()).collect();
    (vectors, distances)
}

pub fn build_client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn coordinator_from(config: &crate::config::ProxyConfig) -> CoordinatorClient {
    CoordinatorClient::new(config.master_coordinator_url.clone(), config.instance_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 scenario 6: two partitions each return their own top-k;
    /// the merge must interleave them into one globally-sorted top-k.
    fn resp(ids: &[i64], distances: &[f64]) -> Value {
        json!({ "retCode": 0, "vectors": ids, "distances": distances })
    }

    #[test]
    fn broadcast_merge_sorts_ascending_and_truncates_to_k() {
        let a = resp(&[1, 2], &[1.62, 5.0]);
        let b = resp(&[42], &[0.3]);

        let (vectors, distances) = merge_broadcast_results(vec![a, b], 2);
        assert_eq!(vectors, vec![json!(42), json!(1)]);
        assert_eq!(distances, vec![json!(0.3), json!(1.62)]);
    }

    #[test]
    fn broadcast_merge_drops_sentinel_padding_before_sorting() {
        // One partition has only one real match for k=2 and pads with
        // (-1, -1.0); that padding must never outrank a real result.
        let a = resp(&[7, -1], &[2.5, -1.0]);
        let b = resp(&[3, 9], &[0.1, 0.2]);

        let (vectors, distances) = merge_broadcast_results(vec![a, b], 3);
        assert_eq!(vectors, vec![json!(3), json!(9), json!(7)]);
        assert_eq!(distances, vec![json!(0.1), json!(0.2), json!(2.5)]);
    }

    #[test]
    fn broadcast_merge_of_all_sentinels_is_empty() {
        let a = resp(&[-1], &[-1.0]);
        let (vectors, distances) = merge_broadcast_results(vec![a], 5);
        assert!(vectors.is_empty());
        assert!(distances.is_empty());
    }
}
