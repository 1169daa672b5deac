//! Master Coordinator client: the external collaborator that hands
//! the proxy its node roster and partition map.

use serde::Deserialize;
use thiserror::Error;

use crate::topology::{NodeEntry, NodeRole, PartitionConfig, Roster};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("coordinator returned retCode {0}")]
    NonZeroRetCode(i32),
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    #[serde(rename = "retCode")]
    ret_code: i32,
    data: Option<InstanceData>,
}

#[derive(Debug, Deserialize)]
struct InstanceData {
    nodes: Vec<WireNode>,
}

#[derive(Debug, Deserialize)]
struct WireNode {
    #[serde(rename = "nodeId")]
    node_id: u64,
    url: String,
    role: u8,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PartitionConfigResponse {
    #[serde(rename = "retCode")]
    ret_code: i32,
    data: Option<PartitionConfigData>,
}

#[derive(Debug, Deserialize)]
struct PartitionConfigData {
    #[serde(rename = "partitionKey")]
    partition_key: String,
    #[serde(rename = "numberOfPartitions")]
    number_of_partitions: u32,
    partitions: Vec<WirePartitionEntry>,
}

#[derive(Debug, Deserialize)]
struct WirePartitionEntry {
    #[serde(rename = "partitionId")]
    partition_id: u32,
    #[serde(rename = "nodeId")]
    node_id: u64,
}

pub struct CoordinatorClient {
    base_url: String,
    instance_id: String,
    client: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: String, instance_id: String) -> Self {
        Self {
            base_url,
            instance_id,
            client: reqwest::Client::new(),
        }
    }

    /// GET `/getInstance?instanceId=...`, filtered to `status ==
    /// "active"`.
    pub async fn get_instance(&self) -> Result<Roster, CoordinatorError> {
        let url = format!("{}/getInstance?instanceId={}", self.base_url, self.instance_id);
        let resp: InstanceResponse = self.client.get(url).send().await?.json().await?;
        if resp.ret_code != 0 {
            return Err(CoordinatorError::NonZeroRetCode(resp.ret_code));
        }
        let nodes = resp
            .data
            .map(|d| d.nodes)
            .unwrap_or_default()
            .into_iter()
            .filter(|n| n.status == "active")
            .map(|n| NodeEntry {
                node_id: n.node_id,
                url: n.url,
                role: NodeRole::from_wire(n.role),
                status: n.status,
            })
            .collect();
        Ok(Roster { nodes })
    }

    /// GET `/getPartitionConfig?instanceId=...`, grouping the flat
    /// `(partitionId, nodeId)` pairs into `partition_id -> [node_id]`.
    pub async fn get_partition_config(&self) -> Result<PartitionConfig, CoordinatorError> {
        let url = format!(
            "{}/getPartitionConfig?instanceId={}",
            self.base_url, self.instance_id
        );
        let resp: PartitionConfigResponse = self.client.get(url).send().await?.json().await?;
        if resp.ret_code != 0 {
            return Err(CoordinatorError::NonZeroRetCode(resp.ret_code));
        }
        let data = resp.data.unwrap_or(PartitionConfigData {
            partition_key: String::new(),
            number_of_partitions: 0,
            partitions: Vec::new(),
        });
        let mut partitions: std::collections::HashMap<u32, Vec<u64>> = std::collections::HashMap::new();
        for entry in data.partitions {
            partitions.entry(entry.partition_id).or_default().push(entry.node_id);
        }
        Ok(PartitionConfig {
            partition_key: data.partition_key,
            number_of_partitions: data.number_of_partitions,
            partitions,
        })
    }
}
