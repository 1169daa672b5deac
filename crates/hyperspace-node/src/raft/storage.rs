//! `RaftStorage` implementation backing the consensus harness.
//!
//! This owns the *consensus* log — distinct from the node's own
//! `Persistence` WAL. This log is authoritative for replication order
//! and crash-recovers the raft term/voted-for and membership;
//! `VectorDatabase`'s own WAL+snapshot remains authoritative for
//! reconstructing application state on restart.
//! `apply_entry_to_state_machine` is the one place the two meet: it
//! calls straight into `VectorDatabase::upsert`, which performs its
//! own WAL write — the state machine itself does not touch the WAL.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_raft::raft::{Entry, EntryPayload, MembershipConfig};
use async_raft::storage::{CurrentSnapshotData, HardState, InitialState};
use async_raft::{NodeId, RaftStorage};
use async_trait::async_trait;
use std::io::Cursor;
use tokio::sync::RwLock;
use tracing::info;

use super::types::{ClientRequest, CommitReply};
use crate::vector_database::VectorDatabase;

pub struct RaftStorageImpl {
    node_id: NodeId,
    log: RwLock<Vec<Entry<ClientRequest>>>,
    hard_state: RwLock<HardState>,
    membership: RwLock<MembershipConfig>,
    snapshot: RwLock<Option<CurrentSnapshotData<Cursor<Vec<u8>>>>>,
    log_file: std::sync::Mutex<File>,
    vector_db: Arc<VectorDatabase>,
}

impl RaftStorageImpl {
    pub fn new(node_id: NodeId, log_path: PathBuf, vector_db: Arc<VectorDatabase>) -> Result<Self> {
        let mut restored = Vec::new();
        if let Ok(file) = File::open(&log_path) {
            for line in BufReader::new(file).lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<Entry<ClientRequest>>(&line) {
                    restored.push(entry);
                }
            }
            info!(count = restored.len(), "restored raft log entries from disk");
        }
        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        Ok(Self {
            node_id,
            log: RwLock::new(restored),
            hard_state: RwLock::new(HardState {
                current_term: 0,
                voted_for: None,
            }),
            membership: RwLock::new(MembershipConfig::new_initial(node_id)),
            snapshot: RwLock::new(None),
            log_file: std::sync::Mutex::new(log_file),
            vector_db,
        })
    }

    fn persist_entry(&self, entry: &Entry<ClientRequest>) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = self.log_file.lock().unwrap();
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }
}

#[async_trait]
impl RaftStorage<ClientRequest, CommitReply> for RaftStorageImpl {
    type Snapshot = Cursor<Vec<u8>>;
    type ShutdownError = std::io::Error;

    async fn get_membership_config(&self) -> Result<MembershipConfig> {
        Ok(self.membership.read().await.clone())
    }

    async fn get_initial_state(&self) -> Result<InitialState> {
        let membership = self.membership.read().await.clone();
        let log = self.log.read().await;
        let hard_state = self.hard_state.read().await.clone();

        let (last_log_term, last_log_index) = match log.last() {
            Some(entry) => (entry.term, entry.index),
            None => (0, 0),
        };

        Ok(InitialState {
            last_log_term,
            last_log_index,
            last_applied_log: last_log_index,
            hard_state,
            membership,
        })
    }

    async fn save_hard_state(&self, hs: &HardState) -> Result<()> {
        *self.hard_state.write().await = hs.clone();
        Ok(())
    }

    async fn get_log_entries(&self, start: u64, stop: u64) -> Result<Vec<Entry<ClientRequest>>> {
        let log = self.log.read().await;
        Ok(log
            .iter()
            .filter(|e| e.index >= start && e.index < stop)
            .cloned()
            .collect())
    }

    async fn delete_logs_from(&self, start: u64, stop: Option<u64>) -> Result<()> {
        let mut log = self.log.write().await;
        if let Some(stop_idx) = stop {
            log.retain(|e| e.index < start || e.index >= stop_idx);
        } else {
            log.retain(|e| e.index < start);
        }
        Ok(())
    }

    async fn append_entry_to_log(&self, entry: &Entry<ClientRequest>) -> Result<()> {
        self.log.write().await.push(entry.clone());
        self.persist_entry(entry)?;
        Ok(())
    }

    async fn replicate_to_log(&self, entries: &[Entry<ClientRequest>]) -> Result<()> {
        let mut log = self.log.write().await;
        for entry in entries {
            log.push(entry.clone());
            self.persist_entry(entry)?;
        }
        Ok(())
    }

    async fn apply_entry_to_state_machine(
        &self,
        index: &u64,
        data: &ClientRequest,
    ) -> Result<CommitReply> {
        self.vector_db
            .upsert(data.id, data.payload.clone(), data.kind)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(CommitReply { log_idx: *index })
    }

    async fn replicate_to_state_machine(&self, entries: &[(&u64, &ClientRequest)]) -> Result<()> {
        for (index, data) in entries {
            self.apply_entry_to_state_machine(index, data).await?;
        }
        Ok(())
    }

    async fn do_log_compaction(&self) -> Result<CurrentSnapshotData<Self::Snapshot>> {
        self.vector_db
            .take_snapshot()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(CurrentSnapshotData {
            term: self.hard_state.read().await.current_term,
            index: self.log.read().await.last().map_or(0, |e| e.index),
            membership: self.membership.read().await.clone(),
            snapshot: Box::new(Cursor::new(Vec::new())),
        })
    }

    async fn create_snapshot(&self) -> Result<(String, Box<Self::Snapshot>)> {
        Ok((format!("node-{}-snapshot", self.node_id), Box::new(Cursor::new(Vec::new()))))
    }

    async fn finalize_snapshot_installation(
        &self,
        _index: u64,
        _term: u64,
        _delete_through: Option<u64>,
        _id: String,
        _snapshot: Box<Self::Snapshot>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_current_snapshot(&self) -> Result<Option<CurrentSnapshotData<Self::Snapshot>>> {
        match &*self.snapshot.read().await {
            Some(s) => Ok(Some(CurrentSnapshotData {
                term: s.term,
                index: s.index,
                membership: s.membership.clone(),
                snapshot: Box::new(Cursor::new(s.snapshot.get_ref().clone())),
            })),
            None => Ok(None),
        }
    }
}

/// Builds the single-entry payload `Raft::client_write` needs from a
/// decoded `/upsert` body.
pub fn normal_entry(req: ClientRequest) -> EntryPayload<ClientRequest> {
    EntryPayload::Normal(async_raft::raft::EntryNormal { data: req })
}
