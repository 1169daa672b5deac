//! Persistence: WAL + snapshot bookkeeping.
//!
//! Owns the WAL file descriptor (via `hyperspace_store::Wal`), the
//! in-memory `increase_id` next-log-id counter, and `last_snapshot_id`.
//! `IndexFactory` save/load is driven from here since snapshotting is
//! this module's job, not `VectorDatabase`'s.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hyperspace_core::{CoreError, ScalarKv};
use hyperspace_index::IndexFactory;
use hyperspace_store::wal::{Wal, WalEntry};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Wal(#[from] hyperspace_store::wal::WalError),
    #[error(transparent)]
    Index(#[from] hyperspace_index::IndexError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PersistenceError> for CoreError {
    fn from(e: PersistenceError) -> Self {
        CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

const WAL_VERSION: &str = "1.0";
const SNAPSHOT_DIR_NAME: &str = "snapshots_";
const MAX_LOG_ID_FILE: &str = "snapshots_MaxLogID";

pub struct Persistence {
    wal: Wal,
    increase_id: AtomicU64,
    last_snapshot_id: AtomicU64,
    base_dir: PathBuf,
}

impl Persistence {
    /// `init(path, flush_on_write)`: open or create the WAL, load
    /// `last_snapshot_id` from `snapshots_MaxLogID` (missing file = 0).
    pub fn init(wal_path: &Path, flush_on_write: bool) -> Result<Self, PersistenceError> {
        let wal = Wal::open(wal_path, flush_on_write)?;
        let base_dir = wal_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let last_snapshot_id = read_max_log_id(&base_dir.join(MAX_LOG_ID_FILE))?;
        Ok(Self {
            wal,
            increase_id: AtomicU64::new(last_snapshot_id),
            last_snapshot_id: AtomicU64::new(last_snapshot_id),
            base_dir,
        })
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.base_dir.join(SNAPSHOT_DIR_NAME)
    }

    fn max_log_id_path(&self) -> PathBuf {
        self.base_dir.join(MAX_LOG_ID_FILE)
    }

    pub fn last_snapshot_id(&self) -> u64 {
        self.last_snapshot_id.load(Ordering::SeqCst)
    }

    /// `writeWAL(op, json, version)`: allocate `log_id = ++increase_id`
    /// and append. Failures are logged but the counter is not rolled
    /// back — a failed write permanently skips that `log_id` rather
    /// than retrying or reusing it.
    pub fn write_wal(&self, op: &str, payload: &serde_json::Value) -> Result<u64, PersistenceError> {
        let log_id = self.increase_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = WalEntry {
            log_id,
            version: WAL_VERSION.to_string(),
            op: op.to_string(),
            payload: payload.clone(),
        };
        if let Err(e) = self.wal.append(&entry) {
            warn!(log_id, error = %e, "WAL write failed; log_id permanently skipped");
            return Err(e.into());
        }
        Ok(log_id)
    }

    /// `readNextWAL`: reads the next entry from the current read
    /// cursor. Entries at or below `last_snapshot_id` are skipped;
    /// entries ahead of `increase_id` raise it, preserving
    /// monotonicity across a restart that replays a WAL written by a
    /// higher-numbered prior run.
    pub fn read_next_wal(&self) -> Result<Option<WalEntry>, PersistenceError> {
        loop {
            let Some(entry) = self.wal.read_next()? else {
                return Ok(None);
            };
            if entry.log_id <= self.last_snapshot_id.load(Ordering::SeqCst) {
                continue;
            }
            self.increase_id.fetch_max(entry.log_id, Ordering::SeqCst);
            return Ok(Some(entry));
        }
    }

    /// `takeSnapshot`: freeze `last_snapshot_id` at the current
    /// `increase_id`, save every installed index plus the scalar KV's
    /// filter blob, then persist the new watermark.
    pub fn take_snapshot(&self, factory: &IndexFactory, kv: &dyn ScalarKv) -> Result<(), PersistenceError> {
        let snapshot_id = self.increase_id.load(Ordering::SeqCst);
        self.last_snapshot_id.store(snapshot_id, Ordering::SeqCst);
        factory.save_all(&self.snapshot_dir(), kv)?;
        fs::write(self.max_log_id_path(), snapshot_id.to_string())?;
        info!(snapshot_id, "snapshot taken");
        Ok(())
    }

    /// `loadSnapshot`: delegate to `IndexFactory::load_all`. A missing
    /// snapshot directory is a cold-start no-op, not an error.
    pub fn load_snapshot(&self, factory: &mut IndexFactory, kv: &dyn ScalarKv) -> Result<(), PersistenceError> {
        if !self.snapshot_dir().exists() {
            return Ok(());
        }
        factory.load_all(&self.snapshot_dir(), kv)?;
        Ok(())
    }
}

fn read_max_log_id(path: &Path) -> Result<u64, PersistenceError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().parse().unwrap_or(0)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperspace_core::{DistanceMetric, IndexKind};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    struct MemKv(Mutex<HashMap<String, Vec<u8>>>);
    impl ScalarKv for MemKv {
        fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
            self.0.lock().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
            Ok(self.0.lock().get(key).cloned())
        }
    }

    #[test]
    fn log_ids_are_strictly_monotonic_starting_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::init(&dir.path().join("wal.log"), false).unwrap();
        let a = p.write_wal("upsert", &json!({"id": 1})).unwrap();
        let b = p.write_wal("upsert", &json!({"id": 2})).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn snapshot_then_replay_skips_covered_entries() {
        let dir = tempfile::tempdir().unwrap();
        let p = Persistence::init(&dir.path().join("wal.log"), false).unwrap();
        p.write_wal("upsert", &json!({"id": 1})).unwrap();
        p.write_wal("upsert", &json!({"id": 2})).unwrap();

        let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        let kv = MemKv(Mutex::new(HashMap::new()));
        p.take_snapshot(&factory, &kv).unwrap();
        assert_eq!(p.last_snapshot_id(), 2);

        p.write_wal("upsert", &json!({"id": 3})).unwrap();

        let mut seen = Vec::new();
        while let Some(entry) = p.read_next_wal().unwrap() {
            seen.push(entry.log_id);
        }
        assert_eq!(seen, vec![3]);
    }

    #[test]
    fn reopening_after_snapshot_restores_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let wal_path = dir.path().join("wal.log");
        {
            let p = Persistence::init(&wal_path, false).unwrap();
            p.write_wal("upsert", &json!({"id": 1})).unwrap();
            let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
            let kv = MemKv(Mutex::new(HashMap::new()));
            p.take_snapshot(&factory, &kv).unwrap();
        }
        let p = Persistence::init(&wal_path, false).unwrap();
        assert_eq!(p.last_snapshot_id(), 1);
        assert_eq!(p.write_wal("upsert", &json!({"id": 2})).unwrap(), 2);
    }
}
