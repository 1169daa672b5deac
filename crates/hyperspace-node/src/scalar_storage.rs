//! Durable scalar-field KV.
//!
//! The embedded ordered KV engine is an external collaborator;
//! `rocksdb` fills that role here the way it's used elsewhere in the
//! wider `hyperspace` dependency graph. `ScalarStorage` is a thin
//! typed wrapper: one column of `id -> canonical JSON` for records,
//! plus the raw `put`/`get` passthrough `FilterIndex` persists its
//! serialized postings through.

use std::path::Path;

use hyperspace_core::{CoreError, Record, ScalarKv};
use rocksdb::{Options, DB};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScalarStorageError {
    #[error(transparent)]
    Rocks(#[from] rocksdb::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl From<ScalarStorageError> for CoreError {
    fn from(e: ScalarStorageError) -> Self {
        CoreError::FatalInit(e.to_string())
    }
}

pub struct ScalarStorage {
    db: DB,
}

impl ScalarStorage {
    /// Opens the scalar KV at `path`. `fresh` gates the destructive
    /// reset: the unconditional `DestroyDB`-before-`Open` pattern seen
    /// upstream, which this implementation refuses to do by default —
    /// the safe default is "open existing".
    pub fn open(path: &Path, fresh: bool) -> Result<Self, ScalarStorageError> {
        if fresh {
            let _ = DB::destroy(&Options::default(), path);
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    /// `insert(id, obj)`: upsert; the value is the canonical JSON
    /// serialisation of `obj`.
    pub fn insert(&self, id: u64, obj: &Value) -> Result<(), ScalarStorageError> {
        let bytes = serde_json::to_vec(obj)?;
        self.db.put(id.to_be_bytes(), bytes)?;
        Ok(())
    }

    /// `get(id) -> obj?`: absent returns `None`; callers that need
    /// the "empty object, not an error" contract map `None` to
    /// `Value::Object(Map::new())` at the query seam.
    pub fn get(&self, id: u64) -> Result<Option<Value>, ScalarStorageError> {
        match self.db.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reconstructs a typed [`Record`] from the stored JSON object,
    /// splitting `vectors`/`id` from the opaque scalar fields the
    /// way `VectorDatabase` produced it on write.
    pub fn get_record(&self, id: u64) -> Result<Option<Record>, ScalarStorageError> {
        Ok(self.get(id)?.map(|v| record_from_json(id, v)))
    }
}

pub fn record_from_json(id: u64, mut obj: Value) -> Record {
    let vector = obj
        .get("vectors")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
        .unwrap_or_default();
    let mut scalars: Map<String, Value> = obj
        .as_object_mut()
        .map(std::mem::take)
        .unwrap_or_default();
    scalars.remove("vectors");
    scalars.remove("id");
    Record { id, vector, scalars }
}

impl ScalarKv for ScalarStorage {
    fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
