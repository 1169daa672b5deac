//! `VectorDatabase`: the orchestrator every request ultimately
//! touches. Owns the single `IndexFactory`, the scalar KV, and
//! `Persistence`, and is the single authoritative apply point: both
//! the HTTP write path and the consensus commit callback call into
//! `upsert`, and `reload_database` drives the exact same `upsert`
//! logic in replay mode.

use std::collections::HashMap;

use hyperspace_core::{CoreError, FilterExpr, FilterOp, GlobalConfig, IndexKind};
use hyperspace_index::IndexFactory;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::info;

use crate::persistence::Persistence;
use crate::scalar_storage::{record_from_json, ScalarStorage};

pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub k: usize,
    pub kind: IndexKind,
    pub filter: Option<FilterExpr>,
}

pub struct SearchResponse {
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
}

pub struct VectorDatabase {
    factory: RwLock<IndexFactory>,
    scalar: ScalarStorage,
    persistence: Persistence,
    dim: usize,
    global_config: GlobalConfig,
}

impl VectorDatabase {
    pub fn new(factory: IndexFactory, scalar: ScalarStorage, persistence: Persistence) -> Self {
        Self::with_config(factory, scalar, persistence, GlobalConfig::default())
    }

    pub fn with_config(
        factory: IndexFactory,
        scalar: ScalarStorage,
        persistence: Persistence,
        global_config: GlobalConfig,
    ) -> Self {
        let dim = factory.dim();
        Self {
            factory: RwLock::new(factory),
            scalar,
            persistence,
            dim,
            global_config,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Validates, serialises to the WAL, then applies. Validation
    /// happens before the WAL write so a bad request never corrupts
    /// persisted state. An `upsert` with an existing id is a full
    /// replace of both vector and scalars.
    pub fn upsert(&self, id: u64, obj: Value, kind: IndexKind) -> Result<(), CoreError> {
        self.validate_dim(&obj)?;
        self.persistence.write_wal("upsert", &obj)?;
        self.apply_upsert(id, obj, kind)
    }

    fn validate_dim(&self, obj: &Value) -> Result<(), CoreError> {
        let len = obj
            .get("vectors")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if len != self.dim {
            return Err(CoreError::BadRequest(format!(
                "vector dimension mismatch: expected {}, got {len}",
                self.dim
            )));
        }
        Ok(())
    }

    /// Applies an upsert without touching the WAL — used by
    /// `reload_database`'s replay, which must be pure and never
    /// re-write the WAL.
    pub fn apply_upsert(&self, id: u64, obj: Value, kind: IndexKind) -> Result<(), CoreError> {
        let existing = self
            .scalar
            .get_record(id)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let record = record_from_json(id, obj.clone());
        if record.vector.len() != self.dim {
            return Err(CoreError::BadRequest(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                record.vector.len()
            )));
        }

        let factory = self.factory.read();
        if existing.is_some() {
            factory.remove(kind, &[id]);
        }
        factory
            .insert_ann_only(kind, &record.vector, id)
            .map_err(|e| CoreError::BadRequest(e.to_string()))?;

        let old_fields: HashMap<&str, i64> = existing
            .as_ref()
            .map(|r| r.integer_fields().collect())
            .unwrap_or_default();
        for (field, new_value) in record.integer_fields() {
            let old_value = old_fields.get(field).copied();
            factory.filter().update(field, old_value, new_value, id);
        }
        drop(factory);

        self.scalar
            .insert(id, &obj)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(())
    }

    /// `query(id) -> obj`: pass-through to the scalar KV; absent ids
    /// return an empty object, not an error.
    pub fn query(&self, id: u64) -> Result<Value, CoreError> {
        let obj = self
            .scalar
            .get(id)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(obj.unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Builds a filter bitmap when a filter is present, then
    /// delegates to the chosen vector index.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, CoreError> {
        if request.vector.len() != self.dim {
            return Err(CoreError::BadRequest(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                request.vector.len()
            )));
        }
        let factory = self.factory.read();
        let bitmap = request.filter.as_ref().map(|f| {
            factory.filter_bitmap(&[(f.field_name.clone(), match f.op {
                FilterOp::Equal => FilterOp::Equal,
                FilterOp::NotEqual => FilterOp::NotEqual,
            }, f.field_value)])
        });
        let ef_search = self.global_config.get_ef_search();
        let (ids, distances) = factory
            .search(request.kind, &request.vector, request.k, bitmap.as_ref(), ef_search)
            .map_err(|e| CoreError::BadRequest(e.to_string()))?;
        Ok(SearchResponse { ids, distances })
    }

    /// Loads the snapshot, then drains `readNextWAL`, replaying each
    /// `upsert` entry through `apply_upsert` (pure — no re-write).
    /// Other op types are ignored.
    pub fn reload_database(&self) -> Result<(), CoreError> {
        {
            let mut factory = self.factory.write();
            self.persistence
                .load_snapshot(&mut factory, &self.scalar)
                .map_err(|e| CoreError::FatalInit(e.to_string()))?;
        }

        let mut replayed = 0u64;
        let mut max_log_id = self.persistence.last_snapshot_id();
        while let Some(entry) = self
            .persistence
            .read_next_wal()
            .map_err(|e| CoreError::FatalInit(e.to_string()))?
        {
            max_log_id = max_log_id.max(entry.log_id);
            if entry.op != "upsert" {
                continue;
            }
            let Some(id) = entry.payload.get("id").and_then(Value::as_u64) else {
                continue;
            };
            // Recover the originally-requested kind from the persisted
            // payload rather than assuming FLAT, so a record upserted as
            // HNSW doesn't get replayed into the wrong index (I2)/(P3).
            let kind = entry
                .payload
                .get("indexType")
                .and_then(Value::as_str)
                .and_then(IndexKind::from_request_str)
                .unwrap_or(IndexKind::Flat);
            self.apply_upsert(id, entry.payload, kind)?;
            replayed += 1;
        }
        info!(replayed, max_log_id, "WAL replay complete");
        Ok(())
    }

    pub fn take_snapshot(&self) -> Result<(), CoreError> {
        let factory = self.factory.read();
        self.persistence
            .take_snapshot(&factory, &self.scalar)
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperspace_core::DistanceMetric;
    use serde_json::json;

    fn make_db(dir: &std::path::Path) -> VectorDatabase {
        let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        let scalar = ScalarStorage::open(&dir.join("scalar"), false).unwrap();
        let persistence = Persistence::init(&dir.join("wal.log"), false).unwrap();
        VectorDatabase::new(factory, scalar, persistence)
    }

    fn make_db_both_kinds(dir: &std::path::Path) -> VectorDatabase {
        let factory = IndexFactory::init(&[IndexKind::Flat, IndexKind::Hnsw], 2, DistanceMetric::L2, 16, 200);
        let scalar = ScalarStorage::open(&dir.join("scalar"), false).unwrap();
        let persistence = Persistence::init(&dir.join("wal.log"), false).unwrap();
        VectorDatabase::new(factory, scalar, persistence)
    }

    /// dim=2 FLAT L2, three upserts, then a k=2 search.
    #[test]
    fn scenario_one_flat_l2_search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0]}), IndexKind::Flat).unwrap();
        db.upsert(2, json!({"id": 2, "vectors": [1.0, 1.0]}), IndexKind::Flat).unwrap();
        db.upsert(3, json!({"id": 3, "vectors": [10.0, 10.0]}), IndexKind::Flat).unwrap();

        let resp = db
            .search(&SearchRequest {
                vector: vec![0.1, 0.1],
                k: 2,
                kind: IndexKind::Flat,
                filter: None,
            })
            .unwrap();
        assert_eq!(resp.ids, vec![1, 2]);
        assert!((resp.distances[0] - 0.02).abs() < 1e-3);
        assert!((resp.distances[1] - 1.62).abs() < 1e-3);
    }

    /// A filter matching no records returns an empty result.
    #[test]
    fn scenario_two_filter_with_no_match_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0]}), IndexKind::Flat).unwrap();

        let resp = db
            .search(&SearchRequest {
                vector: vec![0.1, 0.1],
                k: 2,
                kind: IndexKind::Flat,
                filter: Some(FilterExpr {
                    field_name: "tag".to_string(),
                    op: FilterOp::Equal,
                    field_value: 7,
                }),
            })
            .unwrap();
        assert!(resp.ids.is_empty());
    }

    /// Re-upserting moves the id between filter buckets.
    #[test]
    fn scenario_three_reupsert_moves_filter_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0], "tag": 5}), IndexKind::Flat).unwrap();
        db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0], "tag": 9}), IndexKind::Flat).unwrap();

        let factory = db.factory.read();
        assert!(factory.filter().bitmap("tag", FilterOp::Equal, 5).is_empty());
        assert!(factory.filter().bitmap("tag", FilterOp::Equal, 9).contains(1));
    }

    #[test]
    fn query_on_unknown_id_returns_empty_object_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db(dir.path());
        assert_eq!(db.query(999).unwrap(), Value::Object(Map::new()));
    }

    /// Snapshot + more writes + reload reconstructs state.
    #[test]
    fn snapshot_and_reload_reconstructs_all_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = make_db(dir.path());
            for id in 1..=10u64 {
                db.upsert(id, json!({"id": id, "vectors": [id as f64, 0.0]}), IndexKind::Flat).unwrap();
            }
            db.take_snapshot().unwrap();
            for id in 11..=15u64 {
                db.upsert(id, json!({"id": id, "vectors": [id as f64, 0.0]}), IndexKind::Flat).unwrap();
            }
        }

        let db = make_db(dir.path());
        db.reload_database().unwrap();
        for id in 1..=15u64 {
            let obj = db.query(id).unwrap();
            assert_eq!(obj.get("id").and_then(Value::as_u64), Some(id));
        }

        // The FLAT index itself (not just the scalar KV) must have been
        // rebuilt from snapshot + WAL replay, independent of rocksdb's
        // own on-disk durability.
        let resp = db
            .search(&SearchRequest {
                vector: vec![7.0, 0.0],
                k: 1,
                kind: IndexKind::Flat,
                filter: None,
            })
            .unwrap();
        assert_eq!(resp.ids, vec![7]);
    }

    /// An upsert naming `indexType: "FLAT"` must not also populate an
    /// installed HNSW index, and vice versa (§4.2/§4.6).
    #[test]
    fn upsert_only_touches_the_named_index_kind() {
        let dir = tempfile::tempdir().unwrap();
        let db = make_db_both_kinds(dir.path());
        db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0]}), IndexKind::Flat).unwrap();
        db.upsert(2, json!({"id": 2, "vectors": [1.0, 1.0]}), IndexKind::Hnsw).unwrap();

        let factory = db.factory.read();
        assert_eq!(factory.flat().unwrap().count(), 1);
        assert_eq!(factory.hnsw().unwrap().count(), 1);
    }

    /// Replay must recover the kind each entry was originally upserted
    /// with from the persisted `indexType` field, not assume FLAT for
    /// everything (I2)/(P3).
    #[test]
    fn reload_replays_each_entry_into_its_originally_named_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = make_db_both_kinds(dir.path());
            db.upsert(1, json!({"id": 1, "vectors": [0.0, 0.0], "indexType": "FLAT"}), IndexKind::Flat).unwrap();
            db.upsert(2, json!({"id": 2, "vectors": [1.0, 1.0], "indexType": "HNSW"}), IndexKind::Hnsw).unwrap();
        }

        let db = make_db_both_kinds(dir.path());
        db.reload_database().unwrap();

        let factory = db.factory.read();
        assert_eq!(factory.flat().unwrap().count(), 1);
        assert_eq!(factory.hnsw().unwrap().count(), 1);
    }
}
