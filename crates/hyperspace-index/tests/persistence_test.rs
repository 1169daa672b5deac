use hyperspace_core::{DistanceMetric, FilterOp, IndexKind, ScalarKv};
use hyperspace_index::{FilterIndex, FlatIndex, HnswIndex, IndexFactory};
use parking_lot::Mutex;
use std::collections::HashMap;

struct MemKv(Mutex<HashMap<String, Vec<u8>>>);

impl MemKv {
    fn new() -> Self {
        Self(Mutex::new(HashMap::new()))
    }
}

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
fn filter_index_survives_a_serialize_deserialize_round_trip() {
    let idx = FilterIndex::new();
    idx.add("category", 1, 10);
    idx.add("category", 2, 20);
    idx.add("status", 0, 10);

    let bytes = idx.serialize().unwrap();
    let restored = FilterIndex::deserialize(&bytes).unwrap();

    assert!(restored.bitmap("category", FilterOp::Equal, 1).contains(10));
    assert!(restored.bitmap("category", FilterOp::Equal, 2).contains(20));
    assert!(restored.bitmap("status", FilterOp::Equal, 0).contains(10));
}

#[test]
fn flat_index_snapshot_round_trips_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("0.index");

    let idx = FlatIndex::new(3, DistanceMetric::L2);
    for i in 0..100u64 {
        idx.insert(&[i as f32, i as f32 * 2.0, i as f32 * 3.0], i).unwrap();
    }
    idx.save(&path).unwrap();

    let restored = FlatIndex::new(3, DistanceMetric::L2);
    restored.load(&path).unwrap();
    assert_eq!(restored.count(), 100);
}

#[test]
fn hnsw_index_snapshot_round_trips_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1.index");

    let idx = HnswIndex::new(3, DistanceMetric::L2, 16, 100);
    for i in 0..100u64 {
        idx.insert(&[i as f32, i as f32 * 2.0, i as f32 * 3.0], i).unwrap();
    }
    idx.save(&path).unwrap();

    let restored = HnswIndex::new(3, DistanceMetric::L2, 16, 100);
    restored.load(&path).unwrap();
    assert_eq!(restored.count(), 100);
}

#[test]
fn index_factory_save_all_then_load_all_restores_flat_hnsw_and_filter() {
    let dir = tempfile::tempdir().unwrap();
    let kv = MemKv::new();

    let factory = IndexFactory::init(
        &[IndexKind::Flat, IndexKind::Hnsw],
        4,
        DistanceMetric::L2,
        16,
        100,
    );
    for i in 0..50u64 {
        let vector = vec![i as f32; 4];
        factory
            .insert(&vector, i, vec![("bucket".to_string(), (i % 3) as i64)].into_iter())
            .unwrap();
    }
    factory.save_all(dir.path(), &kv).unwrap();

    let mut restored = IndexFactory::init(
        &[IndexKind::Flat, IndexKind::Hnsw],
        4,
        DistanceMetric::L2,
        16,
        100,
    );
    restored.load_all(dir.path(), &kv).unwrap();

    assert_eq!(restored.flat().unwrap().count(), 50);
    assert_eq!(restored.hnsw().unwrap().count(), 50);
    assert!(restored.filter().bitmap("bucket", FilterOp::Equal, 0).len() > 0);
}
