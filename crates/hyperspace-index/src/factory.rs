//! `IndexFactory`: the per-collection set of installed index
//! kinds, and their snapshot/reload lifecycle.
//!
//! Kept as an explicit context object constructed by the caller
//! (`VectorDatabase` in `hyperspace-node`) rather than a process-wide
//! singleton — a true global would make multiple collections in one
//! process impossible to test in isolation.

use std::path::Path;
use std::sync::Arc;

use hyperspace_core::{Component, DistanceMetric, FilterOp, IndexKind, ScalarKv};
use roaring::RoaringBitmap;

use crate::error::IndexError;
use crate::filter::FilterIndex;
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;

/// One concrete index, tagged by the kind that produced it. Matches
/// the request-level `indexKinds` wire values `FLAT`/`HNSW` plus the
/// always-present `FILTER` side index (a tagged
/// enum instead of an untyped `dyn Index` avoids a downcast at every
/// search call).
pub enum IndexHandle {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
    Filter(FilterIndex),
}

impl IndexHandle {
    fn kind(&self) -> IndexKind {
        match self {
            IndexHandle::Flat(_) => IndexKind::Flat,
            IndexHandle::Hnsw(_) => IndexKind::Hnsw,
            IndexHandle::Filter(_) => IndexKind::Filter,
        }
    }
}

pub struct IndexFactory {
    dim: usize,
    metric: DistanceMetric,
    flat: Option<FlatIndex>,
    hnsw: Option<HnswIndex>,
    filter: FilterIndex,
}

const FILTER_SCALAR_KEY: &str = "hyperspace:filter_index";

impl IndexFactory {
    /// Installs the requested ANN kinds (FLAT and/or HNSW); FILTER is
    /// always present since scalar filtering is orthogonal to the ANN
    /// choice.
    pub fn init(kinds: &[IndexKind], dim: usize, metric: DistanceMetric, m: usize, ef_construction: usize) -> Self {
        let mut factory = Self {
            dim,
            metric,
            flat: None,
            hnsw: None,
            filter: FilterIndex::new(),
        };
        for &kind in kinds {
            match kind {
                IndexKind::Flat => factory.flat = Some(FlatIndex::new(dim, metric)),
                IndexKind::Hnsw => factory.hnsw = Some(HnswIndex::new(dim, metric, m, ef_construction)),
                IndexKind::Filter => {}
            }
        }
        factory
    }

    pub fn has(&self, kind: IndexKind) -> bool {
        match kind {
            IndexKind::Flat => self.flat.is_some(),
            IndexKind::Hnsw => self.hnsw.is_some(),
            IndexKind::Filter => true,
        }
    }

    pub fn flat(&self) -> Result<&FlatIndex, IndexError> {
        self.flat.as_ref().ok_or(IndexError::NotInstalled(IndexKind::Flat))
    }

    pub fn hnsw(&self) -> Result<&HnswIndex, IndexError> {
        self.hnsw.as_ref().ok_or(IndexError::NotInstalled(IndexKind::Hnsw))
    }

    pub fn filter(&self) -> &FilterIndex {
        &self.filter
    }

    /// Inserts into every installed ANN index plus FILTER:
    /// "a record is present in FLAT/HNSW iff it is present in the
    /// collection's FILTER index."
    pub fn insert(&self, vector: &[Component], id: u64, int_fields: impl Iterator<Item = (String, i64)>) -> Result<(), IndexError> {
        if let Some(flat) = &self.flat {
            flat.insert(vector, id)?;
        }
        if let Some(hnsw) = &self.hnsw {
            hnsw.insert(vector, id)?;
        }
        for (field, value) in int_fields {
            self.filter.add(&field, value, id);
        }
        Ok(())
    }

    /// ANN-only insert into the single index named by `kind`, skipping
    /// the FILTER side. Callers that need to move a field between
    /// buckets on update (rather than just adding it) drive `filter()`
    /// directly instead of going through [`IndexFactory::insert`].
    /// Per §4.2/§4.6, an upsert touches only the vector index of the
    /// given kind, never every installed index.
    pub fn insert_ann_only(&self, kind: IndexKind, vector: &[Component], id: u64) -> Result<(), IndexError> {
        match kind {
            IndexKind::Flat => self.flat()?.insert(vector, id),
            IndexKind::Hnsw => self.hnsw()?.insert(vector, id),
            IndexKind::Filter => Err(IndexError::NotInstalled(IndexKind::Filter)),
        }
    }

    /// Removes `ids` from the single index named by `kind` only.
    pub fn remove(&self, kind: IndexKind, ids: &[u64]) {
        match kind {
            IndexKind::Flat => {
                if let Some(flat) = &self.flat {
                    flat.remove(ids);
                }
            }
            IndexKind::Hnsw => {
                if let Some(hnsw) = &self.hnsw {
                    hnsw.remove(ids);
                }
            }
            IndexKind::Filter => {}
        }
    }

    pub fn filter_bitmap(&self, exprs: &[(String, FilterOp, i64)]) -> RoaringBitmap {
        let mut iter = exprs.iter();
        let Some((field, op, value)) = iter.next() else {
            return RoaringBitmap::new();
        };
        let mut acc = self.filter.bitmap(field, *op, *value);
        for (field, op, value) in iter {
            acc &= self.filter.bitmap(field, *op, *value);
        }
        acc
    }

    pub fn search(
        &self,
        kind: IndexKind,
        query: &[Component],
        k: usize,
        filter_bitmap: Option<&RoaringBitmap>,
        ef_search: usize,
    ) -> Result<(Vec<i64>, Vec<f32>), IndexError> {
        match kind {
            IndexKind::Flat => Ok(self.flat()?.search(query, k, filter_bitmap)),
            IndexKind::Hnsw => self.hnsw()?.search(query, k, filter_bitmap, ef_search),
            IndexKind::Filter => Err(IndexError::NotInstalled(IndexKind::Filter)),
        }
    }

    /// Snapshot file names are `<folder>/<ordinal>.index`;
    /// the discriminant's numeric value is load-bearing here. FILTER
    /// persists through the scalar KV instead of a flat file, since
    /// it shares storage with the rest of the collection's scalar
    /// state.
    pub fn save_all(&self, folder: &Path, kv: &dyn ScalarKv) -> Result<(), IndexError> {
        std::fs::create_dir_all(folder)?;
        if let Some(flat) = &self.flat {
            flat.save(&index_path(folder, IndexKind::Flat))?;
        }
        if let Some(hnsw) = &self.hnsw {
            hnsw.save(&index_path(folder, IndexKind::Hnsw))?;
        }
        let bytes = self.filter.serialize()?;
        kv.put(FILTER_SCALAR_KEY, &bytes)?;
        Ok(())
    }

    pub fn load_all(&mut self, folder: &Path, kv: &dyn ScalarKv) -> Result<(), IndexError> {
        if let Some(flat) = &self.flat {
            flat.load(&index_path(folder, IndexKind::Flat))?;
        }
        if let Some(hnsw) = &self.hnsw {
            hnsw.load(&index_path(folder, IndexKind::Hnsw))?;
        }
        if let Some(bytes) = kv.get(FILTER_SCALAR_KEY)? {
            self.filter = FilterIndex::deserialize(&bytes)?;
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

fn index_path(folder: &Path, kind: IndexKind) -> std::path::PathBuf {
    folder.join(format!("{}.index", kind.ordinal()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperspace_core::ScalarKv;
    use parking_lot::Mutex;
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
    fn insert_reaches_both_installed_indexes_and_filter() {
        let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        factory
            .insert(&[1.0, 2.0], 7, vec![("tag".to_string(), 5)].into_iter())
            .unwrap();

        assert_eq!(factory.flat().unwrap().count(), 1);
        assert!(factory.filter().bitmap("tag", FilterOp::Equal, 5).contains(7));
    }

    #[test]
    fn search_on_uninstalled_kind_errors() {
        let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        let err = factory.search(IndexKind::Hnsw, &[0.0, 0.0], 1, None, 50).unwrap_err();
        assert!(matches!(err, IndexError::NotInstalled(IndexKind::Hnsw)));
    }

    #[test]
    fn save_and_load_round_trip_through_a_memory_kv() {
        let dir = tempfile::tempdir().unwrap();
        let kv = MemKv(Mutex::new(HashMap::new()));

        let factory = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        factory
            .insert(&[1.0, 2.0], 1, vec![("tag".to_string(), 5)].into_iter())
            .unwrap();
        factory.save_all(dir.path(), &kv).unwrap();

        let mut restored = IndexFactory::init(&[IndexKind::Flat], 2, DistanceMetric::L2, 16, 200);
        restored.load_all(dir.path(), &kv).unwrap();

        assert_eq!(restored.flat().unwrap().count(), 1);
        assert!(restored.filter().bitmap("tag", FilterOp::Equal, 5).contains(1));
    }
}
