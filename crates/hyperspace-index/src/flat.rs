//! Exact flat index: an id-map over raw vectors with exhaustive
//! L2 / inner-product search. `remove` is a true removal here — FLAT
//! "supports this via an id-mapping wrapper."

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use hyperspace_core::{Component, DistanceMetric};
use roaring::RoaringBitmap;
use tracing::warn;

use crate::error::IndexError;

pub struct FlatIndex {
    dim: usize,
    metric: DistanceMetric,
    vectors: DashMap<u64, Vec<Component>>,
}

struct ScoredId {
    id: u64,
    distance: f32,
    metric: DistanceMetric,
}

impl PartialEq for ScoredId {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for ScoredId {}
impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredId {
    /// Max-heap over "worst first" so `BinaryHeap::pop` evicts the
    /// least relevant candidate once we're over capacity `k`.
    fn cmp(&self, other: &Self) -> Ordering {
        let better = self.metric.better(self.distance, other.distance);
        if better {
            Ordering::Less
        } else if self.distance == other.distance {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }
}

impl FlatIndex {
    pub fn new(dim: usize, metric: DistanceMetric) -> Self {
        Self {
            dim,
            metric,
            vectors: DashMap::new(),
        }
    }

    pub fn insert(&self, vector: &[Component], id: u64) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        self.vectors.insert(id, vector.to_vec());
        Ok(())
    }

    pub fn remove(&self, ids: &[u64]) {
        for id in ids {
            self.vectors.remove(id);
        }
    }

    pub fn search(
        &self,
        query: &[Component],
        k: usize,
        filter_bitmap: Option<&RoaringBitmap>,
    ) -> (Vec<i64>, Vec<f32>) {
        let mut heap: BinaryHeap<ScoredId> = BinaryHeap::with_capacity(k + 1);

        for entry in self.vectors.iter() {
            let id = *entry.key();
            if let Some(bitmap) = filter_bitmap {
                if !bitmap.contains(id as u32) {
                    continue;
                }
            }
            let distance = self.metric.distance(query, entry.value());
            heap.push(ScoredId {
                id,
                distance,
                metric: self.metric,
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut results: Vec<ScoredId> = heap.into_vec();
        results.sort_by(|a, b| {
            if self.metric.better(a.distance, b.distance) {
                Ordering::Less
            } else if a.distance == b.distance {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        });

        let mut ids = Vec::with_capacity(k);
        let mut distances = Vec::with_capacity(k);
        for r in results {
            ids.push(r.id as i64);
            distances.push(r.distance);
        }
        while ids.len() < k {
            ids.push(-1);
            distances.push(-1.0);
        }
        (ids, distances)
    }

    pub fn count(&self) -> usize {
        self.vectors.len()
    }

    /// `<id u64><dim u32><f32 * dim>` repeated, prefixed by a `u64`
    /// record count.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_u64::<LittleEndian>(self.vectors.len() as u64)?;
        for entry in self.vectors.iter() {
            writer.write_u64::<LittleEndian>(*entry.key())?;
            writer.write_u32::<LittleEndian>(entry.value().len() as u32)?;
            for component in entry.value() {
                writer.write_f32::<LittleEndian>(*component)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// `load` from a missing file is a no-op (warn), not an error.
    pub fn load(&self, path: &Path) -> Result<(), IndexError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "FlatIndex snapshot missing, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let count = reader.read_u64::<LittleEndian>()?;
        self.vectors.clear();
        for _ in 0..count {
            let id = reader.read_u64::<LittleEndian>()?;
            let dim = reader.read_u32::<LittleEndian>()? as usize;
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(reader.read_f32::<LittleEndian>()?);
            }
            self.vectors.insert(id, vector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_nearest_neighbours_in_order() {
        let idx = FlatIndex::new(2, DistanceMetric::L2);
        idx.insert(&[0.0, 0.0], 1).unwrap();
        idx.insert(&[1.0, 1.0], 2).unwrap();
        idx.insert(&[10.0, 10.0], 3).unwrap();

        let (ids, distances) = idx.search(&[0.1, 0.1], 2, None);
        assert_eq!(ids, vec![1, 2]);
        assert!((distances[0] - 0.02).abs() < 1e-4);
        assert!((distances[1] - 1.62).abs() < 1e-4);
    }

    #[test]
    fn search_pads_with_negative_one_when_fewer_than_k_exist() {
        let idx = FlatIndex::new(2, DistanceMetric::L2);
        idx.insert(&[0.0, 0.0], 1).unwrap();

        let (ids, _distances) = idx.search(&[0.0, 0.0], 3, None);
        assert_eq!(ids, vec![1, -1, -1]);
    }

    #[test]
    fn filter_bitmap_excludes_non_members() {
        let idx = FlatIndex::new(2, DistanceMetric::L2);
        idx.insert(&[0.0, 0.0], 1).unwrap();
        idx.insert(&[0.0, 0.0], 2).unwrap();

        let mut bitmap = RoaringBitmap::new();
        bitmap.insert(2);
        let (ids, _) = idx.search(&[0.0, 0.0], 2, Some(&bitmap));
        assert_eq!(ids, vec![2, -1]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.index");

        let idx = FlatIndex::new(2, DistanceMetric::L2);
        idx.insert(&[1.0, 2.0], 1).unwrap();
        idx.insert(&[3.0, 4.0], 2).unwrap();
        idx.save(&path).unwrap();

        let restored = FlatIndex::new(2, DistanceMetric::L2);
        restored.load(&path).unwrap();
        assert_eq!(restored.count(), 2);
        let (ids, _) = restored.search(&[1.0, 2.0], 1, None);
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn load_from_missing_file_is_a_no_op() {
        let idx = FlatIndex::new(2, DistanceMetric::L2);
        idx.load(Path::new("/nonexistent/path/0.index")).unwrap();
        assert_eq!(idx.count(), 0);
    }
}
