//! Hierarchical navigable small-world graph index.
//!
//! Unlike a const-generic-dimension design, every vector here carries
//! its dimension at runtime, since `IndexFactory::init` receives `dim`
//! as a request/config parameter, not a compile-time one.
//!
//! Deletion uses a soft-delete tombstone bitmap plus a post-filter
//! predicate threaded through graph traversal, rather than a no-op.
//! `insert` on an id that already exists tombstones the old internal
//! node before linking in a fresh one, so an update never leaves the
//! stale vector reachable from search.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use hyperspace_core::{Component, DistanceMetric};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rand::Rng;
use roaring::RoaringBitmap;
use tracing::warn;

use crate::error::IndexError;

const MAX_LAYERS: u32 = 16;
const NONE_ENTRY: u32 = u32::MAX;

struct Node {
    /// `layers[l]` holds this node's neighbour list at level `l`.
    layers: Vec<RwLock<Vec<u32>>>,
}

#[derive(Default)]
struct VisitedScratch {
    marks: Vec<u32>,
    generation: u32,
}

impl VisitedScratch {
    fn begin(&mut self, size: usize) -> u32 {
        if self.marks.len() < size {
            self.marks.resize(size, 0);
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.marks.iter_mut().for_each(|m| *m = 0);
            self.generation = 1;
        }
        self.generation
    }

    /// Returns `true` the first time `id` is seen this generation.
    fn visit(&mut self, id: u32, generation: u32) -> bool {
        let slot = &mut self.marks[id as usize];
        if *slot == generation {
            false
        } else {
            *slot = generation;
            true
        }
    }
}

thread_local! {
    static VISITED: RefCell<VisitedScratch> = RefCell::new(VisitedScratch::default());
}

pub struct HnswIndex {
    dim: usize,
    metric: DistanceMetric,
    m: usize,
    ef_construction: usize,
    nodes: RwLock<Vec<Node>>,
    vectors: RwLock<Vec<Vec<Component>>>,
    internal_to_id: RwLock<Vec<u64>>,
    id_to_internal: DashMap<u64, u32>,
    deleted: RwLock<RoaringBitmap>,
    entry_point: AtomicU32,
    max_layer: AtomicU32,
}

impl HnswIndex {
    pub fn new(dim: usize, metric: DistanceMetric, m: usize, ef_construction: usize) -> Self {
        Self {
            dim,
            metric,
            m,
            ef_construction,
            nodes: RwLock::new(Vec::new()),
            vectors: RwLock::new(Vec::new()),
            internal_to_id: RwLock::new(Vec::new()),
            id_to_internal: DashMap::new(),
            deleted: RwLock::new(RoaringBitmap::new()),
            entry_point: AtomicU32::new(NONE_ENTRY),
            max_layer: AtomicU32::new(0),
        }
    }

    /// A uniform "lower is closer" score regardless of metric
    /// orientation, so graph traversal doesn't need a metric-aware
    /// comparator at every heap operation.
    fn score(&self, a: &[Component], b: &[Component]) -> f32 {
        let d = self.metric.distance(a, b);
        match self.metric {
            DistanceMetric::L2 => d,
            DistanceMetric::InnerProduct => -d,
        }
    }

    fn unscore(&self, score: f32) -> f32 {
        match self.metric {
            DistanceMetric::L2 => score,
            DistanceMetric::InnerProduct => -score,
        }
    }

    fn random_level(&self) -> u32 {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while rng.gen::<f64>() < 0.5 && level < MAX_LAYERS {
            level += 1;
        }
        level
    }

    fn is_deleted(&self, internal: u32) -> bool {
        self.deleted.read().contains(internal)
    }

    /// Explores the graph at `layer` starting from `entry_points`,
    /// returning up to `ef` candidates that pass `is_allowed`, sorted
    /// closest-first. Candidates failing `is_allowed` (tombstoned or
    /// filtered out) are still traversed as bridges but never make it
    /// into the returned set.
    fn search_layer(
        &self,
        query: &[Component],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        is_allowed: &dyn Fn(u32) -> bool,
    ) -> Vec<(u32, f32)> {
        let nodes = self.nodes.read();
        let vectors = self.vectors.read();
        let n = nodes.len();

        VISITED.with(|cell| {
            let mut scratch = cell.borrow_mut();
            let generation = scratch.begin(n);

            let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> = BinaryHeap::new();
            let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::new();

            for &ep in entry_points {
                if (ep as usize) >= n || !scratch.visit(ep, generation) {
                    continue;
                }
                let score = self.score(query, &vectors[ep as usize]);
                candidates.push(Reverse((OrderedFloat(score), ep)));
                if is_allowed(ep) {
                    results.push((OrderedFloat(score), ep));
                }
            }

            while let Some(Reverse((cur_score, cur_id))) = candidates.pop() {
                if let Some((worst, _)) = results.peek() {
                    if results.len() >= ef && cur_score > *worst {
                        break;
                    }
                }

                if layer >= nodes[cur_id as usize].layers.len() {
                    continue;
                }
                let neighbors = nodes[cur_id as usize].layers[layer].read().clone();
                for neighbor in neighbors {
                    if !scratch.visit(neighbor, generation) {
                        continue;
                    }
                    let score = self.score(query, &vectors[neighbor as usize]);
                    let worth_exploring = results.len() < ef
                        || results
                            .peek()
                            .map(|(worst, _)| OrderedFloat(score) < *worst)
                            .unwrap_or(true);
                    if worth_exploring {
                        candidates.push(Reverse((OrderedFloat(score), neighbor)));
                        if is_allowed(neighbor) {
                            results.push((OrderedFloat(score), neighbor));
                            if results.len() > ef {
                                results.pop();
                            }
                        }
                    }
                }
            }

            let mut out: Vec<(u32, f32)> = results
                .into_iter()
                .map(|(s, id)| (id, s.into_inner()))
                .collect();
            out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            out
        })
    }

    /// Greedy single-candidate descent from `from_layer` down to
    /// (but not including) `to_layer`, used to find a good entry
    /// point before the bounded `ef`-width search at the target
    /// layer.
    fn greedy_closest(&self, query: &[Component], from_layer: u32, to_layer: u32, entry: u32) -> u32 {
        let mut current = entry;
        let mut layer = from_layer;
        while layer > to_layer {
            let found = self.search_layer(query, &[current], 1, layer as usize, &|_| true);
            if let Some((id, _)) = found.first() {
                current = *id;
            }
            layer -= 1;
        }
        current
    }

    /// Heuristic neighbour diversity pruning: a candidate is kept only
    /// if it isn't already "covered" by a closer selected neighbour,
    /// which spreads edges out instead of clustering them all toward
    /// the single nearest candidate.
    fn select_neighbors(&self, candidates: &[(u32, f32)], m: usize) -> Vec<(u32, f32)> {
        let vectors = self.vectors.read();
        let mut selected: Vec<(u32, f32)> = Vec::with_capacity(m);
        for &(cand_id, cand_score) in candidates {
            if selected.len() >= m {
                break;
            }
            let cand_vec = &vectors[cand_id as usize];
            let dominated = selected.iter().any(|&(sel_id, _)| {
                let sel_vec = &vectors[sel_id as usize];
                self.score(cand_vec, sel_vec) < cand_score
            });
            if !dominated {
                selected.push((cand_id, cand_score));
            }
        }
        selected
    }

    fn add_link(&self, from: u32, to: u32, layer: usize) {
        let nodes = self.nodes.read();
        let mut neighbors = nodes[from as usize].layers[layer].write();
        if !neighbors.contains(&to) {
            neighbors.push(to);
        }
    }

    fn prune_connections(&self, node_id: u32, layer: usize) {
        let max_conn = if layer == 0 { self.m * 2 } else { self.m };
        let nodes = self.nodes.read();
        let vectors = self.vectors.read();
        let mut neighbors = nodes[node_id as usize].layers[layer].write();
        if neighbors.len() <= max_conn {
            return;
        }
        let node_vec = &vectors[node_id as usize];
        // Re-check size under the lock: a concurrent insert may have
        // added links since we decided to prune.
        let mut scored: Vec<(u32, f32)> = neighbors
            .iter()
            .map(|&nid| (nid, self.score(node_vec, &vectors[nid as usize])))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        scored.truncate(max_conn);
        *neighbors = scored.into_iter().map(|(id, _)| id).collect();
    }

    /// Inserts or overwrites `id`. Precondition: `vector.len() ==
    /// dim`. An id that already exists is tombstoned first.
    pub fn insert(&self, vector: &[Component], id: u64) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        if let Some(old_internal) = self.id_to_internal.get(&id).map(|r| *r) {
            self.deleted.write().insert(old_internal);
        }

        let level = self.random_level();
        let internal_id = {
            let mut nodes = self.nodes.write();
            let mut vectors = self.vectors.write();
            let mut internal_to_id = self.internal_to_id.write();
            let internal_id = nodes.len() as u32;
            let layers = (0..=level).map(|_| RwLock::new(Vec::new())).collect();
            nodes.push(Node { layers });
            vectors.push(vector.to_vec());
            internal_to_id.push(id);
            internal_id
        };
        self.id_to_internal.insert(id, internal_id);

        let prev_entry = self.entry_point.load(Ordering::SeqCst);
        if prev_entry == NONE_ENTRY {
            self.entry_point.store(internal_id, Ordering::SeqCst);
            self.max_layer.store(level, Ordering::SeqCst);
            return Ok(());
        }

        let max_layer = self.max_layer.load(Ordering::SeqCst);
        let mut current = if max_layer > level {
            self.greedy_closest(vector, max_layer, level, prev_entry)
        } else {
            prev_entry
        };

        let top = level.min(max_layer);
        let width = self.ef_construction.max(self.m);
        for layer in (0..=top).rev() {
            let candidates = self.search_layer(vector, &[current], width, layer as usize, &|nid| {
                !self.is_deleted(nid)
            });
            let selected = self.select_neighbors(&candidates, self.m);
            for &(neighbor_id, _) in &selected {
                self.add_link(internal_id, neighbor_id, layer as usize);
                self.add_link(neighbor_id, internal_id, layer as usize);
                self.prune_connections(neighbor_id, layer as usize);
            }
            if let Some(&(best_id, _)) = candidates.first() {
                current = best_id;
            }
        }

        if level > max_layer {
            self.max_layer.store(level, Ordering::SeqCst);
            self.entry_point.store(internal_id, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Tombstones `ids`; HNSW does not physically unlink graph edges
    /// on removal; it relies on the `is_valid`/`is_allowed`
    /// filter applied during search.
    pub fn remove(&self, ids: &[u64]) {
        for id in ids {
            if let Some(internal) = self.id_to_internal.get(id).map(|r| *r) {
                self.deleted.write().insert(internal);
            }
        }
    }

    pub fn search(
        &self,
        query: &[Component],
        k: usize,
        filter_bitmap: Option<&RoaringBitmap>,
        ef_search: usize,
    ) -> Result<(Vec<i64>, Vec<f32>), IndexError> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let entry = self.entry_point.load(Ordering::SeqCst);
        if entry == NONE_ENTRY {
            return Ok((vec![-1; k], vec![-1.0; k]));
        }

        let max_layer = self.max_layer.load(Ordering::SeqCst);
        let current = if max_layer > 0 {
            self.greedy_closest(query, max_layer, 0, entry)
        } else {
            entry
        };

        let internal_to_id = self.internal_to_id.read();
        let deleted = self.deleted.read();
        let is_allowed = |internal: u32| -> bool {
            if deleted.contains(internal) {
                return false;
            }
            match filter_bitmap {
                Some(bitmap) => {
                    let external = internal_to_id[internal as usize];
                    bitmap.contains(external as u32)
                }
                None => true,
            }
        };

        let ef = ef_search.max(k);
        let results = self.search_layer(query, &[current], ef, 0, &is_allowed);

        let mut ids = Vec::with_capacity(k);
        let mut distances = Vec::with_capacity(k);
        for (internal, score) in results.into_iter().take(k) {
            ids.push(internal_to_id[internal as usize] as i64);
            distances.push(self.unscore(score));
        }
        while ids.len() < k {
            ids.push(-1);
            distances.push(-1.0);
        }
        Ok((ids, distances))
    }

    pub fn count(&self) -> usize {
        self.nodes.read().len() - self.deleted.read().len() as usize
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let nodes = self.nodes.read();
        let vectors = self.vectors.read();
        let internal_to_id = self.internal_to_id.read();
        let deleted = self.deleted.read();

        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_u32::<LittleEndian>(self.dim as u32)?;
        w.write_u8(match self.metric {
            DistanceMetric::L2 => 0,
            DistanceMetric::InnerProduct => 1,
        })?;
        w.write_u32::<LittleEndian>(self.m as u32)?;
        w.write_u32::<LittleEndian>(self.ef_construction as u32)?;
        w.write_u32::<LittleEndian>(self.entry_point.load(Ordering::SeqCst))?;
        w.write_u32::<LittleEndian>(self.max_layer.load(Ordering::SeqCst))?;
        w.write_u64::<LittleEndian>(nodes.len() as u64)?;

        for (i, node) in nodes.iter().enumerate() {
            w.write_u64::<LittleEndian>(internal_to_id[i])?;
            for component in &vectors[i] {
                w.write_f32::<LittleEndian>(*component)?;
            }
            w.write_u32::<LittleEndian>(node.layers.len() as u32)?;
            for layer in &node.layers {
                let neighbors = layer.read();
                w.write_u32::<LittleEndian>(neighbors.len() as u32)?;
                for &n in neighbors.iter() {
                    w.write_u32::<LittleEndian>(n)?;
                }
            }
        }

        w.write_u64::<LittleEndian>(deleted.len())?;
        for internal_id in deleted.iter() {
            w.write_u32::<LittleEndian>(internal_id)?;
        }
        w.flush()?;
        Ok(())
    }

    /// `load` from a missing file is a no-op (warn), not an error.
    pub fn load(&self, path: &Path) -> Result<(), IndexError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "HnswIndex snapshot missing, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let mut r = BufReader::new(file);

        let dim = r.read_u32::<LittleEndian>()? as usize;
        if dim != self.dim {
            return Err(IndexError::Corrupt(format!(
                "snapshot dim {dim} does not match configured dim {}",
                self.dim
            )));
        }
        let _metric_byte = r.read_u8()?;
        let _m = r.read_u32::<LittleEndian>()?;
        let _ef_construction = r.read_u32::<LittleEndian>()?;
        let entry_point = r.read_u32::<LittleEndian>()?;
        let max_layer = r.read_u32::<LittleEndian>()?;
        let node_count = r.read_u64::<LittleEndian>()?;

        let mut new_nodes = Vec::with_capacity(node_count as usize);
        let mut new_vectors = Vec::with_capacity(node_count as usize);
        let mut new_internal_to_id = Vec::with_capacity(node_count as usize);
        let new_id_to_internal: DashMap<u64, u32> = DashMap::new();

        for i in 0..node_count {
            let id = r.read_u64::<LittleEndian>()?;
            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(r.read_f32::<LittleEndian>()?);
            }
            let num_layers = r.read_u32::<LittleEndian>()?;
            let mut layers = Vec::with_capacity(num_layers as usize);
            for _ in 0..num_layers {
                let neighbor_count = r.read_u32::<LittleEndian>()?;
                let mut neighbors = Vec::with_capacity(neighbor_count as usize);
                for _ in 0..neighbor_count {
                    neighbors.push(r.read_u32::<LittleEndian>()?);
                }
                layers.push(RwLock::new(neighbors));
            }
            new_nodes.push(Node { layers });
            new_vectors.push(vector);
            new_internal_to_id.push(id);
            new_id_to_internal.insert(id, i as u32);
        }

        let deleted_count = r.read_u64::<LittleEndian>()?;
        let mut deleted_bitmap = RoaringBitmap::new();
        for _ in 0..deleted_count {
            deleted_bitmap.insert(r.read_u32::<LittleEndian>()?);
        }

        *self.nodes.write() = new_nodes;
        *self.vectors.write() = new_vectors;
        *self.internal_to_id.write() = new_internal_to_id;
        self.id_to_internal.clear();
        for pair in new_id_to_internal {
            self.id_to_internal.insert(pair.0, pair.1);
        }
        *self.deleted.write() = deleted_bitmap;
        self.entry_point.store(entry_point, Ordering::SeqCst);
        self.max_layer.store(max_layer, Ordering::SeqCst);
        Ok(())
    }
}
