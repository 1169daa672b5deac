//! Exercises HNSW search quality across two well-separated clusters:
//! a query near one cluster should only ever surface that cluster's
//! ids, which is only true if graph traversal actually reaches every
//! inserted node rather than getting stuck in one region.

use hyperspace_core::DistanceMetric;
use hyperspace_index::HnswIndex;

const DIM: usize = 8;

#[test]
fn search_separates_two_distant_clusters() {
    let index = HnswIndex::new(DIM, DistanceMetric::L2, 16, 100);

    for i in 0..64u64 {
        let base = 0.1 + (i as f32) * 0.001;
        let vector = vec![base; DIM];
        index.insert(&vector, i).unwrap();
    }
    for i in 64..128u64 {
        let base = 50.0 + (i as f32) * 0.001;
        let vector = vec![base; DIM];
        index.insert(&vector, i).unwrap();
    }

    let (ids, _distances) = index
        .search(&vec![0.1; DIM], 16, None, 64)
        .expect("search");
    assert!(ids.iter().all(|&id| id == -1 || id < 64));

    let (ids, _distances) = index
        .search(&vec![50.0; DIM], 16, None, 64)
        .expect("search");
    assert!(ids.iter().all(|&id| id == -1 || id >= 64));
}

#[test]
fn higher_ef_search_never_returns_fewer_hits_than_lower_ef() {
    let index = HnswIndex::new(DIM, DistanceMetric::L2, 8, 64);
    for i in 0..300u64 {
        let vector: Vec<f32> = (0..DIM).map(|j| ((i + j as u64) % 97) as f32).collect();
        index.insert(&vector, i).unwrap();
    }

    let query = vec![10.0; DIM];
    let (low_ids, _) = index.search(&query, 20, None, 20).unwrap();
    let (high_ids, _) = index.search(&query, 20, None, 200).unwrap();

    let low_hits = low_ids.iter().filter(|&&id| id != -1).count();
    let high_hits = high_ids.iter().filter(|&&id| id != -1).count();
    assert!(high_hits >= low_hits);
}
