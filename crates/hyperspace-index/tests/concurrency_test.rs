use hyperspace_core::DistanceMetric;
use hyperspace_index::{FlatIndex, HnswIndex};
use std::sync::Arc;
use std::thread;

const DIM: usize = 4;

#[test]
fn concurrent_hnsw_inserts_do_not_panic_and_preserve_every_id() {
    let index = Arc::new(HnswIndex::new(DIM, DistanceMetric::L2, 16, 100));

    let num_threads = 8;
    let items_per_thread = 200;
    let mut handles = vec![];

    for t in 0..num_threads {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            use rand::Rng;
            for j in 0..items_per_thread {
                let id = (t * items_per_thread + j) as u64;
                let vector: Vec<f32> = (0..DIM).map(|_| rng.gen_range(0.0..100.0)).collect();
                index.insert(&vector, id).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(index.count(), num_threads * items_per_thread);
}

#[test]
fn concurrent_flat_inserts_and_searches_do_not_panic() {
    let index = Arc::new(FlatIndex::new(DIM, DistanceMetric::L2));

    let writer = {
        let index = index.clone();
        thread::spawn(move || {
            for i in 0..2000u64 {
                index.insert(&[i as f32; DIM], i).unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let index = index.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..200 {
                let _ = index.search(&[0.0; DIM], 10, None);
            }
        }));
    }

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(index.count(), 2000);
}
