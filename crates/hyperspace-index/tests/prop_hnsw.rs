use hyperspace_core::DistanceMetric;
use hyperspace_index::HnswIndex;
use proptest::prelude::*;

const DIM: usize = 4;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-100.0f32..100.0, DIM)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Every inserted vector must be its own exact nearest neighbour
    /// (distance ~0) once ef_search is generous enough to guarantee
    /// recall at this scale.
    #[test]
    fn every_inserted_vector_recalls_itself(vectors in proptest::collection::vec(arb_vector(), 20..60)) {
        let index = HnswIndex::new(DIM, DistanceMetric::L2, 16, 200);

        for (i, vector) in vectors.iter().enumerate() {
            index.insert(vector, i as u64).unwrap();
        }

        for (i, vector) in vectors.iter().enumerate() {
            let (ids, distances) = index.search(vector, 1, None, 200).unwrap();
            prop_assert_eq!(ids[0], i as i64);
            prop_assert!(distances[0] < 1e-3);
        }
    }
}
