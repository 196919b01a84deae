//! Property-based tests for merge ordering

use proptest::prelude::*;
use std::sync::Arc;
use chunkyard_engine::*;

fn payloads_and_order() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<usize>)> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..24).prop_flat_map(|payloads| {
        let order: Vec<usize> = (0..payloads.len()).collect();
        (Just(payloads), Just(order).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn props_any_arrival_order_merges_in_index_order((payloads, order) in payloads_and_order()) {
        let (chunkyard, _temp) = Chunkyard::temp().unwrap();

        for &i in &order {
            chunkyard
                .receive(Some("prop"), Some(&i.to_string()), &payloads[i])
                .unwrap();
        }

        let merged = chunkyard.merge(Some("prop"), Some("prop.bin"), None).unwrap();
        let expected: Vec<u8> = payloads.concat();

        prop_assert_eq!(merged.chunk_count, payloads.len() as u64);
        prop_assert_eq!(merged.bytes_written, expected.len() as u64);
        prop_assert_eq!(std::fs::read(&merged.path).unwrap(), expected);
    }

    #[test]
    fn props_sparse_indices_merge_ascending(
        indices in prop::collection::btree_set(0u64..10_000, 1..16)
    ) {
        let files = tempfile::tempdir().unwrap();
        let chunkyard = Chunkyard::new(
            Arc::new(MemoryChunkStore::new()),
            ArtifactStore::new(files.path()).unwrap(),
        );

        // Insert in descending order; the merge must still come out ascending
        for index in indices.iter().rev() {
            let payload = format!("[{}]", index);
            chunkyard
                .receive(Some("sparse"), Some(&index.to_string()), payload.as_bytes())
                .unwrap();
        }

        let merged = chunkyard.merge(Some("sparse"), Some("sparse.txt"), None).unwrap();
        let expected: String = indices.iter().map(|i| format!("[{}]", i)).collect();
        prop_assert_eq!(std::fs::read_to_string(&merged.path).unwrap(), expected);
    }
}
