//! Property tests for queue weight accounting and purge partitioning.

use cadenza_pipeline::{BlockingQueue, GetResult, QueueWeight};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Item(u32);

impl QueueWeight for Item {
    fn weight(&self) -> usize {
        (self.0 % 7) as usize + 1
    }
}

proptest! {
    #[test]
    fn purge_partitions_preserving_order(
        values in prop::collection::vec(0u32..1000, 0..64),
        modulus in 1u32..5,
    ) {
        let queue = BlockingQueue::new();
        for &v in &values {
            queue.push(Item(v));
        }

        let removed: Vec<u32> = queue
            .purge(|item| item.0 % modulus == 0)
            .iter()
            .map(|item| item.0)
            .collect();
        let expected_removed: Vec<u32> =
            values.iter().copied().filter(|v| v % modulus == 0).collect();
        prop_assert_eq!(removed, expected_removed);

        let mut kept = Vec::new();
        while let GetResult::Ready(item) = queue.get(false) {
            kept.push(item.0);
        }
        let expected_kept: Vec<u32> =
            values.iter().copied().filter(|v| v % modulus != 0).collect();
        prop_assert_eq!(kept, expected_kept);
        prop_assert_eq!(queue.queued_weight(), 0);
    }

    #[test]
    fn queued_weight_tracks_contents(values in prop::collection::vec(0u32..1000, 0..64)) {
        let queue = BlockingQueue::new();
        let mut expected: usize = 0;
        for &v in &values {
            queue.push(Item(v));
            expected += Item(v).weight();
            prop_assert_eq!(queue.queued_weight(), expected);
        }
        while let GetResult::Ready(item) = queue.get(false) {
            expected -= item.weight();
            prop_assert_eq!(queue.queued_weight(), expected);
        }
        prop_assert_eq!(expected, 0);
    }
}
