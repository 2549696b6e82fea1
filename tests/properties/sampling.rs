use bulk_sender::sampling::{sample_size, IndexSampler, RandomIndexSampler};
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn sample_count_is_clamped_tenth_without_repeats(len in 1usize..5_000, seed in any::<u64>()) {
        let count = sample_size(len);
        prop_assert_eq!(count, len.div_ceil(10).clamp(1, 10));
        prop_assert!(count <= len);

        let picked = RandomIndexSampler::seeded(seed).sample(len, count);
        prop_assert_eq!(picked.len(), count);
        prop_assert!(picked.iter().all(|idx| *idx < len));
        prop_assert_eq!(picked.iter().collect::<HashSet<_>>().len(), count);
    }
}
