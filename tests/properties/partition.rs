use alloy::primitives::{Address, U256};
use bulk_sender::ledger::TransferEntry;
use bulk_sender::partition::partition;
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestCaseError, TestRunner};

fn entry_strategy() -> impl Strategy<Value = TransferEntry> {
    (any::<[u8; 20]>(), 1u64..u64::MAX).prop_map(|(bytes, amount)| TransferEntry {
        address: Address::from(bytes),
        amount: U256::from(amount),
    })
}

#[test]
fn partition_reassembles_input_exactly() {
    let mut runner = TestRunner::new(ProptestConfig {
        cases: 2_000,
        ..ProptestConfig::default()
    });
    let strategy = (prop::collection::vec(entry_strategy(), 0..300), 1usize..64);

    let result = runner.run(&strategy, |(entries, batch_size)| {
        let batches = partition(&entries, batch_size)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;

        let rebuilt: Vec<TransferEntry> = batches
            .iter()
            .flat_map(|batch| batch.entries.iter().copied())
            .collect();
        prop_assert_eq!(&rebuilt, &entries);
        prop_assert_eq!(batches.len(), entries.len().div_ceil(batch_size));

        for (position, batch) in batches.iter().enumerate() {
            prop_assert_eq!(batch.index, position);
            prop_assert!(!batch.is_empty());
            if position + 1 < batches.len() {
                prop_assert_eq!(batch.len(), batch_size);
            } else {
                prop_assert!(batch.len() <= batch_size);
            }
        }

        let again = partition(&entries, batch_size)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert_eq!(again, batches);
        Ok(())
    });

    if let Err(err) = result {
        panic!("partition completeness proptest failed: {err}");
    }
}
