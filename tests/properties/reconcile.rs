use alloy::primitives::{Address, I256, U256};
use bulk_sender::ledger::LedgerMap;
use bulk_sender::reconcile::{reconcile, ReconciliationReport};
use proptest::prelude::*;

fn ledger_strategy() -> impl Strategy<Value = LedgerMap> {
    prop::collection::vec((0u8..24, any::<u128>()), 0..24).prop_map(|rows| {
        rows.into_iter()
            .map(|(byte, amount)| (Address::with_last_byte(byte), U256::from(amount)))
            .collect()
    })
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn reconciliation_matches_iff_end_equals_start_plus_expected(
        start in ledger_strategy(),
        end in ledger_strategy(),
        expected in ledger_strategy(),
    ) {
        let results = reconcile(&start, &end, &expected);
        prop_assert_eq!(results.len(), expected.len());

        for (result, (address, amount)) in results.iter().zip(expected.iter()) {
            prop_assert_eq!(result.address, address);
            let start_balance = start.get_or_zero(&address);
            let end_balance = end.get_or_zero(&address);
            let calculated = start_balance + amount;

            prop_assert_eq!(result.matches, end_balance == calculated);
            if result.matches {
                prop_assert_eq!(result.difference, None);
            } else {
                prop_assert_eq!(
                    result.difference,
                    Some(signed(end_balance) - signed(calculated))
                );
            }
        }

        let report = ReconciliationReport::from_results(results.clone());
        prop_assert_eq!(report.matched + report.mismatched, report.total);
        let summed = results
            .iter()
            .filter_map(|r| r.difference)
            .fold(I256::ZERO, |acc, d| acc + d);
        prop_assert_eq!(report.total_discrepancy, summed);
    }
}

#[test]
fn end_to_end_reconciliation_scenarios() {
    let addr1 = Address::with_last_byte(1);
    let addr2 = Address::with_last_byte(2);

    let start: LedgerMap = [(addr1, U256::from(100u64))].into_iter().collect();
    let expected: LedgerMap = [(addr1, U256::from(50u64))].into_iter().collect();
    let end: LedgerMap = [(addr1, U256::from(150u64))].into_iter().collect();
    let results = reconcile(&start, &end, &expected);
    assert!(results[0].matches);
    assert_eq!(results[0].difference, None);

    let expected: LedgerMap = [(addr2, U256::from(30u64))].into_iter().collect();
    let end: LedgerMap = [(addr2, U256::from(10u64))].into_iter().collect();
    let results = reconcile(&LedgerMap::new(), &end, &expected);
    assert!(!results[0].matches);
    assert_eq!(results[0].difference, Some(I256::try_from(-20i64).unwrap()));
}
