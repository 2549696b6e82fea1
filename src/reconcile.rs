//! Offline reconciliation of balance snapshots against expected transfers.
//!
//! Pure over its three inputs. Every address in the expected-transfer source
//! gets exactly one result, in that source's order; addresses that only appear
//! in a balance snapshot are ignored. A side missing from a snapshot counts as
//! a zero balance.

use crate::ledger::LedgerMap;
use crate::report::{decimal_i256, decimal_i256_opt, decimal_u256, decimal_u256_opt, hex_address};
use crate::sampling::signed_delta;
use alloy::primitives::{Address, I256, U256};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    #[serde(with = "hex_address")]
    pub address: Address,
    #[serde(with = "decimal_u256")]
    pub start_balance: U256,
    #[serde(with = "decimal_u256")]
    pub expected_amount: U256,
    #[serde(with = "decimal_u256")]
    pub end_balance: U256,
    /// `None` when `start + expected` does not fit in a uint256; such a row
    /// never matches.
    #[serde(with = "decimal_u256_opt")]
    pub calculated_end: Option<U256>,
    pub matches: bool,
    /// `end - (start + expected)`; `None` when the balances match or the
    /// calculated end overflowed.
    #[serde(with = "decimal_i256_opt")]
    pub difference: Option<I256>,
}

pub fn reconcile(
    start: &LedgerMap,
    end: &LedgerMap,
    expected: &LedgerMap,
) -> Vec<VerificationResult> {
    expected
        .iter()
        .map(|(address, expected_amount)| {
            let start_balance = start.get_or_zero(&address);
            let end_balance = end.get_or_zero(&address);
            let calculated_end = start_balance.checked_add(expected_amount);
            if calculated_end.is_none() {
                tracing::warn!(
                    "[RECON] {address:#x}: start {start_balance} + expected {expected_amount} overflows uint256"
                );
            }
            let matches = calculated_end == Some(end_balance);
            VerificationResult {
                address,
                start_balance,
                expected_amount,
                end_balance,
                calculated_end,
                matches,
                difference: calculated_end
                    .filter(|_| !matches)
                    .map(|calculated| signed_delta(end_balance, calculated)),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    /// Percentage of matching addresses; 0 for an empty input.
    pub success_rate: f64,
    /// Sum of every signed difference.
    #[serde(with = "decimal_i256")]
    pub total_discrepancy: I256,
    pub mismatches: Vec<VerificationResult>,
    pub results: Vec<VerificationResult>,
}

impl ReconciliationReport {
    pub fn from_results(results: Vec<VerificationResult>) -> Self {
        let total = results.len();
        let mismatches: Vec<VerificationResult> =
            results.iter().filter(|r| !r.matches).copied().collect();
        let mismatched = mismatches.len();
        let matched = total - mismatched;
        let success_rate = if total == 0 {
            0.0
        } else {
            matched as f64 / total as f64 * 100.0
        };
        let total_discrepancy = mismatches
            .iter()
            .filter_map(|r| r.difference)
            .fold(I256::ZERO, |acc, diff| acc.saturating_add(diff));

        tracing::info!(
            "[RECON] {matched}/{total} addresses match, total discrepancy {total_discrepancy}"
        );
        for mismatch in &mismatches {
            tracing::warn!(
                "[RECON] mismatch {:#x}: expected end {}, observed {}",
                mismatch.address,
                display_calculated(mismatch.calculated_end),
                mismatch.end_balance
            );
        }

        Self {
            total,
            matched,
            mismatched,
            success_rate,
            total_discrepancy,
            mismatches,
            results,
        }
    }

    pub fn all_match(&self) -> bool {
        self.mismatched == 0
    }

    /// Human summary: counts, success rate, the first `first_mismatches`
    /// mismatches, the first `first_matches` matches, and the total discrepancy.
    pub fn render_summary(&self, first_mismatches: usize, first_matches: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Reconciliation summary");
        let _ = writeln!(out, "  addresses checked : {}", self.total);
        let _ = writeln!(out, "  matched           : {}", self.matched);
        let _ = writeln!(out, "  mismatched        : {}", self.mismatched);
        let _ = writeln!(out, "  success rate      : {:.2}%", self.success_rate);

        if !self.mismatches.is_empty() {
            let _ = writeln!(out, "Mismatches (first {}):", first_mismatches.min(self.mismatched));
            for r in self.mismatches.iter().take(first_mismatches) {
                let _ = writeln!(
                    out,
                    "  {:#x} start={} expected={} end={} calculated={} difference={}",
                    r.address,
                    r.start_balance,
                    r.expected_amount,
                    r.end_balance,
                    display_calculated(r.calculated_end),
                    r.difference.unwrap_or(I256::ZERO)
                );
            }
        }

        let matches: Vec<&VerificationResult> =
            self.results.iter().filter(|r| r.matches).take(first_matches).collect();
        if !matches.is_empty() {
            let _ = writeln!(out, "Matches (first {}):", matches.len());
            for r in matches {
                let _ = writeln!(
                    out,
                    "  {:#x} start={} expected={} end={}",
                    r.address, r.start_balance, r.expected_amount, r.end_balance
                );
            }
        }

        let _ = writeln!(out, "Total discrepancy: {}", self.total_discrepancy);
        out
    }
}

fn display_calculated(calculated_end: Option<U256>) -> String {
    calculated_end.map_or_else(|| "overflow".to_string(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(rows: &[(u8, u64)]) -> LedgerMap {
        rows.iter()
            .map(|(byte, amount)| (Address::with_last_byte(*byte), U256::from(*amount)))
            .collect()
    }

    #[test]
    fn matching_transfer_has_no_difference() {
        let results = reconcile(&ledger(&[(1, 100)]), &ledger(&[(1, 150)]), &ledger(&[(1, 50)]));
        assert_eq!(results.len(), 1);
        assert!(results[0].matches);
        assert_eq!(results[0].calculated_end, Some(U256::from(150u64)));
        assert_eq!(results[0].difference, None);
    }

    #[test]
    fn overflowing_calculated_end_is_a_mismatch() {
        let address = Address::with_last_byte(4);
        let start: LedgerMap = [(address, U256::MAX)].into_iter().collect();
        let end: LedgerMap = [(address, U256::MAX)].into_iter().collect();
        let expected: LedgerMap = [(address, U256::from(1u64))].into_iter().collect();

        let results = reconcile(&start, &end, &expected);
        assert!(!results[0].matches);
        assert_eq!(results[0].calculated_end, None);
        assert_eq!(results[0].difference, None);

        let report = ReconciliationReport::from_results(results);
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.total_discrepancy, I256::ZERO);
        assert!(report.render_summary(5, 5).contains("calculated=overflow"));
        let json = serde_json::to_value(&report.results[0]).unwrap();
        assert!(json["calculated_end"].is_null());
    }

    #[test]
    fn missing_start_defaults_to_zero() {
        let results = reconcile(&ledger(&[]), &ledger(&[(2, 10)]), &ledger(&[(2, 30)]));
        assert!(!results[0].matches);
        assert_eq!(results[0].difference, Some(I256::try_from(-20i64).unwrap()));
    }

    #[test]
    fn order_follows_expected_and_ignores_extra_addresses() {
        let expected = ledger(&[(3, 1), (1, 1), (2, 1)]);
        let end = ledger(&[(9, 5), (1, 1), (2, 1), (3, 1)]);
        let results = reconcile(&LedgerMap::new(), &end, &expected);
        let order: Vec<Address> = results.iter().map(|r| r.address).collect();
        assert_eq!(
            order,
            vec![
                Address::with_last_byte(3),
                Address::with_last_byte(1),
                Address::with_last_byte(2)
            ]
        );
        assert!(results.iter().all(|r| r.matches));
    }

    #[test]
    fn report_aggregates_signed_discrepancy() {
        let start = ledger(&[(1, 100), (2, 0), (3, 5)]);
        let expected = ledger(&[(1, 50), (2, 30), (3, 5)]);
        let end = ledger(&[(1, 150), (2, 10), (3, 17)]);
        let report = ReconciliationReport::from_results(reconcile(&start, &end, &expected));

        assert_eq!(report.total, 3);
        assert_eq!(report.matched, 1);
        assert_eq!(report.mismatched, 2);
        // -20 for the short address, +7 for the over-credited one.
        assert_eq!(report.total_discrepancy, I256::try_from(-13i64).unwrap());
        assert!((report.success_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!(!report.all_match());

        let summary = report.render_summary(10, 10);
        assert!(summary.contains("success rate      : 33.33%"));
        assert!(summary.contains("difference=-20"));
        assert!(summary.contains("Total discrepancy: -13"));
    }

    #[test]
    fn empty_expected_source_is_vacuously_clean() {
        let report = ReconciliationReport::from_results(Vec::new());
        assert_eq!(report.success_rate, 0.0);
        assert!(report.all_match());
        assert_eq!(report.total_discrepancy, I256::ZERO);
    }

    #[test]
    fn json_uses_decimal_strings() {
        let results = reconcile(&ledger(&[]), &ledger(&[(2, 10)]), &ledger(&[(2, 30)]));
        let json = serde_json::to_value(ReconciliationReport::from_results(results)).unwrap();
        assert_eq!(json["total_discrepancy"], "-20");
        assert_eq!(json["mismatches"][0]["difference"], "-20");
        assert_eq!(json["mismatches"][0]["expected_amount"], "30");
        assert!(json["results"][0]["matches"] == false);
    }
}
