use alloy::primitives::U256;
use bulk_sender::ledger::parse_amount;
use proptest::prelude::*;

fn with_thousands_separators(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

proptest! {
    #[test]
    fn decimal_amounts_round_trip(words in any::<[u64; 4]>(), grouped in any::<bool>()) {
        let value = U256::from_limbs(words);
        let digits = value.to_string();
        let raw = if grouped { with_thousands_separators(&digits) } else { digits };
        prop_assert_eq!(parse_amount(1, &raw).unwrap(), value);
        prop_assert_eq!(parse_amount(1, &format!(" \"{raw}\" ")).unwrap(), value);
    }

    #[test]
    fn letters_signs_and_decimals_are_rejected(
        digits in "[0-9]{1,12}",
        junk in prop::sample::select(vec!["-", "a", "e", ".5", "x", "+"]),
        prefix in any::<bool>(),
    ) {
        let raw = if prefix { format!("{junk}{digits}") } else { format!("{digits}{junk}") };
        prop_assert!(parse_amount(7, &raw).is_err());
    }
}

#[test]
fn grouping_helper_matches_common_notation() {
    assert_eq!(with_thousands_separators("1234567"), "1,234,567");
    assert_eq!(with_thousands_separators("100"), "100");
}
