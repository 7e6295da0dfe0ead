//! Decimal helpers for price and quantity math.
//!
//! Every monetary value in the crate is a `rust_decimal::Decimal`. Nothing in the
//! trade path goes through floating point.

use rust_decimal::prelude::*;
use std::sync::OnceLock;

static HUNDRED: OnceLock<Decimal> = OnceLock::new();

fn get_hundred() -> &'static Decimal {
    HUNDRED.get_or_init(|| Decimal::from(100))
}

/// Lot step assumed when the exchange does not publish one (`0.00000001`).
pub fn default_lot_size() -> Decimal {
    Decimal::new(1, 8)
}

/// Parse a decimal from its string form.
///
/// Plain notation is tried first, then scientific (`1e-8`), which some feeds
/// emit for very small sizes.
pub fn parse_decimal(s: &str) -> Result<Decimal, rust_decimal::Error> {
    let s = s.trim();
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))
}

/// Render a decimal without trailing zeros.
pub fn format_decimal(value: &Decimal) -> String {
    value.normalize().to_string()
}

/// `amount * percent / 100`.
///
/// The percentage is scaled first, so the result never exceeds `amount` in
/// magnitude for percentages up to 100.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * (percent / *get_hundred())
}

/// Largest multiple of `lot` that does not exceed `amount`.
///
/// A non-positive lot leaves the amount untouched; a non-positive amount
/// quantizes to zero.
pub fn quantize_down(amount: Decimal, lot: Decimal) -> Decimal {
    if lot <= Decimal::ZERO {
        return amount;
    }
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    match amount.checked_div(lot) {
        Some(lots) => lots.floor() * lot,
        None => amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("0.01").unwrap(), dec!(0.01));
        assert_eq!(parse_decimal(" 1.0 ").unwrap(), dec!(1));
        assert_eq!(parse_decimal("1e-8").unwrap(), dec!(0.00000001));
        assert!(parse_decimal("abc").is_err());
        assert!(parse_decimal("").is_err());
    }

    #[test]
    fn test_format_decimal_strips_trailing_zeros() {
        assert_eq!(format_decimal(&dec!(1.2300)), "1.23");
        assert_eq!(format_decimal(&dec!(100)), "100");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec!(200), dec!(0.25)), dec!(0.5));
        assert_eq!(percent_of(dec!(1), dec!(0)), dec!(0));
    }

    #[test]
    fn test_percent_of_large_amount() {
        assert_eq!(percent_of(Decimal::MAX, dec!(100)), Decimal::MAX);
        assert!(percent_of(Decimal::MAX, dec!(0.25)) < Decimal::MAX);
    }

    #[test]
    fn test_quantize_down() {
        assert_eq!(quantize_down(dec!(1.23456), dec!(0.01)), dec!(1.23));
        assert_eq!(quantize_down(dec!(1.23), dec!(0.01)), dec!(1.23));
        assert_eq!(quantize_down(dec!(0.009), dec!(0.01)), dec!(0));
        assert_eq!(quantize_down(dec!(7), dec!(2)), dec!(6));
    }

    #[test]
    fn test_quantize_down_repeating_fraction() {
        let target = dec!(100) / dec!(3);
        let lot = default_lot_size();
        let q = quantize_down(target, lot);

        assert_eq!(q, dec!(33.33333333));
        assert!((q % lot).is_zero());
        assert!(q <= target);
    }

    #[test]
    fn test_quantize_down_edge_lots() {
        assert_eq!(quantize_down(dec!(1.5), dec!(0)), dec!(1.5));
        assert_eq!(quantize_down(dec!(1.5), dec!(-1)), dec!(1.5));
        assert_eq!(quantize_down(dec!(-1), dec!(0.1)), dec!(0));
    }
}
