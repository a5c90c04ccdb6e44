//! Money arithmetic on `Decimal`.
//!
//! Amounts carry two decimal places. Rounding is banker's rounding
//! (half to even), applied once at the end of each computation.

use rust_decimal::{Decimal, RoundingStrategy};

const DECIMAL_PLACES: u32 = 2;

/// Tolerance for monetary comparisons (0.01).
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds to two places, half to even.
pub fn round_money(value: Decimal) -> Decimal {
	value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven)
}

/// Whether `value` already has at most two decimal places.
pub fn has_money_scale(value: Decimal) -> bool {
	value.normalize().scale() <= DECIMAL_PLACES
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	#[test]
	fn test_bankers_rounding() {
		assert_eq!(round_money(dec!(2.345)), dec!(2.34));
		assert_eq!(round_money(dec!(2.355)), dec!(2.36));
		assert_eq!(round_money(dec!(32.0)), dec!(32.00));
	}

	#[test]
	fn test_money_scale() {
		assert!(has_money_scale(dec!(10.50)));
		assert!(has_money_scale(dec!(10.500)));
		assert!(!has_money_scale(dec!(10.505)));
	}
}
