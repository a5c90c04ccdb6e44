//! Retry delays for sink deliveries.

use std::time::Duration;

/// Delay before retry number `attempts` (1-based): `base * 2^(attempts - 1)`,
/// capped at `max`.
pub fn retry_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
	let exponent = attempts.saturating_sub(1);
	let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
	base.checked_mul(factor).unwrap_or(max).min(max)
}
