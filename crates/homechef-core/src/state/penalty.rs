//! Cancellation penalty arithmetic.

use chrono::{DateTime, Utc};
use homechef_types::{
	round_money, CancellationPolicy, CancellationType, Order, PaymentStatus,
};
use rust_decimal::Decimal;

/// Split of an order total into what is withheld and what is refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyQuote {
	pub kind: CancellationType,
	pub penalty: Decimal,
	/// Always `total - penalty`.
	pub refund: Decimal,
}

impl PenaltyQuote {
	/// Nothing withheld.
	pub fn free(total: Decimal) -> Self {
		Self {
			kind: CancellationType::Free,
			penalty: Decimal::ZERO,
			refund: total,
		}
	}
}

/// Prices a cancellation of `total` under `policy`.
///
/// Outside the free window the penalty is `total * rate`, clamped into
/// `[min_penalty, max_penalty]` and never above the total itself.
pub fn quote(total: Decimal, policy: &CancellationPolicy, free: bool) -> PenaltyQuote {
	if free {
		return PenaltyQuote::free(total);
	}
	let raw = total * policy.penalty_rate;
	let penalty = round_money(
		raw.max(policy.min_penalty)
			.min(policy.max_penalty)
			.min(total)
			.max(Decimal::ZERO),
	);
	PenaltyQuote {
		kind: CancellationType::Penalty,
		penalty,
		refund: total - penalty,
	}
}

/// Whether a customer cancelling `order` at `now` pays nothing.
///
/// Uses the window captured on the order, not the live policy's.
pub fn is_free_for_customer(order: &Order, now: DateTime<Utc>) -> bool {
	order.free_cancel_open(now)
}

/// Prices a customer cancellation of `order` at `now`.
pub fn customer_quote(
	order: &Order,
	policy: &CancellationPolicy,
	now: DateTime<Utc>,
) -> PenaltyQuote {
	quote(order.money.total, policy, is_free_for_customer(order, now))
}

/// Payment state after refunding `refund` out of `total`.
pub fn payment_status_after_refund(refund: Decimal, total: Decimal) -> PaymentStatus {
	if refund == total {
		PaymentStatus::Refunded
	} else if refund > Decimal::ZERO {
		PaymentStatus::PartiallyRefunded
	} else {
		PaymentStatus::Paid
	}
}
