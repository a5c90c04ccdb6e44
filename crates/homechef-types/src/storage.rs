//! Storage-related types for the order engine.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// This enum provides type safety for storage operations by replacing
/// string literals with strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order aggregates keyed by order id
	Orders,
	/// Maps order numbers to order ids
	OrderNumbers,
	/// The cancellation policy ledger
	CancellationPolicies,
	/// Per-order sink delivery cursors
	DeliveryCursors,
	/// Events sinks gave up on
	DeadLetters,
	/// Countdown expiry of orders still in `PaymentConfirmed`
	Countdowns,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderNumbers => "order_numbers",
			StorageKey::CancellationPolicies => "cancellation_policies",
			StorageKey::DeliveryCursors => "delivery_cursors",
			StorageKey::DeadLetters => "dead_letters",
			StorageKey::Countdowns => "countdowns",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderNumbers,
			Self::CancellationPolicies,
			Self::DeliveryCursors,
			Self::DeadLetters,
			Self::Countdowns,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"order_numbers" => Ok(Self::OrderNumbers),
			"cancellation_policies" => Ok(Self::CancellationPolicies),
			"delivery_cursors" => Ok(Self::DeliveryCursors),
			"dead_letters" => Ok(Self::DeadLetters),
			"countdowns" => Ok(Self::Countdowns),
			_ => Err(()),
		}
	}
}
