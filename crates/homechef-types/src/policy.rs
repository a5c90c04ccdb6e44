//! Cancellation policy types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A version of the cancellation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
	pub version: u64,
	/// Length of the free-cancellation window.
	pub free_window_seconds: u64,
	/// Fraction of the order total withheld outside the window, in [0, 1].
	pub penalty_rate: Decimal,
	pub min_penalty: Decimal,
	pub max_penalty: Decimal,
	pub description: String,
	pub is_active: bool,
	pub updated_by: String,
	pub updated_at: DateTime<Utc>,
}

/// Partial update applied on top of the active policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPatch {
	pub free_window_seconds: Option<u64>,
	pub penalty_rate: Option<Decimal>,
	pub min_penalty: Option<Decimal>,
	pub max_penalty: Option<Decimal>,
	pub description: Option<String>,
}

impl PolicyPatch {
	pub fn is_empty(&self) -> bool {
		self.free_window_seconds.is_none()
			&& self.penalty_rate.is_none()
			&& self.min_penalty.is_none()
			&& self.max_penalty.is_none()
			&& self.description.is_none()
	}
}

/// Every policy version ever written, oldest first.
///
/// Stored as a single document so that appending a version and deactivating
/// its predecessor is one atomic write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLedger {
	pub rows: Vec<CancellationPolicy>,
}

impl PolicyLedger {
	pub fn active(&self) -> Option<&CancellationPolicy> {
		self.rows.iter().rev().find(|p| p.is_active)
	}

	pub fn latest_version(&self) -> u64 {
		self.rows.last().map(|p| p.version).unwrap_or(0)
	}

	/// Deactivates every row and appends `next` as the only active one.
	pub fn push_active(&mut self, mut next: CancellationPolicy) {
		for row in &mut self.rows {
			row.is_active = false;
		}
		next.is_active = true;
		self.rows.push(next);
	}
}
