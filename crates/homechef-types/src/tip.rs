//! Tip types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who receives a tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
	Chef,
	Delivery,
}

impl fmt::Display for RecipientType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RecipientType::Chef => f.write_str("chef"),
			RecipientType::Delivery => f.write_str("delivery"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipStatus {
	Pending,
	/// Handed to the disbursement sink, awaiting acknowledgement.
	Processing,
	Completed,
	Failed,
}

impl TipStatus {
	/// A tip in one of these states blocks another tip for the same recipient.
	pub fn blocks_duplicate(&self) -> bool {
		matches!(
			self,
			TipStatus::Pending | TipStatus::Processing | TipStatus::Completed
		)
	}
}

/// A tip from the customer to the chef or the delivery partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
	pub id: String,
	pub order_id: String,
	pub customer_id: String,
	pub recipient_id: String,
	pub recipient_type: RecipientType,
	pub amount: Decimal,
	pub message: Option<String>,
	/// Caller-supplied token making `add_tip` replay-safe.
	pub client_token: Option<String>,
	pub status: TipStatus,
	/// Reference returned by the disbursement sink.
	pub transfer_id: Option<String>,
	pub failure_reason: Option<String>,
	pub created_at: DateTime<Utc>,
	pub processed_at: Option<DateTime<Utc>>,
}
