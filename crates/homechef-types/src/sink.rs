//! Sink contract types and dispatcher bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a sink is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkRole {
	/// Participant notifications (push, SMS, email bridges).
	Notification,
	/// Moves tip money to the recipient. Its acknowledgements complete tips.
	TipDisbursement,
}

impl fmt::Display for SinkRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SinkRole::Notification => f.write_str("notification"),
			SinkRole::TipDisbursement => f.write_str("tip_disbursement"),
		}
	}
}

/// Result of handing one event to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SinkOutcome {
	/// Delivered. `reference` carries the transfer id for tip disbursements.
	Accepted { reference: Option<String> },
	/// Transient failure; try again later.
	Retry { reason: String },
	/// The sink will never accept this event.
	PermanentFailure { reason: String },
}

impl SinkOutcome {
	pub fn accepted() -> Self {
		SinkOutcome::Accepted { reference: None }
	}
}

/// Delivery progress of one sink for one order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCursor {
	/// Highest outbox sequence delivered (or dead-lettered) to this sink.
	pub delivered_through: u64,
	/// Failed attempts on the event at `delivered_through + 1`.
	pub attempts: u32,
	/// Earliest time the head event may be retried.
	pub next_attempt_at: Option<DateTime<Utc>>,
	pub last_error: Option<String>,
}

/// All sink cursors for an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCursors {
	pub order_id: String,
	pub sinks: HashMap<String, DeliveryCursor>,
}

impl DeliveryCursors {
	pub fn new(order_id: impl Into<String>) -> Self {
		Self {
			order_id: order_id.into(),
			sinks: HashMap::new(),
		}
	}

	pub fn delivered_through(&self, sink: &str) -> u64 {
		self.sinks
			.get(sink)
			.map(|c| c.delivered_through)
			.unwrap_or(0)
	}

	/// Lowest sequence delivered across `sinks`.
	pub fn min_delivered_through<'a>(&self, sinks: impl Iterator<Item = &'a str>) -> u64 {
		sinks
			.map(|s| self.delivered_through(s))
			.min()
			.unwrap_or(0)
	}
}

/// An event a sink could not take, kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
	pub order_id: String,
	pub sequence: u64,
	pub sink: String,
	pub delivery_key: String,
	pub event_kind: String,
	pub attempts: u32,
	pub reason: String,
	pub recorded_at: DateTime<Utc>,
}

impl DeadLetter {
	/// Storage id: one dead letter per (order, sequence, sink).
	pub fn storage_id(&self) -> String {
		format!("{}-{}-{}", self.order_id, self.sequence, self.sink)
	}
}
