//! Event types for the order engine.
//!
//! [`OrderEvent`] rows live in the order's outbox and are delivered to sinks
//! by the dispatcher. [`EngineEvent`] is the in-process notification that
//! flows through the event bus so background workers wake up promptly.

use crate::{Actor, OrderStatus, RecipientType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
	pub order_id: String,
	/// Per-order outbox sequence starting at 1.
	pub sequence: u64,
	pub kind: OrderEventKind,
	pub actor: Actor,
	pub timestamp: DateTime<Utc>,
	/// Snapshot of fields a participant needs to render a notification.
	pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEventKind {
	/// Status changed. `from` is `None` for the creation event.
	StatusChanged {
		from: Option<OrderStatus>,
		to: OrderStatus,
		/// Status history row this event corresponds to.
		history_sequence: u64,
	},
	/// A tip was created and is waiting for disbursement.
	TipAdded {
		tip_id: String,
		recipient_type: RecipientType,
		recipient_id: String,
		amount: Decimal,
	},
	TipCompleted {
		tip_id: String,
		transfer_id: Option<String>,
	},
	TipFailed {
		tip_id: String,
		reason: String,
	},
}

impl OrderEventKind {
	pub fn name(&self) -> &'static str {
		match self {
			OrderEventKind::StatusChanged { .. } => "status_changed",
			OrderEventKind::TipAdded { .. } => "tip_added",
			OrderEventKind::TipCompleted { .. } => "tip_completed",
			OrderEventKind::TipFailed { .. } => "tip_failed",
		}
	}
}

/// In-process notifications published on the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
	/// A transition committed and appended to the outbox.
	Committed { order_id: String, version: u64 },
	/// A countdown was registered for an order.
	CountdownScheduled {
		order_id: String,
		expiry: DateTime<Utc>,
		version: u64,
	},
	/// A new cancellation policy version became active.
	PolicyUpdated { version: u64 },
}
