//! Order aggregate types.
//!
//! An order is persisted as a single [`OrderRecord`]: the order row itself,
//! its item snapshots, the append-only status history, tips and the outbox
//! of events awaiting delivery. Keeping them in one record lets a transition
//! commit state, history and outbox with a single compare-and-swap.

use crate::{ActorRole, OrderEvent, Tip};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Paid; the free-cancellation countdown is running.
	PaymentConfirmed,
	/// Countdown elapsed; waiting for the chef.
	SentToChef,
	ChefAccepted,
	Preparing,
	ReadyForPickup,
	DeliveryAssigned,
	PickedUp,
	OutForDelivery,
	/// Terminal. Tips may still be added.
	Delivered,
	/// Terminal.
	Cancelled,
	/// Terminal.
	ChefDeclined,
}

impl OrderStatus {
	/// Returns true for states that admit no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::ChefDeclined
		)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PaymentConfirmed => "payment_confirmed",
			OrderStatus::SentToChef => "sent_to_chef",
			OrderStatus::ChefAccepted => "chef_accepted",
			OrderStatus::Preparing => "preparing",
			OrderStatus::ReadyForPickup => "ready_for_pickup",
			OrderStatus::DeliveryAssigned => "delivery_assigned",
			OrderStatus::PickedUp => "picked_up",
			OrderStatus::OutForDelivery => "out_for_delivery",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::ChefDeclined => "chef_declined",
		}
	}

	/// Returns an iterator over all statuses in lifecycle order.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::PaymentConfirmed,
			Self::SentToChef,
			Self::ChefAccepted,
			Self::Preparing,
			Self::ReadyForPickup,
			Self::DeliveryAssigned,
			Self::PickedUp,
			Self::OutForDelivery,
			Self::Delivered,
			Self::Cancelled,
			Self::ChefDeclined,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| format!("unknown order status '{}'", s))
	}
}

/// Payment state as seen by the engine. Capture and refunds happen elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	Pending,
	Paid,
	Refunded,
	PartiallyRefunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

/// Monetary breakdown of an order.
///
/// All amounts are non-negative and rounded to two places. The invariant
/// `total = subtotal + delivery_fee + service_fee + tax + tip_total - discount`
/// holds for every persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyBreakdown {
	pub subtotal: Decimal,
	pub delivery_fee: Decimal,
	pub service_fee: Decimal,
	pub tax: Decimal,
	#[serde(default)]
	pub tip_total: Decimal,
	#[serde(default)]
	pub discount: Decimal,
	pub total: Decimal,
}

impl MoneyBreakdown {
	/// Sum of the components, independent of the stored total.
	pub fn computed_total(&self) -> Decimal {
		self.subtotal + self.delivery_fee + self.service_fee + self.tax + self.tip_total
			- self.discount
	}

	/// Returns the name of the first negative component, if any.
	pub fn first_negative(&self) -> Option<&'static str> {
		[
			("subtotal", self.subtotal),
			("delivery_fee", self.delivery_fee),
			("service_fee", self.service_fee),
			("tax", self.tax),
			("tip_total", self.tip_total),
			("discount", self.discount),
			("total", self.total),
		]
		.into_iter()
		.find(|(_, amount)| amount.is_sign_negative() && !amount.is_zero())
		.map(|(name, _)| name)
	}
}

/// Item snapshot taken when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
	pub menu_item_id: String,
	pub name: String,
	pub unit_price: Decimal,
	pub quantity: u32,
	pub subtotal: Decimal,
	pub notes: Option<String>,
}

/// Outcome recorded when an order is cancelled or declined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
	pub reason: String,
	pub notes: Option<String>,
	/// Identity of the canceller, e.g. `customer:c-1` or `admin:a-9`.
	pub cancelled_by: String,
	pub penalty_amount: Decimal,
	pub refund_amount: Decimal,
	pub refund_status: RefundStatus,
}

/// One row of the append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
	/// Contiguous per-order sequence starting at 1.
	pub sequence: u64,
	pub status: OrderStatus,
	pub message: String,
	pub actor_id: Option<String>,
	pub actor_role: ActorRole,
	pub location: Option<String>,
	pub created_at: DateTime<Utc>,
}

/// The order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Opaque identifier (UUID v4).
	pub id: String,
	/// Human-readable number, e.g. `HC-20260115-3FA94C01B2`.
	pub order_number: String,
	pub customer_id: String,
	pub chef_id: String,
	pub delivery_partner_id: Option<String>,
	pub money: MoneyBreakdown,
	pub status: OrderStatus,
	pub payment_status: PaymentStatus,
	/// Optimistic concurrency counter. Starts at 1.
	pub version: u64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	/// Set iff status is `PaymentConfirmed`.
	pub countdown_expiry: Option<DateTime<Utc>>,
	pub can_cancel_free: bool,
	/// Free window captured from the active policy at creation.
	pub free_window_seconds: u64,
	pub estimated_prep_minutes: Option<u32>,
	pub estimated_delivery_at: Option<DateTime<Utc>>,
	pub delivery_address: String,
	pub special_instructions: Option<String>,
	pub chef_accepted_at: Option<DateTime<Utc>>,
	pub chef_declined_at: Option<DateTime<Utc>>,
	pub prepared_at: Option<DateTime<Utc>>,
	pub picked_up_at: Option<DateTime<Utc>>,
	pub delivered_at: Option<DateTime<Utc>>,
	pub cancelled_at: Option<DateTime<Utc>>,
	/// Present iff status is `Cancelled` or `ChefDeclined`.
	pub cancellation: Option<CancellationRecord>,
}

impl Order {
	/// Whether the free-cancellation window is open at `now`.
	///
	/// The window includes its final instant: at exactly `countdown_expiry` a
	/// customer cancel is still free, even though the timer may fire too.
	pub fn free_cancel_open(&self, now: DateTime<Utc>) -> bool {
		self.status == OrderStatus::PaymentConfirmed
			&& self.countdown_expiry.is_some_and(|expiry| now <= expiry)
	}

	/// Recomputes the persisted `can_cancel_free` flag against `now`.
	pub fn refresh_free_flag(&mut self, now: DateTime<Utc>) {
		self.can_cancel_free = self.free_cancel_open(now);
	}

	/// Seconds elapsed since creation, clamped at zero.
	pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
		(now - self.created_at).num_seconds().max(0)
	}
}

/// Persisted aggregate: order, items, history, tips and outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
	pub order: Order,
	pub items: Vec<OrderItem>,
	pub history: Vec<StatusHistoryEntry>,
	#[serde(default)]
	pub tips: Vec<Tip>,
	#[serde(default)]
	pub outbox: Vec<OrderEvent>,
}

impl OrderRecord {
	/// Sequence of the most recent history row, 0 if empty.
	pub fn last_history_sequence(&self) -> u64 {
		self.history.last().map(|h| h.sequence).unwrap_or(0)
	}

	/// Sequence the next outbox event will receive.
	pub fn next_event_sequence(&self) -> u64 {
		self.outbox.last().map(|e| e.sequence + 1).unwrap_or(1)
	}

	/// Highest outbox sequence, 0 if the outbox is empty.
	pub fn last_event_sequence(&self) -> u64 {
		self.outbox.last().map(|e| e.sequence).unwrap_or(0)
	}

	/// Outbox events with a sequence greater than `delivered_through`, oldest first.
	pub fn events_after(&self, delivered_through: u64) -> impl Iterator<Item = &OrderEvent> {
		self.outbox
			.iter()
			.filter(move |e| e.sequence > delivered_through)
	}

	pub fn tip(&self, tip_id: &str) -> Option<&Tip> {
		self.tips.iter().find(|t| t.id == tip_id)
	}

	pub fn tip_mut(&mut self, tip_id: &str) -> Option<&mut Tip> {
		self.tips.iter_mut().find(|t| t.id == tip_id)
	}
}
