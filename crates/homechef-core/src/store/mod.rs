//! Versioned persistence of order aggregates.
//!
//! An order, its items, its status history, its tips and its outbox live in a
//! single [`OrderRecord`] under `orders:<id>`. The storage revision of that
//! record is the order's `version`: creation writes revision 1 and every
//! committed transition moves it forward by exactly one through a
//! compare-and-swap, so two writers racing on the same order can never both
//! win.
//!
//! Running countdowns are also indexed under `countdowns:<id>`. The index is
//! written before the order and pruned after it leaves `PaymentConfirmed`, so
//! it may hold stale ids but never misses a live countdown.

use chrono::{DateTime, Utc};
use homechef_storage::{StorageError, StorageService};
use homechef_types::{
	truncate_id, Actor, DeadLetter, DeliveryCursors, Order, OrderEvent, OrderEventKind,
	OrderItem, OrderRecord, OrderStatus, PaymentStatus, StatusHistoryEntry, StorageKey,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// How many times order number generation may collide before giving up.
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Errors that can occur in the order store.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Order not found: {0}")]
	NotFound(String),
	/// Another writer committed first.
	#[error("Stale write: expected version {expected}, found {actual}")]
	Stale { expected: u64, actual: u64 },
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for StoreError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::RevisionMismatch { expected, actual } => {
				StoreError::Stale { expected, actual }
			},
			other => StoreError::Storage(other.to_string()),
		}
	}
}

/// Everything needed to create an order, already validated.
#[derive(Debug, Clone)]
pub struct OrderDraft {
	pub customer_id: String,
	pub chef_id: String,
	pub items: Vec<OrderItem>,
	pub money: homechef_types::MoneyBreakdown,
	pub delivery_address: String,
	pub special_instructions: Option<String>,
	/// Free window of the policy active at placement.
	pub free_window_seconds: u64,
}

/// Fields of an order that participants need to render a notification.
pub(crate) fn order_snapshot(order: &Order) -> serde_json::Value {
	serde_json::json!({
		"order_number": order.order_number,
		"customer_id": order.customer_id,
		"chef_id": order.chef_id,
		"delivery_partner_id": order.delivery_partner_id,
		"status": order.status,
		"total": order.money.total,
		"estimated_delivery_at": order.estimated_delivery_at,
	})
}

/// Persistent store of order aggregates.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Creates an order in `PaymentConfirmed` with its countdown running.
	///
	/// The order row, items, history row 1 and outbox event 1 are written
	/// together at revision 1.
	pub async fn create(
		&self,
		draft: OrderDraft,
		now: DateTime<Utc>,
	) -> Result<OrderRecord, StoreError> {
		let order_id = uuid::Uuid::new_v4().to_string();
		let expiry = now + chrono::Duration::seconds(draft.free_window_seconds as i64);
		self.storage
			.store(StorageKey::Countdowns.as_str(), &order_id, &expiry)
			.await?;
		let order_number = self.reserve_order_number(&order_id, now).await?;

		let order = Order {
			id: order_id.clone(),
			order_number: order_number.clone(),
			customer_id: draft.customer_id.clone(),
			chef_id: draft.chef_id,
			delivery_partner_id: None,
			money: draft.money,
			status: OrderStatus::PaymentConfirmed,
			payment_status: PaymentStatus::Paid,
			version: 1,
			created_at: now,
			updated_at: now,
			countdown_expiry: Some(expiry),
			can_cancel_free: true,
			free_window_seconds: draft.free_window_seconds,
			estimated_prep_minutes: None,
			estimated_delivery_at: None,
			delivery_address: draft.delivery_address,
			special_instructions: draft.special_instructions,
			chef_accepted_at: None,
			chef_declined_at: None,
			prepared_at: None,
			picked_up_at: None,
			delivered_at: None,
			cancelled_at: None,
			cancellation: None,
		};

		let actor = Actor::customer(draft.customer_id);
		let history = vec![StatusHistoryEntry {
			sequence: 1,
			status: OrderStatus::PaymentConfirmed,
			message: "Payment confirmed, order placed".to_string(),
			actor_id: actor.id().map(str::to_string),
			actor_role: actor.role(),
			location: None,
			created_at: now,
		}];
		let outbox = vec![OrderEvent {
			order_id: order_id.clone(),
			sequence: 1,
			kind: OrderEventKind::StatusChanged {
				from: None,
				to: OrderStatus::PaymentConfirmed,
				history_sequence: 1,
			},
			actor,
			timestamp: now,
			payload: order_snapshot(&order),
		}];

		let record = OrderRecord {
			order,
			items: draft.items,
			history,
			tips: Vec::new(),
			outbox,
		};

		if let Err(e) = self
			.storage
			.insert_new(StorageKey::Orders.as_str(), &order_id, &record)
			.await
		{
			for (key, id) in [
				(StorageKey::OrderNumbers, order_number.as_str()),
				(StorageKey::Countdowns, order_id.as_str()),
			] {
				if let Err(cleanup) = self.storage.remove(key.as_str(), id).await {
					tracing::warn!(
						key = key.as_str(),
						id = %truncate_id(id),
						error = %cleanup,
						"Failed to release index entry"
					);
				}
			}
			return Err(e.into());
		}

		tracing::debug!(order_id = %truncate_id(&order_id), %order_number, "Order created");
		Ok(record)
	}

	/// Claims a fresh `HC-YYYYMMDD-XXXXXXXXXX` number for `order_id`.
	async fn reserve_order_number(
		&self,
		order_id: &str,
		now: DateTime<Utc>,
	) -> Result<String, StoreError> {
		for _ in 0..ORDER_NUMBER_ATTEMPTS {
			let suffix: String = uuid::Uuid::new_v4()
				.simple()
				.to_string()
				.to_uppercase()
				.chars()
				.take(10)
				.collect();
			let number = format!("HC-{}-{}", now.format("%Y%m%d"), suffix);
			match self
				.storage
				.insert_new(StorageKey::OrderNumbers.as_str(), &number, &order_id)
				.await
			{
				Ok(_) => return Ok(number),
				Err(StorageError::RevisionMismatch { .. }) => continue,
				Err(e) => return Err(StoreError::Storage(e.to_string())),
			}
		}
		Err(StoreError::Storage(
			"could not allocate a unique order number".into(),
		))
	}

	/// Loads the full aggregate.
	pub async fn load(&self, order_id: &str) -> Result<OrderRecord, StoreError> {
		match self
			.storage
			.retrieve_versioned::<OrderRecord>(StorageKey::Orders.as_str(), order_id)
			.await
		{
			Ok(stored) => {
				let mut record = stored.value;
				record.order.version = stored.revision;
				Ok(record)
			},
			Err(StorageError::NotFound) => Err(StoreError::NotFound(order_id.to_string())),
			Err(e) => Err(StoreError::Storage(e.to_string())),
		}
	}

	/// Writes `next` if the stored version is still `expected_version`.
	///
	/// `next.order.version` is set to `expected_version + 1` before writing.
	pub async fn commit(
		&self,
		next: &mut OrderRecord,
		expected_version: u64,
	) -> Result<(), StoreError> {
		next.order.version = expected_version + 1;
		let revision = self
			.storage
			.update_versioned(
				StorageKey::Orders.as_str(),
				&next.order.id,
				expected_version,
				next,
			)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => StoreError::NotFound(next.order.id.clone()),
				other => other.into(),
			})?;
		next.order.version = revision;

		if next.order.status != OrderStatus::PaymentConfirmed {
			self.unindex_countdown(&next.order.id).await;
		}
		Ok(())
	}

	/// Drops a countdown index entry. Failures only leave a stale entry,
	/// which the next listing prunes.
	async fn unindex_countdown(&self, order_id: &str) {
		if let Err(e) = self
			.storage
			.remove(StorageKey::Countdowns.as_str(), order_id)
			.await
		{
			tracing::warn!(
				order_id = %truncate_id(order_id),
				error = %e,
				"Failed to drop countdown index entry"
			);
		}
	}

	/// Orders in `PaymentConfirmed` whose countdown expires at or before `t`.
	///
	/// Reads the countdown index rather than every order. Entries whose order
	/// is gone or has moved on are pruned.
	pub async fn list_expiring_before(&self, t: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
		let indexed: Vec<(String, DateTime<Utc>)> = self
			.storage
			.retrieve_all(StorageKey::Countdowns.as_str())
			.await?;

		let mut due = Vec::new();
		for (order_id, expiry) in indexed {
			if expiry > t {
				continue;
			}
			let order = match self.load(&order_id).await {
				Ok(record) => record.order,
				Err(StoreError::NotFound(_)) => {
					self.unindex_countdown(&order_id).await;
					continue;
				},
				Err(e) => return Err(e),
			};
			if order.status != OrderStatus::PaymentConfirmed {
				self.unindex_countdown(&order_id).await;
				continue;
			}
			if order.countdown_expiry.is_some_and(|expiry| expiry <= t) {
				due.push(order);
			}
		}
		due.sort_by_key(|order| order.countdown_expiry);
		Ok(due)
	}

	/// Looks an order up by its human-readable number.
	pub async fn find_by_number(&self, order_number: &str) -> Result<OrderRecord, StoreError> {
		let order_id: String = match self
			.storage
			.retrieve(StorageKey::OrderNumbers.as_str(), order_number)
			.await
		{
			Ok(id) => id,
			Err(StorageError::NotFound) => {
				return Err(StoreError::NotFound(order_number.to_string()))
			},
			Err(e) => return Err(StoreError::Storage(e.to_string())),
		};
		self.load(&order_id).await
	}

	/// Delivery cursors of an order; empty cursors if none were saved yet.
	pub async fn load_cursors(&self, order_id: &str) -> Result<DeliveryCursors, StoreError> {
		match self
			.storage
			.retrieve(StorageKey::DeliveryCursors.as_str(), order_id)
			.await
		{
			Ok(cursors) => Ok(cursors),
			Err(StorageError::NotFound) => Ok(DeliveryCursors::new(order_id)),
			Err(e) => Err(StoreError::Storage(e.to_string())),
		}
	}

	/// Persists the per-sink delivery cursors of one order.
	///
	/// # Errors
	///
	/// Returns [`StoreError::Storage`] when the backend write fails.
	pub async fn save_cursors(&self, cursors: &DeliveryCursors) -> Result<(), StoreError> {
		self.storage
			.store(
				StorageKey::DeliveryCursors.as_str(),
				&cursors.order_id,
				cursors,
			)
			.await?;
		Ok(())
	}

	/// Ids of orders holding outbox events some sink has not taken yet.
	///
	/// Reads every order and cursor. Only recovery calls this, once per start;
	/// live commits reach the dispatcher through
	/// [`crate::dispatch::Dispatcher::wake`].
	pub async fn list_with_pending_events(
		&self,
		sink_names: &[String],
	) -> Result<Vec<String>, StoreError> {
		if sink_names.is_empty() {
			return Ok(Vec::new());
		}
		let cursors: HashMap<String, DeliveryCursors> = self
			.storage
			.retrieve_all(StorageKey::DeliveryCursors.as_str())
			.await?
			.into_iter()
			.collect();
		let records: Vec<(String, OrderRecord)> = self
			.storage
			.retrieve_all(StorageKey::Orders.as_str())
			.await?;

		let mut pending: Vec<String> = records
			.into_iter()
			.filter(|(order_id, record)| {
				let delivered = cursors
					.get(order_id)
					.map(|c| c.min_delivered_through(sink_names.iter().map(String::as_str)))
					.unwrap_or(0);
				delivered < record.last_event_sequence()
			})
			.map(|(order_id, _)| order_id)
			.collect();
		pending.sort();
		Ok(pending)
	}

	/// Records an event a sink gave up on. Re-recording the same
	/// (order, sequence, sink) overwrites the earlier entry.
	pub async fn record_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
		self.storage
			.store(
				StorageKey::DeadLetters.as_str(),
				&letter.storage_id(),
				letter,
			)
			.await?;
		Ok(())
	}

	/// All dead letters, oldest first.
	pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
		let mut letters: Vec<DeadLetter> = self
			.storage
			.retrieve_all(StorageKey::DeadLetters.as_str())
			.await?
			.into_iter()
			.map(|(_, letter)| letter)
			.collect();
		letters.sort_by(|a, b| {
			a.recorded_at
				.cmp(&b.recorded_at)
				.then_with(|| a.storage_id().cmp(&b.storage_id()))
		});
		Ok(letters)
	}
}
