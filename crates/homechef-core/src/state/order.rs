//! Order state machine.
//!
//! Every change to an order goes through [`OrderStateMachine::update_with`]:
//! load the record, let a closure mutate it, then commit with a
//! compare-and-swap on the version that was read. A lost race reloads and
//! re-runs the closure against fresh state, up to the configured number of
//! attempts.

use super::transitions::{self, OrderCommand, TransitionContext, TransitionError};
use super::PenaltyQuote;
use crate::clock::Clock;
use crate::policy::{PolicyError, PolicyStore};
use crate::store::{order_snapshot, OrderStore, StoreError};
use chrono::{DateTime, Utc};
use homechef_types::{
	truncate_id, Actor, OrderEvent, OrderEventKind, OrderRecord, OrderStatus,
	StatusHistoryEntry,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error(transparent)]
	Transition(#[from] TransitionError),
	#[error("Order changed concurrently {0} times, giving up")]
	Conflict(u32),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Policy error: {0}")]
	Policy(#[from] PolicyError),
}

impl From<StoreError> for StateError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(id) => StateError::NotFound(id),
			StoreError::Stale { .. } => StateError::Conflict(1),
			StoreError::Storage(msg) => StateError::Storage(msg),
		}
	}
}

/// What an update closure decided.
pub enum Mutation<T> {
	/// The record was changed and must be committed.
	Commit(T),
	/// Nothing to write; the record is returned as read.
	Unchanged(T),
}

/// Result of [`OrderStateMachine::update_with`].
#[derive(Debug)]
pub struct Updated<T> {
	pub record: OrderRecord,
	pub value: T,
	/// False when the closure returned [`Mutation::Unchanged`].
	pub committed: bool,
}

/// A committed transition.
#[derive(Debug)]
pub struct Applied {
	pub record: OrderRecord,
	pub from: OrderStatus,
	pub quote: Option<PenaltyQuote>,
}

/// Manages order transitions and their persistence.
pub struct OrderStateMachine {
	store: Arc<OrderStore>,
	policy: Arc<PolicyStore>,
	clock: Arc<dyn Clock>,
	max_attempts: u32,
	delivery_slack: chrono::Duration,
}

impl OrderStateMachine {
	pub fn new(
		store: Arc<OrderStore>,
		policy: Arc<PolicyStore>,
		clock: Arc<dyn Clock>,
		max_attempts: u32,
		delivery_slack: chrono::Duration,
	) -> Self {
		Self {
			store,
			policy,
			clock,
			max_attempts: max_attempts.max(1),
			delivery_slack,
		}
	}

	pub fn store(&self) -> &Arc<OrderStore> {
		&self.store
	}

	/// Applies `command` by `actor`, retrying lost races.
	pub async fn apply(
		&self,
		order_id: &str,
		actor: &Actor,
		command: OrderCommand,
	) -> Result<Applied, StateError> {
		self.apply_with_attempts(order_id, actor, command, self.max_attempts)
			.await
	}

	/// Applies `command` once. A lost race surfaces as `Conflict` instead of
	/// being retried.
	pub async fn apply_once(
		&self,
		order_id: &str,
		actor: &Actor,
		command: OrderCommand,
	) -> Result<Applied, StateError> {
		self.apply_with_attempts(order_id, actor, command, 1).await
	}

	async fn apply_with_attempts(
		&self,
		order_id: &str,
		actor: &Actor,
		command: OrderCommand,
		attempts: u32,
	) -> Result<Applied, StateError> {
		let policy = self.policy.get_active().await?;
		let delivery_slack = self.delivery_slack;

		let updated = self
			.update_with_attempts(order_id, attempts, |record, now| {
				let ctx = TransitionContext {
					now,
					policy: &policy,
					delivery_slack,
				};
				let transition = match transitions::transition(&record.order, actor, &command, &ctx)
				{
					Ok(t) => t,
					Err(e) => {
						tracing::warn!(
							order_id = %truncate_id(order_id),
							state = %record.order.status,
							event = command.name(),
							actor = %actor,
							error = %e,
							"Rejected order transition"
						);
						return Err(e.into());
					},
				};
				let from = transition.from;
				record.order = transition.order;
				push_status_change(record, from, actor, transition.message, now);
				Ok(Mutation::Commit((from, transition.quote)))
			})
			.await?;

		let (from, quote) = updated.value;
		tracing::info!(
			order_id = %truncate_id(order_id),
			from = %from,
			to = %updated.record.order.status,
			actor = %actor,
			version = updated.record.order.version,
			"Order transitioned"
		);
		Ok(Applied {
			record: updated.record,
			from,
			quote,
		})
	}

	/// Loads, mutates and commits an order, retrying lost races.
	pub async fn update_with<T, F>(&self, order_id: &str, updater: F) -> Result<Updated<T>, StateError>
	where
		F: FnMut(&mut OrderRecord, DateTime<Utc>) -> Result<Mutation<T>, StateError>,
	{
		self.update_with_attempts(order_id, self.max_attempts, updater)
			.await
	}

	async fn update_with_attempts<T, F>(
		&self,
		order_id: &str,
		attempts: u32,
		mut updater: F,
	) -> Result<Updated<T>, StateError>
	where
		F: FnMut(&mut OrderRecord, DateTime<Utc>) -> Result<Mutation<T>, StateError>,
	{
		for attempt in 1..=attempts {
			let mut record = self.store.load(order_id).await?;
			let expected = record.order.version;
			let now = self.clock.now();

			let value = match updater(&mut record, now)? {
				Mutation::Unchanged(value) => {
					return Ok(Updated {
						record,
						value,
						committed: false,
					})
				},
				Mutation::Commit(value) => value,
			};

			record.order.updated_at = now;
			match self.store.commit(&mut record, expected).await {
				Ok(()) => {
					return Ok(Updated {
						record,
						value,
						committed: true,
					})
				},
				Err(StoreError::Stale { actual, .. }) => {
					tracing::debug!(
						order_id = %truncate_id(order_id),
						attempt,
						expected,
						actual,
						"Stale order write, reloading"
					);
				},
				Err(e) => return Err(e.into()),
			}
		}
		Err(StateError::Conflict(attempts))
	}
}

/// Appends a history row for the record's current status and the matching
/// `StatusChanged` outbox event.
pub(crate) fn push_status_change(
	record: &mut OrderRecord,
	from: OrderStatus,
	actor: &Actor,
	message: String,
	now: DateTime<Utc>,
) {
	let sequence = record.last_history_sequence() + 1;
	record.history.push(StatusHistoryEntry {
		sequence,
		status: record.order.status,
		message,
		actor_id: actor.id().map(str::to_string),
		actor_role: actor.role(),
		location: None,
		created_at: now,
	});
	let payload = order_snapshot(&record.order);
	push_event(
		record,
		OrderEventKind::StatusChanged {
			from: Some(from),
			to: record.order.status,
			history_sequence: sequence,
		},
		actor,
		payload,
		now,
	);
}

/// Appends an outbox event with the next sequence.
pub(crate) fn push_event(
	record: &mut OrderRecord,
	kind: OrderEventKind,
	actor: &Actor,
	payload: serde_json::Value,
	now: DateTime<Utc>,
) {
	let sequence = record.next_event_sequence();
	record.outbox.push(OrderEvent {
		order_id: record.order.id.clone(),
		sequence,
		kind,
		actor: actor.clone(),
		timestamp: now,
		payload,
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::store::OrderDraft;
	use chrono::TimeZone;
	use homechef_config::PolicyConfig;
	use homechef_storage::implementations::memory::MemoryStorage;
	use homechef_storage::StorageService;
	use homechef_types::{MoneyBreakdown, OrderItem};
	use rust_decimal_macros::dec;

	struct Harness {
		machine: OrderStateMachine,
		store: Arc<OrderStore>,
		clock: Arc<ManualClock>,
	}

	fn harness() -> Harness {
		let clock = Arc::new(ManualClock::new(
			Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
		));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = Arc::new(OrderStore::new(storage.clone()));
		let policy = Arc::new(PolicyStore::new(
			storage,
			clock.clone(),
			PolicyConfig::default(),
			3,
		));
		let machine = OrderStateMachine::new(
			store.clone(),
			policy,
			clock.clone(),
			3,
			chrono::Duration::minutes(30),
		);
		Harness {
			machine,
			store,
			clock,
		}
	}

	async fn place(h: &Harness) -> OrderRecord {
		let draft = OrderDraft {
			customer_id: "cust-1".into(),
			chef_id: "chef-1".into(),
			items: vec![OrderItem {
				menu_item_id: "m-1".into(),
				name: "Biryani".into(),
				unit_price: dec!(400),
				quantity: 1,
				subtotal: dec!(400),
				notes: None,
			}],
			money: MoneyBreakdown {
				subtotal: dec!(400),
				delivery_fee: dec!(0),
				service_fee: dec!(0),
				tax: dec!(0),
				tip_total: dec!(0),
				discount: dec!(0),
				total: dec!(400),
			},
			delivery_address: "1 Tandoor Road".into(),
			special_instructions: None,
			free_window_seconds: 30,
		};
		h.store.create(draft, h.clock.now()).await.unwrap()
	}

	#[tokio::test]
	async fn test_apply_commits_history_and_outbox_together() {
		let h = harness();
		let placed = place(&h).await;
		h.clock.advance_secs(31);

		let applied = h
			.machine
			.apply(&placed.order.id, &Actor::Timer, OrderCommand::TimerExpired)
			.await
			.unwrap();
		let record = applied.record;
		assert_eq!(applied.from, OrderStatus::PaymentConfirmed);
		assert_eq!(record.order.version, 2);
		assert_eq!(record.history.len(), 2);
		assert_eq!(record.history[1].sequence, 2);
		assert_eq!(record.history[1].status, OrderStatus::SentToChef);
		assert_eq!(record.outbox.len(), 2);
		assert_eq!(
			record.outbox[1].kind,
			OrderEventKind::StatusChanged {
				from: Some(OrderStatus::PaymentConfirmed),
				to: OrderStatus::SentToChef,
				history_sequence: 2,
			}
		);

		let reloaded = h.store.load(&placed.order.id).await.unwrap();
		assert_eq!(reloaded, record);
	}

	#[tokio::test]
	async fn test_rejection_leaves_order_untouched() {
		let h = harness();
		let placed = place(&h).await;
		let err = h
			.machine
			.apply(
				&placed.order.id,
				&Actor::chef("chef-1"),
				OrderCommand::AcceptByChef {
					estimated_prep_minutes: 10,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			StateError::Transition(TransitionError::Illegal { .. })
		));
		assert_eq!(h.store.load(&placed.order.id).await.unwrap(), placed);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_update_with_retries_after_concurrent_write() {
		let h = harness();
		let placed = place(&h).await;
		let order_id = placed.order.id.clone();
		let store = h.store.clone();
		let mut calls = 0;

		let updated = h
			.machine
			.update_with(&order_id, |record, _| {
				calls += 1;
				if calls == 1 {
					// Simulate another writer committing between load and commit.
					let mut other = record.clone();
					tokio::task::block_in_place(|| {
						tokio::runtime::Handle::current().block_on(store.commit(&mut other, 1))
					})
					.unwrap();
				}
				record.order.special_instructions = Some(format!("attempt {}", calls));
				Ok(Mutation::Commit(calls))
			})
			.await
			.unwrap();

		assert_eq!(updated.value, 2);
		assert!(updated.committed);
		assert_eq!(updated.record.order.version, 3);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_update_with_gives_up_after_max_attempts() {
		let h = harness();
		let placed = place(&h).await;
		let order_id = placed.order.id.clone();
		let store = h.store.clone();
		let mut calls = 0u32;

		let err = h
			.machine
			.update_with(&order_id, |record, _| {
				calls += 1;
				// Another writer wins every race.
				let mut other = record.clone();
				let seen = record.order.version;
				tokio::task::block_in_place(|| {
					tokio::runtime::Handle::current().block_on(store.commit(&mut other, seen))
				})
				.unwrap();
				record.order.special_instructions = Some("never lands".into());
				Ok(Mutation::Commit(()))
			})
			.await
			.unwrap_err();

		assert!(matches!(err, StateError::Conflict(3)), "{:?}", err);
		assert_eq!(calls, 3);
		let stored = h.store.load(&order_id).await.unwrap();
		assert_eq!(stored.order.version, 4);
		assert_eq!(stored.order.special_instructions, None);
	}

	#[tokio::test]
	async fn test_unchanged_mutation_does_not_write() {
		let h = harness();
		let placed = place(&h).await;
		let updated = h
			.machine
			.update_with(&placed.order.id, |_, _| Ok(Mutation::Unchanged(())))
			.await
			.unwrap();
		assert!(!updated.committed);
		assert_eq!(h.store.load(&placed.order.id).await.unwrap().order.version, 1);
	}

	#[tokio::test]
	async fn test_missing_order_is_not_found() {
		let h = harness();
		let err = h
			.machine
			.apply("missing", &Actor::Timer, OrderCommand::TimerExpired)
			.await
			.unwrap_err();
		assert!(matches!(err, StateError::NotFound(_)));
	}
}
