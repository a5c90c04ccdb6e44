//! Outbox dispatcher.
//!
//! Every committed transition leaves its event in the order's outbox. The
//! dispatcher walks each order's outbox once per configured sink, in sequence
//! order, and remembers per sink how far it got in a [`DeliveryCursors`]
//! document. Delivery is at-least-once: the cursor is saved after the sink
//! call, so a crash in between replays the event with the same delivery key.
//!
//! A sink whose head event failed transiently holds back the rest of that
//! order's events for that sink until the backoff elapses. Other sinks and
//! other orders carry on.

pub mod backoff;

use crate::clock::Clock;
use crate::engine::event_bus::EventBus;
use crate::state::order::push_event;
use crate::state::{Mutation, OrderStateMachine, StateError};
use crate::store::{OrderStore, StoreError};
use chrono::{DateTime, Utc};
use homechef_config::DispatcherConfig;
use homechef_sink::{delivery_key, NamedSink, SinkService};
use homechef_types::{
	truncate_id, Actor, DeadLetter, DeliveryCursor, EngineEvent, OrderEvent, OrderEventKind,
	SinkOutcome, SinkRole, TipStatus,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum DispatchError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	State(#[from] StateError),
}

/// Dispatcher tuning, resolved from configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
	pub poll_interval: Duration,
	pub batch_size: usize,
	pub retry_base: Duration,
	pub retry_max: Duration,
	pub max_attempts: u32,
}

impl From<&DispatcherConfig> for DispatchSettings {
	fn from(config: &DispatcherConfig) -> Self {
		Self {
			poll_interval: Duration::from_millis(config.poll_interval_ms),
			batch_size: config.batch_size.max(1),
			retry_base: Duration::from_secs(config.retry_base_seconds),
			retry_max: Duration::from_secs(config.retry_max_seconds),
			max_attempts: config.max_attempts.max(1),
		}
	}
}

/// How a tip-disbursement sink settled a `TipAdded` event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TipResolution {
	Completed {
		tip_id: String,
		transfer_id: Option<String>,
	},
	Failed {
		tip_id: String,
		reason: String,
	},
}

/// Delivers committed outbox events to every configured sink.
///
/// Each (order, sink) pair keeps its own cursor, so a slow or failing sink
/// never holds back the others. Failed deliveries back off exponentially and
/// land in the dead-letter table after `max_attempts`.
pub struct Dispatcher {
	store: Arc<OrderStore>,
	sinks: SinkService,
	state_machine: Arc<OrderStateMachine>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
	settings: DispatchSettings,
	pending: Mutex<BTreeSet<String>>,
	notify: Notify,
}

impl Dispatcher {
	pub fn new(
		store: Arc<OrderStore>,
		sinks: SinkService,
		state_machine: Arc<OrderStateMachine>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
		settings: DispatchSettings,
	) -> Self {
		Self {
			store,
			sinks,
			state_machine,
			clock,
			event_bus,
			settings,
			pending: Mutex::new(BTreeSet::new()),
			notify: Notify::new(),
		}
	}

	/// Returns the sinks events are delivered to.
	pub fn sinks(&self) -> &SinkService {
		&self.sinks
	}

	/// Marks an order as having events to deliver and wakes the worker.
	pub fn wake(&self, order_id: &str) {
		if self.sinks.is_empty() {
			return;
		}
		self.pending
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.insert(order_id.to_string());
		self.notify.notify_one();
	}

	/// Queues every order with undelivered events.
	#[instrument(skip_all)]
	pub async fn seed(&self) -> Result<usize, StoreError> {
		let names: Vec<String> = self.sinks.names().map(str::to_string).collect();
		let orders = self.store.list_with_pending_events(&names).await?;
		let count = orders.len();
		if count > 0 {
			let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
			pending.extend(orders);
			drop(pending);
			self.notify.notify_one();
		}
		tracing::debug!(count, "Seeded dispatcher");
		Ok(count)
	}

	/// Number of orders waiting for delivery.
	pub fn pending_len(&self) -> usize {
		self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	/// Runs one pass over every pending order. Orders that still have
	/// undelivered events stay queued for the next pass.
	pub async fn dispatch_pending(&self) -> usize {
		// Taken out before dispatching so a wake during the pass is kept.
		let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));

		let mut drained = 0;
		for order_id in batch {
			let keep = match self.dispatch_order(&order_id).await {
				Ok(still_pending) => still_pending,
				Err(DispatchError::Store(StoreError::NotFound(_))) => false,
				Err(e) => {
					tracing::warn!(
						order_id = %truncate_id(&order_id),
						error = %e,
						"Dispatch pass failed"
					);
					true
				},
			};
			if keep {
				self.pending
					.lock()
					.unwrap_or_else(|e| e.into_inner())
					.insert(order_id);
			} else {
				drained += 1;
			}
		}
		drained
	}

	/// Delivers pending outbox events of one order to every sink.
	///
	/// Returns whether the order still has events some sink has not taken.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn dispatch_order(&self, order_id: &str) -> Result<bool, DispatchError> {
		if self.sinks.is_empty() {
			return Ok(false);
		}
		let record = self.store.load(order_id).await?;
		let mut cursors = self.store.load_cursors(order_id).await?;
		let now = self.clock.now();
		let mut resolutions = Vec::new();
		let mut blocked = false;

		for named in self.sinks.sinks() {
			let cursor = cursors.sinks.entry(named.name.clone()).or_default();
			if cursor.next_attempt_at.is_some_and(|at| at > now) {
				blocked = true;
				continue;
			}
			let events: Vec<&OrderEvent> = record
				.events_after(cursor.delivered_through)
				.take(self.settings.batch_size)
				.collect();
			for event in events {
				if !self
					.deliver_one(named, cursor, event, now, &mut resolutions)
					.await?
				{
					blocked = true;
					break;
				}
			}
		}

		// Tip state is settled before the cursors move past the events that
		// settle it, so a crash here replays the delivery instead of losing it.
		let resolved = !resolutions.is_empty();
		for resolution in resolutions {
			self.resolve_tip(order_id, resolution).await?;
		}
		self.store.save_cursors(&cursors).await?;

		let names = self.sinks.names();
		let behind = cursors.min_delivered_through(names) < record.last_event_sequence();
		Ok(blocked || behind || resolved)
	}

	/// Hands one event to one sink and moves its cursor. Returns false when
	/// the sink must wait for a backoff before seeing later events.
	async fn deliver_one(
		&self,
		named: &NamedSink,
		cursor: &mut DeliveryCursor,
		event: &OrderEvent,
		now: DateTime<Utc>,
		resolutions: &mut Vec<TipResolution>,
	) -> Result<bool, DispatchError> {
		if !named.sink.accepts(event) {
			advance(cursor, event.sequence);
			return Ok(true);
		}

		let key = delivery_key(&event.order_id, event.sequence, &named.name);
		let outcome = match named.sink.deliver(event, &key).await {
			Ok(outcome) => outcome,
			Err(e) => SinkOutcome::Retry {
				reason: e.to_string(),
			},
		};
		let tip_id = match (&event.kind, named.sink.role()) {
			(OrderEventKind::TipAdded { tip_id, .. }, SinkRole::TipDisbursement) => {
				Some(tip_id.clone())
			},
			_ => None,
		};

		match outcome {
			SinkOutcome::Accepted { reference } => {
				tracing::debug!(
					sink = %named.name,
					sequence = event.sequence,
					event = event.kind.name(),
					"Event delivered"
				);
				advance(cursor, event.sequence);
				if let Some(tip_id) = tip_id {
					resolutions.push(TipResolution::Completed {
						tip_id,
						transfer_id: reference,
					});
				}
				Ok(true)
			},
			SinkOutcome::Retry { reason } => {
				cursor.attempts += 1;
				if cursor.attempts >= self.settings.max_attempts {
					let attempts = cursor.attempts;
					self.dead_letter(named, event, &key, attempts, &reason, now)
						.await?;
					advance(cursor, event.sequence);
					if let Some(tip_id) = tip_id {
						resolutions.push(TipResolution::Failed { tip_id, reason });
					}
					return Ok(true);
				}
				let delay = backoff::retry_delay(
					cursor.attempts,
					self.settings.retry_base,
					self.settings.retry_max,
				);
				cursor.next_attempt_at = Some(
					now + chrono::Duration::from_std(delay)
						.unwrap_or_else(|_| chrono::Duration::seconds(300)),
				);
				tracing::warn!(
					sink = %named.name,
					sequence = event.sequence,
					attempts = cursor.attempts,
					retry_in_secs = delay.as_secs(),
					reason = %reason,
					"Sink delivery failed, will retry"
				);
				cursor.last_error = Some(reason);
				Ok(false)
			},
			SinkOutcome::PermanentFailure { reason } => {
				let attempts = cursor.attempts + 1;
				self.dead_letter(named, event, &key, attempts, &reason, now)
					.await?;
				advance(cursor, event.sequence);
				if let Some(tip_id) = tip_id {
					resolutions.push(TipResolution::Failed { tip_id, reason });
				}
				Ok(true)
			},
		}
	}

	async fn dead_letter(
		&self,
		named: &NamedSink,
		event: &OrderEvent,
		key: &str,
		attempts: u32,
		reason: &str,
		now: DateTime<Utc>,
	) -> Result<(), DispatchError> {
		tracing::error!(
			sink = %named.name,
			sequence = event.sequence,
			event = event.kind.name(),
			attempts,
			reason = %reason,
			"Sink gave up on event"
		);
		let letter = DeadLetter {
			order_id: event.order_id.clone(),
			sequence: event.sequence,
			sink: named.name.clone(),
			delivery_key: key.to_string(),
			event_kind: event.kind.name().to_string(),
			attempts,
			reason: reason.to_string(),
			recorded_at: now,
		};
		self.store.record_dead_letter(&letter).await?;
		Ok(())
	}

	/// Completes or fails a tip. Tips no longer `Processing` are left alone,
	/// which makes replays harmless.
	async fn resolve_tip(
		&self,
		order_id: &str,
		resolution: TipResolution,
	) -> Result<(), DispatchError> {
		let updated = self
			.state_machine
			.update_with(order_id, |record, now| {
				let tip_id = match &resolution {
					TipResolution::Completed { tip_id, .. } | TipResolution::Failed { tip_id, .. } => {
						tip_id
					},
				};
				let Some(tip) = record.tip_mut(tip_id) else {
					return Ok(Mutation::Unchanged(()));
				};
				if tip.status != TipStatus::Processing {
					return Ok(Mutation::Unchanged(()));
				}
				tip.processed_at = Some(now);
				let amount = tip.amount;
				let kind = match &resolution {
					TipResolution::Completed {
						tip_id,
						transfer_id,
					} => {
						tip.status = TipStatus::Completed;
						tip.transfer_id = transfer_id.clone();
						record.order.money.tip_total += amount;
						record.order.money.total += amount;
						OrderEventKind::TipCompleted {
							tip_id: tip_id.clone(),
							transfer_id: transfer_id.clone(),
						}
					},
					TipResolution::Failed { tip_id, reason } => {
						tip.status = TipStatus::Failed;
						tip.failure_reason = Some(reason.clone());
						OrderEventKind::TipFailed {
							tip_id: tip_id.clone(),
							reason: reason.clone(),
						}
					},
				};
				let payload = serde_json::json!({
					"order_number": record.order.order_number,
					"amount": amount,
					"tip_total": record.order.money.tip_total,
				});
				push_event(record, kind, &Actor::Timer, payload, now);
				Ok(Mutation::Commit(()))
			})
			.await?;

		if updated.committed {
			tracing::info!(
				order_id = %truncate_id(order_id),
				resolution = ?resolution,
				"Tip settled"
			);
			let _ = self.event_bus.publish(EngineEvent::Committed {
				order_id: order_id.to_string(),
				version: updated.record.order.version,
			});
		}
		Ok(())
	}

	/// Delivers events as orders commit, falling back to a poll.
	pub async fn run(
		self: Arc<Self>,
		token: CancellationToken,
		mut events: broadcast::Receiver<EngineEvent>,
	) {
		tracing::info!(component = "dispatcher", sinks = self.sinks.sinks().len(), "Dispatcher started");
		if let Err(e) = self.seed().await {
			tracing::warn!(component = "dispatcher", error = %e, "Initial dispatcher scan failed");
		}
		let mut poll = tokio::time::interval(self.settings.poll_interval);
		poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = token.cancelled() => break,
				event = events.recv() => match event {
					Ok(EngineEvent::Committed { order_id, .. }) => self.wake(&order_id),
					Ok(_) => continue,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						tracing::warn!(component = "dispatcher", skipped, "Event bus lagged, rescanning");
						if let Err(e) = self.seed().await {
							tracing::warn!(component = "dispatcher", error = %e, "Dispatcher rescan failed");
						}
					}
					Err(broadcast::error::RecvError::Closed) => break,
				},
				_ = self.notify.notified() => {}
				_ = poll.tick() => {}
			}
			self.dispatch_pending().await;
		}
		tracing::info!(component = "dispatcher", "Dispatcher stopped");
	}
}

fn advance(cursor: &mut DeliveryCursor, sequence: u64) {
	cursor.delivered_through = sequence;
	cursor.attempts = 0;
	cursor.next_attempt_at = None;
	cursor.last_error = None;
}
