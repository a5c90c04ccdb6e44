//! Free-cancellation countdown scheduler.
//!
//! Orders enter `PaymentConfirmed` with a countdown. When it runs out the
//! scheduler submits `TimerExpired` through the same transactional path as
//! any human event, which moves the order to `SentToChef`. The queue is only
//! a cache of what storage already knows: on start and then every half
//! lookahead it is re-seeded from the orders expiring soon, so a crash or a
//! dropped insert delays promotion by at most one re-scan.

mod queue;

pub use queue::{Countdown, CountdownQueue};

use crate::clock::Clock;
use crate::engine::event_bus::EventBus;
use crate::state::{OrderCommand, OrderStateMachine, StateError, TransitionError};
use crate::store::{OrderStore, StoreError};
use chrono::{DateTime, Utc};
use homechef_types::{truncate_id, Actor, EngineEvent, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Longest the worker sleeps without checking the queue.
const MAX_IDLE: Duration = Duration::from_secs(30);

/// Delay before retrying a countdown whose promotion hit an infrastructure error.
const RETRY_AFTER_ERROR: chrono::Duration = chrono::Duration::seconds(5);

/// Promotes orders to `SentToChef` when their free-cancellation countdown
/// runs out.
///
/// Countdowns live in an in-memory queue. A periodic re-scan of storage
/// refills it after a restart or a missed `schedule` call.
pub struct CountdownScheduler {
	queue: CountdownQueue,
	store: Arc<OrderStore>,
	state_machine: Arc<OrderStateMachine>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
	lookahead: chrono::Duration,
}

impl CountdownScheduler {
	pub fn new(
		store: Arc<OrderStore>,
		state_machine: Arc<OrderStateMachine>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
		lookahead: Duration,
	) -> Self {
		Self {
			queue: CountdownQueue::new(),
			store,
			state_machine,
			clock,
			event_bus,
			lookahead: chrono::Duration::from_std(lookahead)
				.unwrap_or_else(|_| chrono::Duration::hours(1)),
		}
	}

	/// Returns the pending countdowns.
	pub fn queue(&self) -> &CountdownQueue {
		&self.queue
	}

	/// Registers a countdown. Best effort: the periodic re-scan catches
	/// anything that never made it here.
	pub fn schedule(&self, order_id: &str, expiry: DateTime<Utc>, version: u64) {
		self.queue.push(order_id, expiry, version);
		tracing::debug!(
			order_id = %truncate_id(order_id),
			%expiry,
			"Countdown scheduled"
		);
	}

	/// Loads countdowns expiring within the lookahead from storage.
	#[instrument(skip_all)]
	pub async fn seed(&self) -> Result<usize, StoreError> {
		let horizon = self.clock.now() + self.lookahead;
		let orders = self.store.list_expiring_before(horizon).await?;
		for order in &orders {
			if let Some(expiry) = order.countdown_expiry {
				self.queue.push(&order.id, expiry, order.version);
			}
		}
		tracing::debug!(count = orders.len(), "Seeded countdown queue");
		Ok(orders.len())
	}

	/// Promotes every order whose countdown has run out. Returns how many
	/// orders were moved to `SentToChef`.
	pub async fn fire_due(&self) -> usize {
		let due = self.queue.pop_due(self.clock.now());
		let mut promoted = 0;
		for countdown in due {
			if self.handle_expiry(&countdown).await {
				promoted += 1;
			}
		}
		promoted
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(&countdown.order_id)))]
	async fn handle_expiry(&self, countdown: &Countdown) -> bool {
		let order = match self.store.load(&countdown.order_id).await {
			Ok(record) => record.order,
			Err(StoreError::NotFound(_)) => {
				tracing::debug!("Countdown for unknown order dropped");
				return false;
			},
			Err(e) => {
				tracing::warn!(error = %e, "Failed to load order for countdown");
				self.retry_later(countdown);
				return false;
			},
		};
		if order.status != OrderStatus::PaymentConfirmed {
			tracing::debug!(status = %order.status, "Countdown no longer applies");
			return false;
		}

		match self
			.state_machine
			.apply_once(&countdown.order_id, &Actor::Timer, OrderCommand::TimerExpired)
			.await
		{
			Ok(applied) => {
				let _ = self.event_bus.publish(EngineEvent::Committed {
					order_id: countdown.order_id.clone(),
					version: applied.record.order.version,
				});
				true
			},
			// Not due yet: the countdown was scheduled against an expiry that
			// has since moved.
			Err(StateError::Transition(TransitionError::InvalidInput(_))) => {
				if let Some(expiry) = order.countdown_expiry {
					self.queue.push(&countdown.order_id, expiry, order.version);
				}
				false
			},
			Err(StateError::Transition(TransitionError::Illegal { .. }))
			| Err(StateError::Conflict(_))
			| Err(StateError::NotFound(_)) => {
				tracing::debug!("Order moved on before its countdown fired");
				false
			},
			Err(e) => {
				tracing::warn!(error = %e, "Countdown promotion failed");
				self.retry_later(countdown);
				false
			},
		}
	}

	fn retry_later(&self, countdown: &Countdown) {
		self.queue.push(
			&countdown.order_id,
			self.clock.now() + RETRY_AFTER_ERROR,
			countdown.version,
		);
	}

	/// Sleeps until the next countdown is due, fires it, repeats.
	pub async fn run(self: Arc<Self>, token: CancellationToken) {
		tracing::info!(component = "scheduler", "Countdown worker started");
		loop {
			let wait = match self.queue.next_due() {
				Some(due) => (due - self.clock.now())
					.to_std()
					.unwrap_or(Duration::ZERO)
					.min(MAX_IDLE),
				None => MAX_IDLE,
			};
			tokio::select! {
				_ = token.cancelled() => break,
				_ = self.queue.changed() => {}
				_ = tokio::time::sleep(wait) => {}
			}
			self.fire_due().await;
		}
		tracing::info!(component = "scheduler", "Countdown worker stopped");
	}

	/// Re-seeds the queue every half lookahead.
	pub async fn run_rescan(self: Arc<Self>, token: CancellationToken) {
		let period = (self.lookahead / 2)
			.to_std()
			.unwrap_or(MAX_IDLE)
			.max(Duration::from_secs(1));
		let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
		loop {
			tokio::select! {
				_ = token.cancelled() => break,
				_ = interval.tick() => {
					if let Err(e) = self.seed().await {
						tracing::warn!(component = "scheduler", error = %e, "Countdown re-scan failed");
					}
				}
			}
		}
	}
}
