//! Order engine facade.
//!
//! [`OrderEngine`] exposes every order and policy operation. Each call runs
//! under the configured operation deadline, goes through the state machine
//! for anything that changes an order, and announces successful commits on
//! the event bus so the dispatcher can deliver the new outbox events.

pub mod event_bus;
mod journey;
pub mod lifecycle;

use crate::clock::Clock;
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::policy::{PolicyError, PolicyStore};
use crate::scheduler::CountdownScheduler;
use crate::state::order::push_event;
use crate::state::penalty;
use crate::state::{Mutation, OrderCommand, OrderStateMachine, StateError, TransitionError};
use crate::store::{OrderDraft, OrderStore, StoreError};
use homechef_config::Config;
use homechef_sink::SinkService;
use homechef_storage::StorageService;
use homechef_types::utils::money::has_money_scale;
use homechef_types::{
	round_money, truncate_id, AcceptByChefRequest, AcceptDeliveryRequest, Actor, AddTipRequest,
	AdvanceRequest, CancelRequest, CancellationInfo, CancellationOutcome, CancellationPolicy,
	CountdownStatus, DeadLetter, DeclineByChefRequest, EngineEvent, Order, OrderEventKind,
	OrderItem, OrderJourney, OrderStatus, PlaceOrderRequest, PolicyPatch, RecipientType, Tip,
	TipStatus,
};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use validator::Validate;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Illegal transition: {event} by {actor} in state {state}")]
	IllegalTransition {
		state: OrderStatus,
		event: String,
		actor: String,
	},
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("Policy violation: {0}")]
	PolicyViolation(String),
	#[error("Operation timed out after {0}s")]
	Timeout(u64),
	/// The operation already happened; carries the current order.
	#[error("Already done")]
	AlreadyDone(Box<Order>),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Configuration error: {0}")]
	Config(String),
}

impl From<StateError> for EngineError {
	fn from(err: StateError) -> Self {
		match err {
			StateError::NotFound(id) => EngineError::NotFound(format!("order {}", id)),
			StateError::Transition(TransitionError::Illegal {
				state,
				event,
				actor,
			}) => EngineError::IllegalTransition {
				state,
				event,
				actor,
			},
			StateError::Transition(TransitionError::InvalidInput(msg)) => {
				EngineError::InvalidInput(msg)
			},
			StateError::Conflict(attempts) => EngineError::Conflict(format!(
				"order changed concurrently, gave up after {} attempts",
				attempts
			)),
			StateError::Storage(msg) => EngineError::Storage(msg),
			StateError::Policy(e) => e.into(),
		}
	}
}

impl From<PolicyError> for EngineError {
	fn from(err: PolicyError) -> Self {
		match err {
			PolicyError::Invalid(msg) => EngineError::InvalidInput(msg),
			PolicyError::Conflict(_) => EngineError::Conflict(err.to_string()),
			PolicyError::Storage(msg) => EngineError::Storage(msg),
		}
	}
}

impl From<StoreError> for EngineError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(id) => EngineError::NotFound(format!("order {}", id)),
			StoreError::Stale { .. } => EngineError::Conflict(err.to_string()),
			StoreError::Storage(msg) => EngineError::Storage(msg),
		}
	}
}

/// Longest tip message accepted.
const MAX_TIP_MESSAGE: usize = 500;

/// Capacity of the in-process event bus.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Main engine coordinating order state, countdowns and event delivery.
#[derive(Clone)]
pub struct OrderEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) store: Arc<OrderStore>,
	pub(crate) policy: Arc<PolicyStore>,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) scheduler: Arc<CountdownScheduler>,
	pub(crate) dispatcher: Arc<Dispatcher>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) shutdown: CancellationToken,
}

impl OrderEngine {
	/// Wires the engine's services around a storage backend and sink set.
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		sinks: SinkService,
		clock: Arc<dyn Clock>,
	) -> Self {
		let event_bus = event_bus::EventBus::new(EVENT_BUS_CAPACITY);
		let store = Arc::new(OrderStore::new(storage.clone()));
		let policy = Arc::new(PolicyStore::new(
			storage.clone(),
			clock.clone(),
			config.policy.clone(),
			config.engine.max_commit_attempts,
		));
		let state_machine = Arc::new(OrderStateMachine::new(
			store.clone(),
			policy.clone(),
			clock.clone(),
			config.engine.max_commit_attempts,
			chrono::Duration::minutes(config.engine.delivery_slack_minutes as i64),
		));
		let scheduler = Arc::new(CountdownScheduler::new(
			store.clone(),
			state_machine.clone(),
			clock.clone(),
			event_bus.clone(),
			Duration::from_secs(config.scheduler.lookahead_seconds),
		));
		let dispatcher = Arc::new(Dispatcher::new(
			store.clone(),
			sinks,
			state_machine.clone(),
			clock.clone(),
			event_bus.clone(),
			DispatchSettings::from(&config.dispatcher),
		));

		Self {
			config,
			storage,
			store,
			policy,
			state_machine,
			scheduler,
			dispatcher,
			event_bus,
			clock,
			shutdown: CancellationToken::new(),
		}
	}

	/// Runs the background workers until Ctrl-C or [`OrderEngine::shutdown`].
	pub async fn run(&self) -> Result<(), EngineError> {
		let token = self.shutdown.clone();
		let mut monitor = self.event_bus.subscribe();
		let dispatcher_events = self.event_bus.subscribe();

		let handles = vec![
			tokio::spawn(self.scheduler.clone().run(token.child_token())),
			tokio::spawn(self.scheduler.clone().run_rescan(token.child_token())),
			tokio::spawn(
				self.dispatcher
					.clone()
					.run(token.child_token(), dispatcher_events),
			),
			tokio::spawn(cleanup_loop(
				self.storage.clone(),
				Duration::from_secs(self.config.storage.cleanup_interval_seconds),
				token.child_token(),
			)),
		];

		tracing::info!(engine_id = %self.config.engine.id, "Order engine running");
		loop {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Received Ctrl-C");
					break;
				}
				_ = token.cancelled() => break,
				event = monitor.recv() => match event {
					Ok(EngineEvent::Committed { order_id, version }) => {
						tracing::trace!(order_id = %truncate_id(&order_id), version, "Committed");
					}
					Ok(EngineEvent::CountdownScheduled { order_id, expiry, .. }) => {
						tracing::trace!(order_id = %truncate_id(&order_id), %expiry, "Countdown scheduled");
					}
					Ok(EngineEvent::PolicyUpdated { version }) => {
						tracing::debug!(version, "Policy updated");
					}
					Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
					Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
				},
			}
		}

		token.cancel();
		for handle in handles {
			if let Err(e) = handle.await {
				tracing::warn!(error = %e, "Background task ended abnormally");
			}
		}
		Ok(())
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the storage service.
	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	/// Returns the countdown scheduler that promotes orders to the chef.
	pub fn scheduler(&self) -> &Arc<CountdownScheduler> {
		&self.scheduler
	}

	/// Returns the outbox dispatcher.
	pub fn dispatcher(&self) -> &Arc<Dispatcher> {
		&self.dispatcher
	}

	/// Runs `operation` under the configured deadline.
	async fn with_deadline<T, F>(&self, operation: F) -> Result<T, EngineError>
	where
		F: Future<Output = Result<T, EngineError>>,
	{
		let seconds = self.config.engine.operation_timeout_seconds;
		tokio::time::timeout(Duration::from_secs(seconds), operation)
			.await
			.map_err(|_| EngineError::Timeout(seconds))?
	}

	/// Tells the dispatcher about a commit.
	fn announce(&self, order_id: &str, version: u64) {
		self.dispatcher.wake(order_id);
		let _ = self.event_bus.publish(EngineEvent::Committed {
			order_id: order_id.to_string(),
			version,
		});
	}

	/// Places a paid order and starts its free-cancellation countdown.
	pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<Order, EngineError> {
		self.with_deadline(async {
			let items = validate_order(&request)?;
			let policy = self.policy.get_active().await?;

			let draft = OrderDraft {
				customer_id: request.customer_id,
				chef_id: request.chef_id,
				items,
				money: request.money,
				delivery_address: request.delivery_address,
				special_instructions: request.special_instructions,
				free_window_seconds: policy.free_window_seconds,
			};
			let record = self.store.create(draft, self.clock.now()).await?;
			let order = record.order;

			if let Some(expiry) = order.countdown_expiry {
				self.scheduler.schedule(&order.id, expiry, order.version);
				let _ = self.event_bus.publish(EngineEvent::CountdownScheduled {
					order_id: order.id.clone(),
					expiry,
					version: order.version,
				});
			}
			self.announce(&order.id, order.version);
			tracing::info!(
				order_id = %truncate_id(&order.id),
				order_number = %order.order_number,
				total = %order.money.total,
				"Order placed"
			);
			Ok(order)
		})
		.await
	}

	/// Cancels an order on behalf of a customer or an administrator.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn cancel(
		&self,
		order_id: &str,
		request: CancelRequest,
	) -> Result<CancellationOutcome, EngineError> {
		self.with_deadline(async {
			let applied = self
				.state_machine
				.apply(
					order_id,
					&request.actor,
					OrderCommand::Cancel {
						reason: request.reason,
						notes: request.notes,
					},
				)
				.await?;
			self.announce(order_id, applied.record.order.version);

			let quote = applied.quote.ok_or_else(|| {
				EngineError::Storage("cancellation committed without a quote".into())
			})?;
			Ok(CancellationOutcome {
				kind: quote.kind,
				penalty_amount: quote.penalty,
				refund_amount: quote.refund,
				refund_timeline_days: self.config.engine.refund_timeline_days,
			})
		})
		.await
	}

	/// What a customer cancellation would cost right now.
	pub async fn get_cancellation_info(
		&self,
		order_id: &str,
	) -> Result<CancellationInfo, EngineError> {
		self.with_deadline(async {
			let order = self.store.load(order_id).await?.order;
			let policy = self.policy.get_active().await?;
			let now = self.clock.now();

			let can_cancel = matches!(
				order.status,
				OrderStatus::PaymentConfirmed | OrderStatus::SentToChef
			);
			let (is_free, penalty, refund) = if can_cancel {
				let quote = penalty::customer_quote(&order, &policy, now);
				(
					penalty::is_free_for_customer(&order, now),
					quote.penalty,
					quote.refund,
				)
			} else {
				(false, Decimal::ZERO, Decimal::ZERO)
			};

			Ok(CancellationInfo {
				can_cancel,
				is_free,
				elapsed_seconds: order.elapsed_seconds(now),
				free_window_seconds: order.free_window_seconds,
				projected_penalty: penalty,
				projected_refund: refund,
			})
		})
		.await
	}

	/// State of the free-cancellation countdown.
	pub async fn get_countdown_status(&self, order_id: &str) -> Result<CountdownStatus, EngineError> {
		self.with_deadline(async {
			let order = self.store.load(order_id).await?.order;
			let policy = self.policy.get_active().await?;
			let now = self.clock.now();

			let active = order.free_cancel_open(now);
			let remaining = order
				.countdown_expiry
				.filter(|_| active)
				.map(|expiry| (expiry - now).num_seconds().max(0) as u64)
				.unwrap_or(0);
			let window_ms = (order.free_window_seconds as f64) * 1000.0;
			let progress_pct = if order.status != OrderStatus::PaymentConfirmed || window_ms <= 0.0
			{
				100.0
			} else {
				let elapsed_ms = (now - order.created_at).num_milliseconds().max(0) as f64;
				(elapsed_ms / window_ms * 100.0).min(100.0)
			};

			Ok(CountdownStatus {
				active,
				time_remaining_seconds: remaining,
				total_window_seconds: order.free_window_seconds,
				progress_pct,
				can_cancel_free: active,
				penalty_after_expiry: penalty::quote(order.money.total, &policy, false).penalty,
			})
		})
		.await
	}

	/// Sends an order to the chef once its countdown has run out.
	///
	/// Safe to repeat: an order already past `PaymentConfirmed` comes back as
	/// [`EngineError::AlreadyDone`].
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn confirm_after_timer(&self, order_id: &str) -> Result<Order, EngineError> {
		self.with_deadline(async {
			let current = self.store.load(order_id).await?.order;
			if current.status != OrderStatus::PaymentConfirmed {
				return Err(EngineError::AlreadyDone(Box::new(current)));
			}
			match self
				.state_machine
				.apply(order_id, &Actor::Timer, OrderCommand::TimerExpired)
				.await
			{
				Ok(applied) => {
					self.announce(order_id, applied.record.order.version);
					Ok(applied.record.order)
				},
				// Lost the race to the scheduler or a cancel.
				Err(StateError::Transition(TransitionError::Illegal { .. })) => {
					let order = self.store.load(order_id).await?.order;
					Err(EngineError::AlreadyDone(Box::new(order)))
				},
				Err(e) => Err(e.into()),
			}
		})
		.await
	}

	/// Records the chef's acceptance and prep estimate.
	///
	/// # Arguments
	///
	/// * `order_id` - The order to accept
	/// * `request` - Accepting chef and estimated prep time in minutes
	///
	/// # Errors
	///
	/// Returns [`EngineError::IllegalTransition`] unless the order is
	/// `SentToChef` and `request.chef_id` is the assigned chef.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn accept_by_chef(
		&self,
		order_id: &str,
		request: AcceptByChefRequest,
	) -> Result<Order, EngineError> {
		self.transition(
			order_id,
			Actor::chef(request.chef_id),
			OrderCommand::AcceptByChef {
				estimated_prep_minutes: request.estimated_prep_minutes,
			},
		)
		.await
	}

	/// Records the chef's refusal. The order ends in `ChefDeclined`.
	///
	/// # Errors
	///
	/// Returns [`EngineError::IllegalTransition`] unless the order is
	/// `SentToChef` and the caller is the assigned chef.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn decline_by_chef(
		&self,
		order_id: &str,
		request: DeclineByChefRequest,
	) -> Result<Order, EngineError> {
		self.transition(
			order_id,
			Actor::chef(request.chef_id),
			OrderCommand::DeclineByChef {
				reason: request.reason,
			},
		)
		.await
	}

	/// Moves an order one step along the preparation and delivery path.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn advance(&self, order_id: &str, request: AdvanceRequest) -> Result<Order, EngineError> {
		self.transition(
			order_id,
			request.actor,
			OrderCommand::Advance {
				target: request.target_status,
			},
		)
		.await
	}

	/// Assigns the requesting driver to an order that is ready for pickup.
	///
	/// # Arguments
	///
	/// * `order_id` - The order to take
	/// * `request` - Identity of the accepting driver
	///
	/// # Errors
	///
	/// Returns [`EngineError::IllegalTransition`] when the order is not
	/// `ReadyForPickup`.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn accept_delivery(
		&self,
		order_id: &str,
		request: AcceptDeliveryRequest,
	) -> Result<Order, EngineError> {
		self.transition(
			order_id,
			Actor::driver(request.driver_id),
			OrderCommand::AcceptByDriver,
		)
		.await
	}

	async fn transition(
		&self,
		order_id: &str,
		actor: Actor,
		command: OrderCommand,
	) -> Result<Order, EngineError> {
		self.with_deadline(async {
			let applied = self.state_machine.apply(order_id, &actor, command).await?;
			self.announce(order_id, applied.record.order.version);
			Ok(applied.record.order)
		})
		.await
	}

	/// Adds a tip to a delivered order.
	///
	/// The tip is `processing` until the disbursement sink acknowledges it.
	/// Repeating a call with the same `client_token` returns the original tip.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn add_tip(&self, order_id: &str, request: AddTipRequest) -> Result<Tip, EngineError> {
		self.with_deadline(async {
			if request.amount <= Decimal::ZERO || !has_money_scale(request.amount) {
				return Err(EngineError::InvalidInput(
					"tip amount must be positive with at most two decimal places".into(),
				));
			}
			if request
				.message
				.as_ref()
				.is_some_and(|m| m.chars().count() > MAX_TIP_MESSAGE)
			{
				return Err(EngineError::InvalidInput("tip message is too long".into()));
			}

			let actor = Actor::customer(request.customer_id.clone());
			let amount = round_money(request.amount);
			let updated = self
				.state_machine
				.update_with(order_id, |record, now| {
					let order = &record.order;
					let illegal = || {
						StateError::Transition(TransitionError::Illegal {
							state: order.status,
							event: "add_tip".to_string(),
							actor: actor.to_string(),
						})
					};
					if order.status != OrderStatus::Delivered || order.customer_id != request.customer_id
					{
						return Err(illegal());
					}

					if let Some(token) = &request.client_token {
						if let Some(existing) = record
							.tips
							.iter()
							.find(|t| t.client_token.as_deref() == Some(token.as_str()))
						{
							return Ok(Mutation::Unchanged(existing.clone()));
						}
					}

					let recipient_id = match request.recipient_type {
						RecipientType::Chef => order.chef_id.clone(),
						RecipientType::Delivery => order.delivery_partner_id.clone().ok_or_else(|| {
							StateError::Transition(TransitionError::InvalidInput(
								"order has no delivery partner".into(),
							))
						})?,
					};
					if record.tips.iter().any(|t| {
						t.recipient_type == request.recipient_type && t.status.blocks_duplicate()
					}) {
						return Err(StateError::Transition(TransitionError::InvalidInput(
							"duplicate".into(),
						)));
					}

					let tip = Tip {
						id: uuid::Uuid::new_v4().to_string(),
						order_id: order.id.clone(),
						customer_id: request.customer_id.clone(),
						recipient_id: recipient_id.clone(),
						recipient_type: request.recipient_type,
						amount,
						message: request.message.clone(),
						client_token: request.client_token.clone(),
						status: TipStatus::Processing,
						transfer_id: None,
						failure_reason: None,
						created_at: now,
						processed_at: None,
					};
					let payload = serde_json::json!({
						"order_number": order.order_number,
						"message": tip.message,
					});
					record.tips.push(tip.clone());
					push_event(
						record,
						OrderEventKind::TipAdded {
							tip_id: tip.id.clone(),
							recipient_type: tip.recipient_type,
							recipient_id,
							amount,
						},
						&actor,
						payload,
						now,
					);
					Ok(Mutation::Commit(tip))
				})
				.await?;

			if updated.committed {
				self.announce(order_id, updated.record.order.version);
				tracing::info!(
					order_id = %truncate_id(order_id),
					recipient = %updated.value.recipient_type,
					amount = %updated.value.amount,
					"Tip added"
				);
			}
			Ok(updated.value)
		})
		.await
	}

	/// Timeline, participants, cancellation and tipping view of an order.
	pub async fn get_order_journey(&self, order_id: &str) -> Result<OrderJourney, EngineError> {
		self.with_deadline(async {
			let record = self.store.load(order_id).await?;
			Ok(journey::build(&record))
		})
		.await
	}

	/// Loads an order with `can_cancel_free` evaluated against the clock.
	///
	/// # Errors
	///
	/// Returns [`EngineError::NotFound`] for an unknown id.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, EngineError> {
		self.with_deadline(async {
			let mut order = self.store.load(order_id).await?.order;
			order.refresh_free_flag(self.clock.now());
			Ok(order)
		})
		.await
	}

	/// Same as [`OrderEngine::get_order`], keyed by the `HC-` order number.
	pub async fn get_order_by_number(&self, order_number: &str) -> Result<Order, EngineError> {
		self.with_deadline(async {
			let mut order = self.store.find_by_number(order_number).await?.order;
			order.refresh_free_flag(self.clock.now());
			Ok(order)
		})
		.await
	}

	/// Returns the cancellation policy new orders are placed under.
	pub async fn get_active_policy(&self) -> Result<CancellationPolicy, EngineError> {
		self.with_deadline(async { Ok(self.policy.get_active().await?) })
			.await
	}

	/// Publishes a new policy version. Orders already placed keep their window.
	pub async fn update_active_policy(
		&self,
		patch: PolicyPatch,
		admin_id: &str,
	) -> Result<CancellationPolicy, EngineError> {
		self.with_deadline(async {
			if admin_id.trim().is_empty() {
				return Err(EngineError::InvalidInput("admin_id is required".into()));
			}
			let policy = self
				.policy
				.update_active(&patch, admin_id)
				.await?;
			let _ = self.event_bus.publish(EngineEvent::PolicyUpdated {
				version: policy.version,
			});
			Ok(policy)
		})
		.await
	}

	/// Every policy version, newest first.
	pub async fn policy_history(&self) -> Result<Vec<CancellationPolicy>, EngineError> {
		self.with_deadline(async { Ok(self.policy.history().await?) })
			.await
	}

	/// Events the sinks gave up on.
	pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, EngineError> {
		self.with_deadline(async { Ok(self.store.dead_letters().await?) })
			.await
	}
}

/// Checks a new order and snapshots its items.
fn validate_order(request: &PlaceOrderRequest) -> Result<Vec<OrderItem>, EngineError> {
	request
		.validate()
		.map_err(|e| EngineError::InvalidInput(e.to_string()))?;

	let money = &request.money;
	if let Some(field) = money.first_negative() {
		return Err(EngineError::InvalidInput(format!("{} must not be negative", field)));
	}
	let amounts = [
		money.subtotal,
		money.delivery_fee,
		money.service_fee,
		money.tax,
		money.discount,
		money.total,
	];
	if !amounts.into_iter().all(has_money_scale) {
		return Err(EngineError::InvalidInput(
			"amounts carry at most two decimal places".into(),
		));
	}
	if !money.tip_total.is_zero() {
		return Err(EngineError::InvalidInput(
			"tip_total must be zero when placing an order".into(),
		));
	}

	let mut items = Vec::with_capacity(request.items.len());
	for item in &request.items {
		if item.unit_price < Decimal::ZERO || !has_money_scale(item.unit_price) {
			return Err(EngineError::InvalidInput(format!(
				"invalid unit price for item {}",
				item.menu_item_id
			)));
		}
		items.push(OrderItem {
			menu_item_id: item.menu_item_id.clone(),
			name: item.name.clone(),
			unit_price: item.unit_price,
			quantity: item.quantity,
			subtotal: round_money(item.unit_price * Decimal::from(item.quantity)),
			notes: item.notes.clone(),
		});
	}
	let items_subtotal: Decimal = items.iter().map(|i| i.subtotal).sum();
	if items_subtotal != money.subtotal {
		return Err(EngineError::InvalidInput(format!(
			"subtotal {} does not match items total {}",
			money.subtotal, items_subtotal
		)));
	}

	let computed = money.computed_total();
	if computed != money.total {
		return Err(EngineError::PolicyViolation(format!(
			"total {} does not equal the sum of its components {}",
			money.total, computed
		)));
	}
	Ok(items)
}

/// Periodically drops expired storage entries.
async fn cleanup_loop(storage: Arc<StorageService>, every: Duration, token: CancellationToken) {
	let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
	loop {
		tokio::select! {
			_ = token.cancelled() => break,
			_ = interval.tick() => {
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					}
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					}
					_ => {}
				}
			}
		}
	}
}

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod tests;
