//! The order transition table.
//!
//! [`transition`] is pure: given an order, an actor, a command and the current
//! time and policy it either returns the next order state or explains why the
//! command is not allowed. Persistence, history rows and outbox events are the
//! caller's business.

use super::penalty::{self, PenaltyQuote};
use chrono::{DateTime, Duration, Utc};
use homechef_types::{
	Actor, ActorRole, CancellationPolicy, CancellationRecord, Order, OrderStatus, RefundStatus,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Accepted range for a chef's preparation estimate.
pub const PREP_MINUTES_RANGE: std::ops::RangeInclusive<u32> = 1..=240;

/// Something an actor asks an order to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
	Cancel {
		reason: String,
		notes: Option<String>,
	},
	TimerExpired,
	AcceptByChef {
		estimated_prep_minutes: u32,
	},
	DeclineByChef {
		reason: String,
	},
	Advance {
		target: OrderStatus,
	},
	AcceptByDriver,
}

impl OrderCommand {
	pub fn name(&self) -> &'static str {
		match self {
			OrderCommand::Cancel { .. } => "cancel",
			OrderCommand::TimerExpired => "timer_expired",
			OrderCommand::AcceptByChef { .. } => "accept_by_chef",
			OrderCommand::DeclineByChef { .. } => "decline_by_chef",
			OrderCommand::Advance { .. } => "advance",
			OrderCommand::AcceptByDriver => "accept_by_driver",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("Illegal transition: {event} by {actor} in state {state}")]
	Illegal {
		state: OrderStatus,
		event: String,
		actor: String,
	},
	#[error("Invalid input: {0}")]
	InvalidInput(String),
}

/// Inputs a transition may depend on besides the order itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
	pub now: DateTime<Utc>,
	pub policy: &'a CancellationPolicy,
	/// Added to the preparation estimate to predict delivery.
	pub delivery_slack: Duration,
}

/// A legal transition, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
	pub order: Order,
	pub from: OrderStatus,
	/// Human-readable history message.
	pub message: String,
	/// Set for cancellations and declines.
	pub quote: Option<PenaltyQuote>,
}

/// Applies `command` by `actor` to `order`.
pub fn transition(
	order: &Order,
	actor: &Actor,
	command: &OrderCommand,
	ctx: &TransitionContext<'_>,
) -> Result<Transition, TransitionError> {
	let illegal = || TransitionError::Illegal {
		state: order.status,
		event: command.name().to_string(),
		actor: actor.to_string(),
	};

	if order.status.is_terminal() {
		return Err(illegal());
	}

	let now = ctx.now;
	let mut next = order.clone();
	let mut quote = None;

	let message = match (order.status, command) {
		(state, OrderCommand::Cancel { reason, notes }) => {
			let cancel_quote = match actor {
				Actor::Customer { id }
					if *id == order.customer_id
						&& matches!(
							state,
							OrderStatus::PaymentConfirmed | OrderStatus::SentToChef
						) =>
				{
					penalty::customer_quote(order, ctx.policy, now)
				},
				_ if actor.role() == ActorRole::System
					&& state == OrderStatus::PaymentConfirmed =>
				{
					PenaltyQuote::free(order.money.total)
				},
				Actor::Admin { .. } => penalty::quote(order.money.total, ctx.policy, false),
				_ => return Err(illegal()),
			};
			let reason = non_empty(reason, "cancellation reason")?;

			next.status = OrderStatus::Cancelled;
			next.cancelled_at = Some(now);
			next.payment_status =
				penalty::payment_status_after_refund(cancel_quote.refund, order.money.total);
			next.cancellation = Some(CancellationRecord {
				reason: reason.clone(),
				notes: notes.clone(),
				cancelled_by: actor.to_string(),
				penalty_amount: cancel_quote.penalty,
				refund_amount: cancel_quote.refund,
				refund_status: refund_status_for(cancel_quote.refund),
			});
			quote = Some(cancel_quote);
			format!("Order cancelled by {}: {}", actor.role(), reason)
		},

		(OrderStatus::PaymentConfirmed, OrderCommand::TimerExpired) => {
			if actor.role() != ActorRole::System {
				return Err(illegal());
			}
			match order.countdown_expiry {
				Some(expiry) if now >= expiry => {},
				_ => {
					return Err(TransitionError::InvalidInput(
						"free-cancellation countdown has not expired".into(),
					))
				},
			}
			next.status = OrderStatus::SentToChef;
			"Free-cancellation window closed, order sent to chef".to_string()
		},

		(
			OrderStatus::SentToChef,
			OrderCommand::AcceptByChef {
				estimated_prep_minutes,
			},
		) => {
			require_chef(order, actor).ok_or_else(illegal)?;
			if !PREP_MINUTES_RANGE.contains(estimated_prep_minutes) {
				return Err(TransitionError::InvalidInput(format!(
					"estimated_prep_minutes must be between {} and {}",
					PREP_MINUTES_RANGE.start(),
					PREP_MINUTES_RANGE.end()
				)));
			}
			next.status = OrderStatus::ChefAccepted;
			next.chef_accepted_at = Some(now);
			next.estimated_prep_minutes = Some(*estimated_prep_minutes);
			next.estimated_delivery_at = Some(
				now + Duration::minutes(*estimated_prep_minutes as i64) + ctx.delivery_slack,
			);
			format!(
				"Chef accepted the order, ready in about {} minutes",
				estimated_prep_minutes
			)
		},

		(OrderStatus::SentToChef, OrderCommand::DeclineByChef { reason }) => {
			require_chef(order, actor).ok_or_else(illegal)?;
			let reason = non_empty(reason, "decline reason")?;
			let total = order.money.total;
			next.status = OrderStatus::ChefDeclined;
			next.chef_declined_at = Some(now);
			next.payment_status = penalty::payment_status_after_refund(total, total);
			next.cancellation = Some(CancellationRecord {
				reason: reason.clone(),
				notes: None,
				cancelled_by: actor.to_string(),
				penalty_amount: Decimal::ZERO,
				refund_amount: total,
				refund_status: refund_status_for(total),
			});
			quote = Some(PenaltyQuote::free(total));
			format!("Chef declined the order: {}", reason)
		},

		(OrderStatus::ReadyForPickup, OrderCommand::AcceptByDriver) => {
			let Actor::Driver { id } = actor else {
				return Err(illegal());
			};
			if order.delivery_partner_id.is_some() {
				return Err(illegal());
			}
			next.status = OrderStatus::DeliveryAssigned;
			next.delivery_partner_id = Some(id.clone());
			"Delivery partner assigned".to_string()
		},

		(state, OrderCommand::Advance { target }) => {
			let message = match (state, *target) {
				(OrderStatus::ChefAccepted, OrderStatus::Preparing) => {
					require_chef(order, actor).ok_or_else(illegal)?;
					"Chef started preparing the order"
				},
				(OrderStatus::Preparing, OrderStatus::ReadyForPickup) => {
					require_chef(order, actor).ok_or_else(illegal)?;
					next.prepared_at = Some(now);
					"Order is ready for pickup"
				},
				(OrderStatus::DeliveryAssigned, OrderStatus::PickedUp) => {
					require_driver(order, actor).ok_or_else(illegal)?;
					next.picked_up_at = Some(now);
					"Order picked up"
				},
				(OrderStatus::PickedUp, OrderStatus::OutForDelivery) => {
					require_driver(order, actor).ok_or_else(illegal)?;
					"Order is out for delivery"
				},
				(OrderStatus::OutForDelivery, OrderStatus::Delivered) => {
					require_driver(order, actor).ok_or_else(illegal)?;
					next.delivered_at = Some(now);
					"Order delivered"
				},
				_ => return Err(illegal()),
			};
			next.status = *target;
			message.to_string()
		},

		_ => return Err(illegal()),
	};

	if next.status != OrderStatus::PaymentConfirmed {
		next.countdown_expiry = None;
	}
	next.refresh_free_flag(now);
	next.updated_at = now;

	Ok(Transition {
		order: next,
		from: order.status,
		message,
		quote,
	})
}

/// `Some(())` when `actor` is the chef assigned to `order`.
fn require_chef(order: &Order, actor: &Actor) -> Option<()> {
	match actor {
		Actor::Chef { id } if *id == order.chef_id => Some(()),
		_ => None,
	}
}

/// `Some(())` when `actor` is the driver assigned to `order`.
fn require_driver(order: &Order, actor: &Actor) -> Option<()> {
	match (actor, &order.delivery_partner_id) {
		(Actor::Driver { id }, Some(assigned)) if id == assigned => Some(()),
		_ => None,
	}
}

fn non_empty(value: &str, what: &str) -> Result<String, TransitionError> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(TransitionError::InvalidInput(format!("{} is required", what)));
	}
	Ok(trimmed.to_string())
}

fn refund_status_for(refund: Decimal) -> RefundStatus {
	if refund > Decimal::ZERO {
		RefundStatus::Pending
	} else {
		RefundStatus::Completed
	}
}

/// Whether `(from, to)` appears anywhere in the transition table, and which
/// roles may drive it.
pub fn legal_roles(from: OrderStatus, to: OrderStatus) -> &'static [ActorRole] {
	use OrderStatus::*;
	match (from, to) {
		(PaymentConfirmed, SentToChef) => &[ActorRole::System],
		(PaymentConfirmed, Cancelled) => &[ActorRole::Customer, ActorRole::System],
		(SentToChef, Cancelled) => &[ActorRole::Customer, ActorRole::System],
		(SentToChef, ChefAccepted) | (SentToChef, ChefDeclined) => &[ActorRole::Chef],
		(ChefAccepted, Preparing) | (Preparing, ReadyForPickup) => &[ActorRole::Chef],
		(ReadyForPickup, DeliveryAssigned)
		| (DeliveryAssigned, PickedUp)
		| (PickedUp, OutForDelivery)
		| (OutForDelivery, Delivered) => &[ActorRole::Driver],
		(from, Cancelled) if !from.is_terminal() => &[ActorRole::System],
		_ => &[],
	}
}
