//! Randomised event sequences against the in-memory store.

use super::tests::{build, request, t0};
use super::*;
use crate::state::transitions::legal_roles;
use homechef_config::builders::config::ConfigBuilder;
use homechef_types::OrderRecord;
use proptest::prelude::*;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
enum Op {
	Wait(u8),
	FireTimers,
	ConfirmAfterTimer,
	CustomerCancel,
	AdminCancel,
	ChefAccept(u32),
	ChefDecline,
	Advance(OrderStatus),
	DriverAccept,
	Tip(RecipientType, u16),
	Dispatch,
	UpdatePolicy(u64),
}

fn op() -> impl Strategy<Value = Op> {
	let target = prop::sample::select(vec![
		OrderStatus::Preparing,
		OrderStatus::ReadyForPickup,
		OrderStatus::PickedUp,
		OrderStatus::OutForDelivery,
		OrderStatus::Delivered,
	]);
	let recipient = prop::sample::select(vec![RecipientType::Chef, RecipientType::Delivery]);
	prop_oneof![
		3 => (1u8..40).prop_map(Op::Wait),
		2 => Just(Op::FireTimers),
		1 => Just(Op::ConfirmAfterTimer),
		1 => Just(Op::CustomerCancel),
		1 => Just(Op::AdminCancel),
		2 => (0u32..300).prop_map(Op::ChefAccept),
		1 => Just(Op::ChefDecline),
		6 => target.prop_map(Op::Advance),
		2 => Just(Op::DriverAccept),
		3 => (recipient, 1u16..5000).prop_map(|(r, cents)| Op::Tip(r, cents)),
		2 => Just(Op::Dispatch),
		1 => (1u64..120).prop_map(Op::UpdatePolicy),
	]
}

fn actor_for(target: OrderStatus) -> Actor {
	match target {
		OrderStatus::Preparing | OrderStatus::ReadyForPickup => Actor::chef("chef-1"),
		_ => Actor::driver("driver-1"),
	}
}

/// Runs `ops` against a fresh engine. Rejections are expected and ignored;
/// only the resulting state is checked.
async fn run_and_check(ops: Vec<Op>, total: Decimal) {
	let t = build(ConfigBuilder::new());
	let e = &t.engine;
	let id = e.place_order(request(total)).await.unwrap().id;

	for op in ops {
		let _ = match op {
			Op::Wait(secs) => {
				t.clock.advance_secs(secs as i64);
				Ok(())
			},
			Op::FireTimers => {
				e.scheduler().fire_due().await;
				Ok(())
			},
			Op::ConfirmAfterTimer => e.confirm_after_timer(&id).await.map(|_| ()),
			Op::CustomerCancel => e
				.cancel(
					&id,
					CancelRequest {
						actor: Actor::customer("cust-1"),
						reason: "changed plans".into(),
						notes: None,
					},
				)
				.await
				.map(|_| ()),
			Op::AdminCancel => e
				.cancel(
					&id,
					CancelRequest {
						actor: Actor::admin("ops-1"),
						reason: "support ticket".into(),
						notes: None,
					},
				)
				.await
				.map(|_| ()),
			Op::ChefAccept(minutes) => e
				.accept_by_chef(
					&id,
					AcceptByChefRequest {
						chef_id: "chef-1".into(),
						estimated_prep_minutes: minutes,
					},
				)
				.await
				.map(|_| ()),
			Op::ChefDecline => e
				.decline_by_chef(
					&id,
					DeclineByChefRequest {
						chef_id: "chef-1".into(),
						reason: "closed".into(),
					},
				)
				.await
				.map(|_| ()),
			Op::Advance(target) => e
				.advance(
					&id,
					AdvanceRequest {
						actor: actor_for(target),
						target_status: target,
					},
				)
				.await
				.map(|_| ()),
			Op::DriverAccept => e
				.accept_delivery(
					&id,
					AcceptDeliveryRequest {
						driver_id: "driver-1".into(),
					},
				)
				.await
				.map(|_| ()),
			Op::Tip(recipient_type, cents) => e
				.add_tip(
					&id,
					AddTipRequest {
						customer_id: "cust-1".into(),
						recipient_type,
						amount: Decimal::new(cents as i64, 2),
						message: None,
						client_token: None,
					},
				)
				.await
				.map(|_| ()),
			Op::Dispatch => {
				e.dispatcher().dispatch_pending().await;
				Ok(())
			},
			Op::UpdatePolicy(window) => e
				.update_active_policy(
					PolicyPatch {
						free_window_seconds: Some(window),
						..Default::default()
					},
					"ops-1",
				)
				.await
				.map(|_| ()),
		};
	}

	for _ in 0..10 {
		if e.dispatcher().pending_len() == 0 {
			break;
		}
		e.dispatcher().dispatch_pending().await;
	}

	let record = e.store.load(&id).await.unwrap();
	let order = &record.order;

	// Adjacent history rows are legal transitions by a legal role.
	for pair in record.history.windows(2) {
		let roles = legal_roles(pair[0].status, pair[1].status);
		assert!(
			roles.contains(&pair[1].actor_role),
			"{} -> {} by {}",
			pair[0].status,
			pair[1].status,
			pair[1].actor_role
		);
	}
	assert_eq!(record.history.last().map(|h| h.status), Some(order.status));

	// History sequence is contiguous from 1.
	let sequences: Vec<u64> = record.history.iter().map(|h| h.sequence).collect();
	let expected: Vec<u64> = (1..=record.history.len() as u64).collect();
	assert_eq!(sequences, expected);
	assert_eq!(order.version, record.history.len() as u64 + tip_commits(&record));

	if order.status == OrderStatus::Cancelled {
		let c = order.cancellation.as_ref().unwrap();
		assert!((c.penalty_amount + c.refund_amount - order.money.total).abs() <= dec!(0.01));
		assert!(c.penalty_amount >= Decimal::ZERO && c.refund_amount >= Decimal::ZERO);
	}

	if order.status == OrderStatus::PaymentConfirmed {
		let expiry = order.countdown_expiry.unwrap();
		assert!(expiry > order.created_at);
	} else {
		assert_eq!(order.countdown_expiry, None);
		assert!(!order.can_cancel_free);
	}

	let policies = e.policy_history().await.unwrap();
	assert_eq!(policies.iter().filter(|p| p.is_active).count(), 1);

	for recipient in [RecipientType::Chef, RecipientType::Delivery] {
		let completed: Vec<_> = record
			.tips
			.iter()
			.filter(|tip| tip.recipient_type == recipient && tip.status == TipStatus::Completed)
			.collect();
		assert!(completed.len() <= 1);
		let credited = completed
			.first()
			.map(|tip| t.ledger.balance(&tip.recipient_id))
			.unwrap_or(Decimal::ZERO);
		let amount = completed.first().map(|tip| tip.amount).unwrap_or(Decimal::ZERO);
		assert_eq!(credited, amount);
	}
	assert!(record
		.tips
		.iter()
		.all(|tip| tip.status != TipStatus::Processing));
	assert_eq!(order.money.total, order.money.computed_total());

	// Every outbox event reached the sink.
	let cursors = e.store.load_cursors(&id).await.unwrap();
	assert_eq!(cursors.delivered_through("payouts"), record.last_event_sequence());
	assert!(e.dead_letters().await.unwrap().is_empty());
	assert!(t.clock.now() >= t0());
}

/// Commits that did not append a history row.
fn tip_commits(record: &OrderRecord) -> u64 {
	record
		.outbox
		.iter()
		.filter(|event| !matches!(event.kind, OrderEventKind::StatusChanged { .. }))
		.count() as u64
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(64))]

	#[test]
	fn prop_order_invariants_hold(
		ops in prop::collection::vec(op(), 1..40),
		cents in 100i64..100_000,
	) {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.unwrap();
		runtime.block_on(run_and_check(ops, Decimal::new(cents, 2)));
	}
}
