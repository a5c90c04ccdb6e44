use super::*;
use crate::builder::{EngineBuilder, EngineFactories};
use crate::clock::ManualClock;
use chrono::{DateTime, TimeZone, Utc};
use homechef_config::builders::config::ConfigBuilder;
use homechef_sink::implementations::ledger::LedgerSink;
use homechef_sink::{SinkFactory, SinkInterface};
use homechef_storage::StorageFactory;
use homechef_types::{
	CancellationType, MoneyBreakdown, PaymentStatus, PlaceOrderItem, RefundStatus,
};
use rust_decimal_macros::dec;

pub(super) fn t0() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
}

pub(super) fn factories() -> EngineFactories<StorageFactory, SinkFactory> {
	EngineFactories {
		storage_factories: homechef_storage::get_all_implementations()
			.into_iter()
			.map(|(name, f)| (name.to_string(), f))
			.collect(),
		sink_factories: homechef_sink::get_all_implementations()
			.into_iter()
			.map(|(name, f)| (name.to_string(), f))
			.collect(),
	}
}

pub(super) struct TestEngine {
	pub engine: OrderEngine,
	pub clock: Arc<ManualClock>,
	pub ledger: Arc<LedgerSink>,
}

pub(super) fn build(builder: ConfigBuilder) -> TestEngine {
	build_with_clock(builder, Arc::new(ManualClock::new(t0())))
}

fn build_with_clock(builder: ConfigBuilder, clock: Arc<ManualClock>) -> TestEngine {
	let ledger = Arc::new(LedgerSink::new("tr", None));
	let engine = EngineBuilder::new(builder.build())
		.with_clock(clock.clone())
		.with_sink("payouts", ledger.clone() as Arc<dyn SinkInterface>)
		.build(factories())
		.unwrap();
	TestEngine {
		engine,
		clock,
		ledger,
	}
}

pub(super) fn request(total: Decimal) -> PlaceOrderRequest {
	PlaceOrderRequest {
		customer_id: "cust-1".into(),
		chef_id: "chef-1".into(),
		items: vec![PlaceOrderItem {
			menu_item_id: "thali".into(),
			name: "Veg thali".into(),
			unit_price: total,
			quantity: 1,
			notes: None,
		}],
		money: MoneyBreakdown {
			subtotal: total,
			delivery_fee: dec!(0),
			service_fee: dec!(0),
			tax: dec!(0),
			tip_total: dec!(0),
			discount: dec!(0),
			total,
		},
		delivery_address: "12 Curry Lane".into(),
		special_instructions: None,
	}
}

fn customer_cancel(reason: &str) -> CancelRequest {
	CancelRequest {
		actor: Actor::customer("cust-1"),
		reason: reason.into(),
		notes: None,
	}
}

fn advance_by(actor: Actor, target: OrderStatus) -> AdvanceRequest {
	AdvanceRequest {
		actor,
		target_status: target,
	}
}

fn tip(recipient_type: RecipientType, amount: Decimal, token: Option<&str>) -> AddTipRequest {
	AddTipRequest {
		customer_id: "cust-1".into(),
		recipient_type,
		amount,
		message: Some("Thank you".into()),
		client_token: token.map(str::to_string),
	}
}

/// Lets the countdown run out and fires it.
pub(super) async fn promote(t: &TestEngine) {
	t.clock.advance_secs(31);
	t.engine.scheduler().fire_due().await;
}

pub(super) async fn drive_to(t: &TestEngine, id: &str, target: OrderStatus) {
	let chef = || Actor::chef("chef-1");
	let driver = || Actor::driver("driver-1");
	let steps: Vec<OrderStatus> = vec![
		OrderStatus::ChefAccepted,
		OrderStatus::Preparing,
		OrderStatus::ReadyForPickup,
		OrderStatus::DeliveryAssigned,
		OrderStatus::PickedUp,
		OrderStatus::OutForDelivery,
		OrderStatus::Delivered,
	];
	for step in steps {
		let order = match step {
			OrderStatus::ChefAccepted => t
				.engine
				.accept_by_chef(
					id,
					AcceptByChefRequest {
						chef_id: "chef-1".into(),
						estimated_prep_minutes: 20,
					},
				)
				.await
				.unwrap(),
			OrderStatus::Preparing | OrderStatus::ReadyForPickup => {
				t.engine.advance(id, advance_by(chef(), step)).await.unwrap()
			},
			OrderStatus::DeliveryAssigned => t
				.engine
				.accept_delivery(
					id,
					AcceptDeliveryRequest {
						driver_id: "driver-1".into(),
					},
				)
				.await
				.unwrap(),
			_ => t.engine.advance(id, advance_by(driver(), step)).await.unwrap(),
		};
		assert_eq!(order.status, step);
		if step == target {
			return;
		}
	}
}

async fn drain(t: &TestEngine) {
	for _ in 0..5 {
		if t.engine.dispatcher().pending_len() == 0 {
			return;
		}
		t.engine.dispatcher().dispatch_pending().await;
	}
}

#[tokio::test]
async fn test_free_cancel_within_window() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	assert_eq!(order.status, OrderStatus::PaymentConfirmed);
	assert!(order.order_number.starts_with("HC-20260115-"));
	assert_eq!(order.countdown_expiry, Some(t0() + chrono::Duration::seconds(30)));

	t.clock.advance_secs(10);
	let outcome = t
		.engine
		.cancel(&order.id, customer_cancel("Changed my mind"))
		.await
		.unwrap();
	assert_eq!(outcome.kind, CancellationType::Free);
	assert_eq!(outcome.penalty_amount, dec!(0));
	assert_eq!(outcome.refund_amount, dec!(400));
	assert_eq!(outcome.refund_timeline_days, 5);

	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);
	assert_eq!(order.payment_status, PaymentStatus::Refunded);
	assert_eq!(order.countdown_expiry, None);
	assert!(!order.can_cancel_free);

	t.clock.advance_secs(30);
	assert_eq!(t.engine.scheduler().fire_due().await, 0);
	assert_eq!(
		t.engine.get_order(&order.id).await.unwrap().status,
		OrderStatus::Cancelled
	);
}

#[tokio::test]
async fn test_free_window_includes_expiry_instant() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	t.clock.advance_secs(30);

	let info = t.engine.get_cancellation_info(&order.id).await.unwrap();
	assert!(info.is_free);
	assert_eq!(info.projected_penalty, dec!(0));
	let countdown = t.engine.get_countdown_status(&order.id).await.unwrap();
	assert!(countdown.can_cancel_free);
	assert_eq!(countdown.time_remaining_seconds, 0);
	assert!(t.engine.get_order(&order.id).await.unwrap().can_cancel_free);

	let outcome = t
		.engine
		.cancel(&order.id, customer_cancel("Right at the wire"))
		.await
		.unwrap();
	assert_eq!(outcome.kind, CancellationType::Free);
	assert_eq!(outcome.refund_amount, dec!(400));
}

#[tokio::test]
async fn test_penalty_cancel_after_window() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();

	t.clock.advance_secs(45);
	let outcome = t
		.engine
		.cancel(&order.id, customer_cancel("Too slow"))
		.await
		.unwrap();
	assert_eq!(outcome.kind, CancellationType::Penalty);
	assert_eq!(outcome.penalty_amount, dec!(160));
	assert_eq!(outcome.refund_amount, dec!(240));

	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
	let cancellation = order.cancellation.unwrap();
	assert_eq!(cancellation.cancelled_by, "customer:cust-1");
	assert_eq!(cancellation.refund_status, RefundStatus::Pending);
}

#[tokio::test]
async fn test_min_penalty_clamp() {
	let t = build(ConfigBuilder::new().default_policy(30, dec!(0.40), dec!(50), dec!(500)));
	let order = t.engine.place_order(request(dec!(80))).await.unwrap();

	t.clock.advance_secs(45);
	let outcome = t
		.engine
		.cancel(&order.id, customer_cancel("Too slow"))
		.await
		.unwrap();
	assert_eq!(outcome.penalty_amount, dec!(50));
	assert_eq!(outcome.refund_amount, dec!(30));
}

#[tokio::test]
async fn test_timer_autopromotion_then_penalty_cancel() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();

	t.clock.advance_secs(31);
	assert_eq!(t.engine.scheduler().fire_due().await, 1);
	let promoted = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(promoted.status, OrderStatus::SentToChef);
	assert_eq!(promoted.countdown_expiry, None);
	assert!(!promoted.can_cancel_free);
	assert_eq!(promoted.version, 2);

	t.clock.advance_secs(9);
	let outcome = t
		.engine
		.cancel(&order.id, customer_cancel("Found something else"))
		.await
		.unwrap();
	assert_eq!(outcome.kind, CancellationType::Penalty);
	assert_eq!(outcome.penalty_amount, dec!(160));
	assert_eq!(outcome.refund_amount, dec!(240));
}

#[tokio::test]
async fn test_chef_decline_is_final() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(500))).await.unwrap();
	promote(&t).await;

	let declined = t
		.engine
		.decline_by_chef(
			&order.id,
			DeclineByChefRequest {
				chef_id: "chef-1".into(),
				reason: "Out of paneer".into(),
			},
		)
		.await
		.unwrap();
	assert_eq!(declined.status, OrderStatus::ChefDeclined);
	assert_eq!(declined.payment_status, PaymentStatus::Refunded);

	let journey = t.engine.get_order_journey(&order.id).await.unwrap();
	let summary = journey.cancellation_info.unwrap();
	assert_eq!(summary.penalty_amount, dec!(0));
	assert_eq!(summary.refund_amount, dec!(500));
	assert_eq!(summary.cancelled_at, declined.chef_declined_at);

	let err = t
		.engine
		.cancel(&order.id, customer_cancel("Please"))
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		EngineError::IllegalTransition {
			state: OrderStatus::ChefDeclined,
			..
		}
	));
	let err = t
		.engine
		.accept_by_chef(
			&order.id,
			AcceptByChefRequest {
				chef_id: "chef-1".into(),
				estimated_prep_minutes: 10,
			},
		)
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::IllegalTransition { .. }));
	let err = t
		.engine
		.cancel(
			&order.id,
			CancelRequest {
				actor: Actor::admin("ops-1"),
				reason: "cleanup".into(),
				notes: None,
			},
		)
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_tip_only_after_delivery() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	promote(&t).await;
	drive_to(&t, &order.id, OrderStatus::PickedUp).await;

	let err = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Chef, dec!(50), None))
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		EngineError::IllegalTransition {
			state: OrderStatus::PickedUp,
			..
		}
	));

	t.engine
		.advance(&order.id, advance_by(Actor::driver("driver-1"), OrderStatus::OutForDelivery))
		.await
		.unwrap();
	t.engine
		.advance(&order.id, advance_by(Actor::driver("driver-1"), OrderStatus::Delivered))
		.await
		.unwrap();

	let added = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Chef, dec!(50), None))
		.await
		.unwrap();
	assert_eq!(added.status, TipStatus::Processing);
	assert_eq!(added.recipient_id, "chef-1");

	let err = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Chef, dec!(50), None))
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::InvalidInput(ref msg) if msg == "duplicate"));

	drain(&t).await;
	assert_eq!(t.ledger.balance("chef-1"), dec!(50));
	assert_eq!(t.ledger.credit_count(), 1);

	let journey = t.engine.get_order_journey(&order.id).await.unwrap();
	assert_eq!(journey.tipping_info.tips[0].status, TipStatus::Completed);
	assert!(journey.tipping_info.tips[0].transfer_id.is_some());
	assert_eq!(journey.tipping_info.tip_total, dec!(50));
	assert_eq!(journey.tipping_info.open_recipients, vec![RecipientType::Delivery]);

	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.money.total, dec!(450));
	assert_eq!(order.money.total, order.money.computed_total());
}

#[tokio::test]
async fn test_tip_client_token_replays() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	promote(&t).await;
	drive_to(&t, &order.id, OrderStatus::Delivered).await;

	let first = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Delivery, dec!(25.50), Some("tok-1")))
		.await
		.unwrap();
	let again = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Delivery, dec!(25.50), Some("tok-1")))
		.await
		.unwrap();
	assert_eq!(first, again);
	assert_eq!(first.recipient_id, "driver-1");

	drain(&t).await;
	assert_eq!(t.ledger.balance("driver-1"), dec!(25.50));
	let replay = t
		.engine
		.add_tip(&order.id, tip(RecipientType::Delivery, dec!(25.50), Some("tok-1")))
		.await
		.unwrap();
	assert_eq!(replay.id, first.id);
	assert_eq!(replay.status, TipStatus::Completed);
}

#[tokio::test]
async fn test_tip_validation() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	promote(&t).await;
	drive_to(&t, &order.id, OrderStatus::Delivered).await;

	for amount in [dec!(0), dec!(-5), dec!(1.234)] {
		let err = t
			.engine
			.add_tip(&order.id, tip(RecipientType::Chef, amount, None))
			.await
			.unwrap_err();
		assert!(matches!(err, EngineError::InvalidInput(_)), "{}", amount);
	}

	let mut stranger = tip(RecipientType::Chef, dec!(10), None);
	stranger.customer_id = "cust-2".into();
	let err = t.engine.add_tip(&order.id, stranger).await.unwrap_err();
	assert!(matches!(err, EngineError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_confirm_after_timer_is_idempotent() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();

	let err = t.engine.confirm_after_timer(&order.id).await.unwrap_err();
	assert!(matches!(err, EngineError::InvalidInput(_)));

	t.clock.advance_secs(30);
	let first = t.engine.confirm_after_timer(&order.id).await.unwrap();
	assert_eq!(first.status, OrderStatus::SentToChef);

	let err = t.engine.confirm_after_timer(&order.id).await.unwrap_err();
	let EngineError::AlreadyDone(second) = err else {
		panic!("expected AlreadyDone, got {:?}", err);
	};
	assert_eq!(second.status, OrderStatus::SentToChef);
	assert_eq!(second.version, first.version);

	// The scheduler's copy of the countdown is now a no-op.
	assert_eq!(t.engine.scheduler().fire_due().await, 0);
	let history = t.engine.get_order_journey(&order.id).await.unwrap().timeline;
	assert_eq!(history.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_commit_once() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	t.clock.advance_secs(10);

	let handles: Vec<_> = (0..8)
		.map(|i| {
			let engine = t.engine.clone();
			let id = order.id.clone();
			tokio::spawn(async move {
				engine
					.cancel(&id, customer_cancel(&format!("attempt {}", i)))
					.await
			})
		})
		.collect();
	let mut results = Vec::new();
	for handle in handles {
		results.push(handle.await.unwrap());
	}

	assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
	for err in results.iter().filter_map(|r| r.as_ref().err()) {
		assert!(
			matches!(err, EngineError::IllegalTransition { .. }),
			"unexpected {:?}",
			err
		);
	}

	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);
	assert_eq!(order.version, 2);
	let sequences: Vec<_> = t
		.engine
		.get_order_journey(&order.id)
		.await
		.unwrap()
		.timeline
		.iter()
		.map(|s| s.sequence)
		.collect();
	assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_timer_confirmation() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	t.clock.advance_secs(31);

	let handles: Vec<_> = (0..8)
		.map(|i| {
			let engine = t.engine.clone();
			let id = order.id.clone();
			tokio::spawn(async move {
				if i % 2 == 0 {
					engine.cancel(&id, customer_cancel("too slow")).await.map(|_| true)
				} else {
					engine.confirm_after_timer(&id).await.map(|_| false)
				}
			})
		})
		.collect();
	let mut results = Vec::new();
	for handle in handles {
		results.push(handle.await.unwrap());
	}

	let cancels = results.iter().filter(|r| matches!(r, Ok(true))).count();
	let confirms = results.iter().filter(|r| matches!(r, Ok(false))).count();
	assert_eq!(cancels, 1);
	assert!(confirms <= 1);
	for err in results.iter().filter_map(|r| r.as_ref().err()) {
		assert!(
			matches!(
				err,
				EngineError::IllegalTransition { .. } | EngineError::AlreadyDone(_)
			),
			"unexpected {:?}",
			err
		);
	}

	// A cancel that beats the timer leaves nothing for the chef; one that
	// lands after it cancels from SentToChef. Either way rows stay contiguous.
	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);
	let commits = (cancels + confirms) as u64;
	assert_eq!(order.version, 1 + commits);
	let sequences: Vec<_> = t
		.engine
		.get_order_journey(&order.id)
		.await
		.unwrap()
		.timeline
		.iter()
		.map(|s| s.sequence)
		.collect();
	assert_eq!(sequences, (1..=1 + commits).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_place_order_validation() {
	let t = build(ConfigBuilder::new());

	let mut wrong_total = request(dec!(400));
	wrong_total.money.total = dec!(390);
	assert!(matches!(
		t.engine.place_order(wrong_total).await,
		Err(EngineError::PolicyViolation(_))
	));

	let mut negative = request(dec!(400));
	negative.money.discount = dec!(-10);
	negative.money.total = dec!(410);
	assert!(matches!(
		t.engine.place_order(negative).await,
		Err(EngineError::InvalidInput(_))
	));

	let mut mismatched = request(dec!(400));
	mismatched.items[0].quantity = 2;
	assert!(matches!(
		t.engine.place_order(mismatched).await,
		Err(EngineError::InvalidInput(_))
	));

	let mut no_items = request(dec!(400));
	no_items.items.clear();
	assert!(matches!(
		t.engine.place_order(no_items).await,
		Err(EngineError::InvalidInput(_))
	));

	let mut tipped = request(dec!(400));
	tipped.money.tip_total = dec!(10);
	tipped.money.total = dec!(410);
	assert!(matches!(
		t.engine.place_order(tipped).await,
		Err(EngineError::InvalidInput(_))
	));

	let mut fees = request(dec!(350));
	fees.money.delivery_fee = dec!(30);
	fees.money.service_fee = dec!(10);
	fees.money.tax = dec!(20);
	fees.money.discount = dec!(10);
	fees.money.total = dec!(400);
	let order = t.engine.place_order(fees).await.unwrap();
	assert_eq!(order.money.total, dec!(400));
}

#[tokio::test]
async fn test_cancellation_info_and_countdown() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();

	t.clock.advance_secs(10);
	let info = t.engine.get_cancellation_info(&order.id).await.unwrap();
	assert!(info.can_cancel);
	assert!(info.is_free);
	assert_eq!(info.elapsed_seconds, 10);
	assert_eq!(info.projected_penalty, dec!(0));
	assert_eq!(info.projected_refund, dec!(400));

	let countdown = t.engine.get_countdown_status(&order.id).await.unwrap();
	assert!(countdown.active);
	assert!(countdown.can_cancel_free);
	assert_eq!(countdown.time_remaining_seconds, 20);
	assert_eq!(countdown.total_window_seconds, 30);
	assert!((countdown.progress_pct - 100.0 / 3.0).abs() < 0.01);
	assert_eq!(countdown.penalty_after_expiry, dec!(160));

	t.clock.advance_secs(35);
	let info = t.engine.get_cancellation_info(&order.id).await.unwrap();
	assert!(info.can_cancel);
	assert!(!info.is_free);
	assert_eq!(info.projected_penalty, dec!(160));
	let countdown = t.engine.get_countdown_status(&order.id).await.unwrap();
	assert!(!countdown.active);
	assert_eq!(countdown.time_remaining_seconds, 0);
	assert_eq!(countdown.progress_pct, 100.0);

	t.engine.scheduler().fire_due().await;
	drive_to(&t, &order.id, OrderStatus::ChefAccepted).await;
	let info = t.engine.get_cancellation_info(&order.id).await.unwrap();
	assert!(!info.can_cancel);
	assert_eq!(info.projected_refund, dec!(0));
}

#[tokio::test]
async fn test_admin_cancel_after_acceptance_takes_penalty() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	promote(&t).await;
	drive_to(&t, &order.id, OrderStatus::Preparing).await;

	let err = t
		.engine
		.cancel(&order.id, customer_cancel("Hungry elsewhere"))
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::IllegalTransition { .. }));

	let err = t
		.engine
		.cancel(
			&order.id,
			CancelRequest {
				actor: Actor::admin("ops-1"),
				reason: "  ".into(),
				notes: None,
			},
		)
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::InvalidInput(_)));

	let outcome = t
		.engine
		.cancel(
			&order.id,
			CancelRequest {
				actor: Actor::admin("ops-1"),
				reason: "Kitchen closed".into(),
				notes: Some("fire alarm".into()),
			},
		)
		.await
		.unwrap();
	assert_eq!(outcome.penalty_amount, dec!(160));
	assert_eq!(outcome.refund_amount, dec!(240));
	let order = t.engine.get_order(&order.id).await.unwrap();
	assert_eq!(order.cancellation.unwrap().cancelled_by, "admin:ops-1");
}

#[tokio::test]
async fn test_policy_update_applies_to_new_orders_only() {
	let t = build(ConfigBuilder::new());
	let before = t.engine.place_order(request(dec!(400))).await.unwrap();

	assert!(matches!(
		t.engine
			.update_active_policy(
				PolicyPatch {
					free_window_seconds: Some(60),
					..Default::default()
				},
				" ",
			)
			.await,
		Err(EngineError::InvalidInput(_))
	));
	assert!(matches!(
		t.engine
			.update_active_policy(
				PolicyPatch {
					free_window_seconds: Some(601),
					..Default::default()
				},
				"ops-1",
			)
			.await,
		Err(EngineError::InvalidInput(_))
	));

	let mut events = t.engine.event_bus().subscribe();
	let policy = t
		.engine
		.update_active_policy(
			PolicyPatch {
				free_window_seconds: Some(60),
				..Default::default()
			},
			"ops-1",
		)
		.await
		.unwrap();
	assert_eq!(policy.version, 2);
	assert_eq!(events.recv().await.unwrap(), EngineEvent::PolicyUpdated { version: 2 });

	let after = t.engine.place_order(request(dec!(400))).await.unwrap();
	assert_eq!(after.free_window_seconds, 60);
	assert_eq!(t.engine.get_order(&before.id).await.unwrap().free_window_seconds, 30);

	t.clock.advance_secs(45);
	let early = t
		.engine
		.cancel(&before.id, customer_cancel("late"))
		.await
		.unwrap();
	assert_eq!(early.kind, CancellationType::Penalty);
	let late = t
		.engine
		.cancel(&after.id, customer_cancel("still free"))
		.await
		.unwrap();
	assert_eq!(late.kind, CancellationType::Free);

	let history = t.engine.policy_history().await.unwrap();
	assert_eq!(history.len(), 2);
	assert_eq!(history.iter().filter(|p| p.is_active).count(), 1);
	assert_eq!(t.engine.get_active_policy().await.unwrap().version, 2);
}

#[tokio::test]
async fn test_journey_and_lookup() {
	let t = build(ConfigBuilder::new());
	let order = t.engine.place_order(request(dec!(400))).await.unwrap();
	promote(&t).await;
	t.clock.advance_secs(60);
	drive_to(&t, &order.id, OrderStatus::ChefAccepted).await;

	let journey = t.engine.get_order_journey(&order.id).await.unwrap();
	let statuses: Vec<_> = journey.timeline.iter().map(|s| s.status).collect();
	assert_eq!(
		statuses,
		vec![
			OrderStatus::PaymentConfirmed,
			OrderStatus::SentToChef,
			OrderStatus::ChefAccepted
		]
	);
	let gaps: Vec<_> = journey
		.timeline
		.iter()
		.map(|s| s.seconds_since_previous)
		.collect();
	assert_eq!(gaps, vec![None, Some(31), Some(60)]);
	assert_eq!(journey.participants.chef_id, "chef-1");
	assert_eq!(journey.participants.delivery_partner_id, None);
	assert!(!journey.tipping_info.can_tip);
	assert_eq!(
		journey.estimated_delivery_at,
		Some(t.clock.now() + chrono::Duration::minutes(50))
	);

	let found = t.engine.get_order_by_number(&order.order_number).await.unwrap();
	assert_eq!(found.id, order.id);
	assert!(matches!(
		t.engine.get_order("missing").await,
		Err(EngineError::NotFound(_))
	));
	assert!(matches!(
		t.engine.get_order_by_number("HC-00000000-NOPE").await,
		Err(EngineError::NotFound(_))
	));
}

#[tokio::test]
async fn test_recovery_after_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().to_string_lossy().to_string();
	let clock = Arc::new(ManualClock::new(t0()));

	let order_id = {
		let first = build_with_clock(ConfigBuilder::new().file_storage(path.clone()), clock.clone());
		first.engine.place_order(request(dec!(400))).await.unwrap().id
	};

	let second = build_with_clock(ConfigBuilder::new().file_storage(path), clock.clone());
	assert!(second.engine.scheduler().queue().is_empty());
	let report = second.engine.initialize().await.unwrap();
	assert_eq!(report.scheduled_countdowns, 1);
	assert_eq!(report.orders_with_pending_events, 1);

	clock.advance_secs(31);
	assert_eq!(second.engine.scheduler().fire_due().await, 1);
	let order = second.engine.get_order(&order_id).await.unwrap();
	assert_eq!(order.status, OrderStatus::SentToChef);
}

#[tokio::test(start_paused = true)]
async fn test_operation_deadline() {
	let t = build(ConfigBuilder::new().operation_timeout_seconds(2));
	let result: Result<(), EngineError> = t
		.engine
		.with_deadline(std::future::pending::<Result<(), EngineError>>())
		.await;
	assert!(matches!(result, Err(EngineError::Timeout(2))));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
	let t = build(ConfigBuilder::new());
	let engine = t.engine.clone();
	let handle = tokio::spawn(async move { engine.run().await });
	tokio::task::yield_now().await;

	t.engine.shutdown().await.unwrap();
	handle.await.unwrap().unwrap();
}
