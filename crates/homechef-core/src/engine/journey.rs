//! Derived order journey view.

use chrono::{DateTime, Utc};
use homechef_types::{
	CancellationSummary, JourneyStep, OrderJourney, OrderRecord, OrderStatus, Participants,
	RecipientType, TippingInfo,
};

pub(super) fn build(record: &OrderRecord) -> OrderJourney {
	let order = &record.order;

	let timeline = record
		.history
		.iter()
		.scan(None::<DateTime<Utc>>, |previous, entry| {
			let seconds_since_previous =
				previous.map(|at| (entry.created_at - at).num_seconds().max(0));
			*previous = Some(entry.created_at);
			Some(JourneyStep {
				sequence: entry.sequence,
				status: entry.status,
				message: entry.message.clone(),
				actor_role: entry.actor_role,
				actor_id: entry.actor_id.clone(),
				at: entry.created_at,
				seconds_since_previous,
			})
		})
		.collect();

	let cancellation_info = order.cancellation.as_ref().map(|c| CancellationSummary {
		reason: c.reason.clone(),
		cancelled_by: c.cancelled_by.clone(),
		cancelled_at: order.cancelled_at.or(order.chef_declined_at),
		penalty_amount: c.penalty_amount,
		refund_amount: c.refund_amount,
		refund_status: c.refund_status,
	});

	let open_recipients: Vec<RecipientType> = if order.status == OrderStatus::Delivered {
		[RecipientType::Chef, RecipientType::Delivery]
			.into_iter()
			.filter(|recipient| {
				*recipient != RecipientType::Delivery || order.delivery_partner_id.is_some()
			})
			.filter(|recipient| {
				!record
					.tips
					.iter()
					.any(|t| t.recipient_type == *recipient && t.status.blocks_duplicate())
			})
			.collect()
	} else {
		Vec::new()
	};

	OrderJourney {
		order_id: order.id.clone(),
		order_number: order.order_number.clone(),
		current_status: order.status,
		timeline,
		participants: Participants {
			customer_id: order.customer_id.clone(),
			chef_id: order.chef_id.clone(),
			delivery_partner_id: order.delivery_partner_id.clone(),
		},
		estimated_delivery_at: order.estimated_delivery_at,
		cancellation_info,
		tipping_info: TippingInfo {
			can_tip: !open_recipients.is_empty(),
			open_recipients,
			tip_total: order.money.tip_total,
			tips: record.tips.clone(),
		},
	}
}
