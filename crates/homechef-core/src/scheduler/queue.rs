//! Countdown priority queue.

use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::sync::Mutex;
use tokio::sync::Notify;

/// A scheduled countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
	pub order_id: String,
	pub expiry: DateTime<Utc>,
	/// Order version when the countdown was scheduled.
	pub version: u64,
}

/// Earliest-expiry-first queue of countdowns, one entry per order.
#[derive(Default)]
pub struct CountdownQueue {
	inner: Mutex<PriorityQueue<String, Reverse<(DateTime<Utc>, u64)>>>,
	notify: Notify,
}

impl CountdownQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Schedules `order_id`, replacing any entry it already has.
	pub fn push(&self, order_id: &str, expiry: DateTime<Utc>, version: u64) {
		{
			let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
			queue.push(order_id.to_string(), Reverse((expiry, version)));
		}
		self.notify.notify_one();
	}

	/// Removes and returns every countdown expiring at or before `now`.
	pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Countdown> {
		let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		let mut due = Vec::new();
		while let Some((_, Reverse((expiry, _)))) = queue.peek() {
			if *expiry > now {
				break;
			}
			if let Some((order_id, Reverse((expiry, version)))) = queue.pop() {
				due.push(Countdown {
					order_id,
					expiry,
					version,
				});
			}
		}
		due
	}

	/// Expiry of the earliest countdown.
	pub fn next_due(&self) -> Option<DateTime<Utc>> {
		let queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		queue.peek().map(|(_, Reverse((expiry, _)))| *expiry)
	}

	/// Number of orders with a queued countdown.
	pub fn len(&self) -> usize {
		self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Resolves after the next `push`.
	pub async fn changed(&self) {
		self.notify.notified().await;
	}
}
