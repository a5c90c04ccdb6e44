//! Startup recovery.
//!
//! Nothing the background workers hold in memory is authoritative. After a
//! restart the countdown queue is rebuilt from orders still in
//! `PaymentConfirmed`, and the dispatcher is pointed at every order whose
//! outbox runs ahead of its delivery cursors.

use crate::dispatch::Dispatcher;
use crate::scheduler::CountdownScheduler;
use crate::store::StoreError;
use std::sync::Arc;
use tracing::instrument;

/// Report of the recovery operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
	/// Countdowns loaded into the scheduler.
	pub scheduled_countdowns: usize,
	/// Orders queued for outbox delivery.
	pub orders_with_pending_events: usize,
}

/// Rebuilds in-memory work from storage at startup.
pub struct RecoveryService {
	scheduler: Arc<CountdownScheduler>,
	dispatcher: Arc<Dispatcher>,
}

impl RecoveryService {
	pub fn new(scheduler: Arc<CountdownScheduler>, dispatcher: Arc<Dispatcher>) -> Self {
		Self {
			scheduler,
			dispatcher,
		}
	}

	/// Rebuilds in-memory worker state from storage.
	#[instrument(skip_all)]
	pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
		tracing::info!("Starting state recovery from storage");

		let report = RecoveryReport {
			scheduled_countdowns: self.scheduler.seed().await?,
			orders_with_pending_events: self.dispatcher.seed().await?,
		};

		tracing::info!(
			scheduled_countdowns = report.scheduled_countdowns,
			orders_with_pending_events = report.orders_with_pending_events,
			"Recovery completed"
		);
		Ok(report)
	}
}
