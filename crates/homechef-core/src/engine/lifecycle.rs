//! Lifecycle management for the order engine.
//!
//! Rebuilds worker state from storage before the engine starts serving and
//! stops the background workers on shutdown.

use super::OrderEngine;
use crate::recovery::{RecoveryReport, RecoveryService};

impl OrderEngine {
	/// Recovers countdowns and pending outbox deliveries from storage.
	pub async fn initialize(&self) -> Result<RecoveryReport, super::EngineError> {
		tracing::info!(engine_id = %self.config.engine.id, "Initializing order engine");

		let recovery = RecoveryService::new(self.scheduler.clone(), self.dispatcher.clone());
		let report = recovery.recover().await?;
		Ok(report)
	}

	/// Signals every background worker to stop.
	pub async fn shutdown(&self) -> Result<(), super::EngineError> {
		tracing::info!("Shutting down order engine");
		self.shutdown.cancel();
		Ok(())
	}
}
