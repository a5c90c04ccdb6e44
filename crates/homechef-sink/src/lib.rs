//! Event sinks for the HomeChef order engine.
//!
//! A sink is the far end of the outbox: the dispatcher hands it one
//! [`OrderEvent`] at a time together with a deterministic delivery key, and
//! the sink reports whether the event was taken, should be retried, or will
//! never be accepted. Delivery is at-least-once, so sinks are expected to
//! treat the delivery key as an idempotency token.

use async_trait::async_trait;
use homechef_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, OrderEvent, OrderEventKind,
	SinkOutcome, SinkRole,
};
use sha3::{Digest, Sha3_256};
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod ledger;
	pub mod log;
	pub mod webhook;
}

/// Errors that can occur while talking to a sink.
///
/// The dispatcher treats every error as a transient failure.
#[derive(Debug, Error)]
pub enum SinkError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// The sink refused the request in a way it could not classify.
	#[error("Rejected: {0}")]
	Rejected(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait implemented by every sink.
#[async_trait]
pub trait SinkInterface: Send + Sync {
	/// The role this sink plays. Tip-disbursement acknowledgements complete tips.
	fn role(&self) -> SinkRole;

	/// Whether this sink wants `event` at all.
	///
	/// Events a sink does not accept are skipped without a call. By default
	/// notification sinks take everything and disbursement sinks only take
	/// newly added tips.
	fn accepts(&self, event: &OrderEvent) -> bool {
		match self.role() {
			SinkRole::Notification => true,
			SinkRole::TipDisbursement => matches!(event.kind, OrderEventKind::TipAdded { .. }),
		}
	}

	/// Delivers one event. `delivery_key` is stable across retries.
	async fn deliver(
		&self,
		event: &OrderEvent,
		delivery_key: &str,
	) -> Result<SinkOutcome, SinkError>;

	/// Returns the configuration schema for this sink implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for sink factory functions.
pub type SinkFactory = fn(&toml::Value) -> Result<Box<dyn SinkInterface>, SinkError>;

/// Registry trait for sink implementations.
pub trait SinkRegistry: ImplementationRegistry<Factory = SinkFactory> {}

/// Get all registered sink implementations.
pub fn get_all_implementations() -> Vec<(&'static str, SinkFactory)> {
	use implementations::{ledger, log, webhook};

	vec![
		(ledger::Registry::NAME, ledger::Registry::factory()),
		(log::Registry::NAME, log::Registry::factory()),
		(webhook::Registry::NAME, webhook::Registry::factory()),
	]
}

/// Deterministic idempotency token for one event at one sink.
///
/// `hex(sha3_256(order_id || sequence || sink_name))`, with the sequence as
/// big-endian bytes and a zero byte separating the strings.
pub fn delivery_key(order_id: &str, sequence: u64, sink_name: &str) -> String {
	let mut hasher = Sha3_256::new();
	hasher.update(order_id.as_bytes());
	hasher.update([0u8]);
	hasher.update(sequence.to_be_bytes());
	hasher.update(sink_name.as_bytes());
	hex::encode(hasher.finalize())
}

/// Optional `role` field shared by configurable sinks.
pub(crate) fn role_field() -> Field {
	Field::new("role", FieldType::String).with_validator(|v| match v.as_str() {
		Some("notification") | Some("tip_disbursement") => Ok(()),
		_ => Err("must be \"notification\" or \"tip_disbursement\"".to_string()),
	})
}

/// Reads the `role` field, falling back to `default`.
pub(crate) fn role_from_config(config: &toml::Value, default: SinkRole) -> SinkRole {
	match config.get("role").and_then(|v| v.as_str()) {
		Some("tip_disbursement") => SinkRole::TipDisbursement,
		Some("notification") => SinkRole::Notification,
		_ => default,
	}
}

/// A configured sink under its configuration name.
#[derive(Clone)]
pub struct NamedSink {
	pub name: String,
	pub sink: Arc<dyn SinkInterface>,
}

/// The set of sinks the dispatcher fans out to.
#[derive(Clone, Default)]
pub struct SinkService {
	sinks: Vec<NamedSink>,
}

impl SinkService {
	/// Creates a new SinkService. Sinks are kept in name order so fan-out is
	/// deterministic.
	pub fn new(mut sinks: Vec<NamedSink>) -> Self {
		sinks.sort_by(|a, b| a.name.cmp(&b.name));
		Self { sinks }
	}

	pub fn sinks(&self) -> &[NamedSink] {
		&self.sinks
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.sinks.iter().map(|s| s.name.as_str())
	}

	pub fn get(&self, name: &str) -> Option<&Arc<dyn SinkInterface>> {
		self.sinks.iter().find(|s| s.name == name).map(|s| &s.sink)
	}

	pub fn is_empty(&self) -> bool {
		self.sinks.is_empty()
	}

	pub fn has_tip_disbursement(&self) -> bool {
		self.sinks
			.iter()
			.any(|s| s.sink.role() == SinkRole::TipDisbursement)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_delivery_key_is_stable_and_distinct() {
		let a = delivery_key("order-1", 1, "log");
		assert_eq!(a, delivery_key("order-1", 1, "log"));
		assert_eq!(a.len(), 64);
		assert_ne!(a, delivery_key("order-1", 2, "log"));
		assert_ne!(a, delivery_key("order-1", 1, "ledger"));
		assert_ne!(a, delivery_key("order-11", 1, "log"));
	}

	#[test]
	fn test_role_parsing() {
		let table: toml::Value = toml::from_str("role = \"tip_disbursement\"").unwrap();
		assert_eq!(
			role_from_config(&table, SinkRole::Notification),
			SinkRole::TipDisbursement
		);
		let empty = toml::Value::Table(toml::map::Map::new());
		assert_eq!(
			role_from_config(&empty, SinkRole::Notification),
			SinkRole::Notification
		);
	}

	#[test]
	fn test_service_orders_by_name() {
		let log = implementations::log::LogSink::new(false);
		let ledger = implementations::ledger::LedgerSink::new("tr", None);
		let service = SinkService::new(vec![
			NamedSink {
				name: "log".into(),
				sink: Arc::new(log),
			},
			NamedSink {
				name: "ledger".into(),
				sink: Arc::new(ledger),
			},
		]);
		assert_eq!(service.names().collect::<Vec<_>>(), vec!["ledger", "log"]);
		assert!(service.has_tip_disbursement());
		assert!(service.get("log").is_some());
	}
}
