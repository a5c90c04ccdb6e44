//! Notification sink that writes each event as a structured tracing record.
//!
//! Stands in for the push/SMS/email bridges in development and keeps an audit
//! trail of what participants were told in production.

use crate::{SinkError, SinkInterface};
use async_trait::async_trait;
use homechef_types::{
	truncate_id, ConfigSchema, Field, FieldType, OrderEvent, OrderEventKind, Schema, SinkOutcome,
	SinkRole, ValidationError,
};

pub struct LogSink {
	include_payload: bool,
}

impl LogSink {
	pub fn new(include_payload: bool) -> Self {
		Self { include_payload }
	}
}

/// Short human summary of an event for the log line.
fn summary(kind: &OrderEventKind) -> String {
	match kind {
		OrderEventKind::StatusChanged { from: None, to, .. } => format!("order placed ({})", to),
		OrderEventKind::StatusChanged {
			from: Some(from),
			to,
			..
		} => format!("{} -> {}", from, to),
		OrderEventKind::TipAdded {
			recipient_type,
			amount,
			..
		} => format!("tip of {} for {}", amount, recipient_type),
		OrderEventKind::TipCompleted { tip_id, .. } => format!("tip {} disbursed", truncate_id(tip_id)),
		OrderEventKind::TipFailed { tip_id, reason } => {
			format!("tip {} failed: {}", truncate_id(tip_id), reason)
		},
	}
}

#[async_trait]
impl SinkInterface for LogSink {
	fn role(&self) -> SinkRole {
		SinkRole::Notification
	}

	async fn deliver(
		&self,
		event: &OrderEvent,
		delivery_key: &str,
	) -> Result<SinkOutcome, SinkError> {
		let text = summary(&event.kind);
		if self.include_payload {
			tracing::info!(
				target: "homechef::notifications",
				order_id = %truncate_id(&event.order_id),
				sequence = event.sequence,
				event = event.kind.name(),
				actor = %event.actor,
				key = %truncate_id(delivery_key),
				payload = %event.payload,
				"{}", text
			);
		} else {
			tracing::info!(
				target: "homechef::notifications",
				order_id = %truncate_id(&event.order_id),
				sequence = event.sequence,
				event = event.kind.name(),
				actor = %event.actor,
				key = %truncate_id(delivery_key),
				"{}", text
			);
		}
		Ok(SinkOutcome::accepted())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LogSinkSchema)
	}
}

pub struct LogSinkSchema;

impl ConfigSchema for LogSinkSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![Field::new("include_payload", FieldType::Boolean)],
		)
		.strict()
		.validate(config)
	}
}

/// Factory function to create a log sink from configuration.
///
/// Configuration parameters:
/// - `include_payload`: also log the event payload (default: false)
pub fn create_sink(config: &toml::Value) -> Result<Box<dyn SinkInterface>, SinkError> {
	LogSinkSchema
		.validate(config)
		.map_err(|e| SinkError::Configuration(e.to_string()))?;

	let include_payload = config
		.get("include_payload")
		.and_then(|v| v.as_bool())
		.unwrap_or(false);
	Ok(Box::new(LogSink::new(include_payload)))
}

/// Registry for the log sink implementation.
pub struct Registry;

impl homechef_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "log";
	type Factory = crate::SinkFactory;

	fn factory() -> Self::Factory {
		create_sink
	}
}

impl crate::SinkRegistry for Registry {}
