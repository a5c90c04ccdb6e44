//! HTTP webhook sink.
//!
//! POSTs each event as JSON to a configured URL with the delivery key in the
//! `Idempotency-Key` header. The receiver is expected to deduplicate on that
//! header. Status codes map onto outcomes as follows: 2xx is accepted; 408,
//! 429 and 5xx are retried; any other status is a permanent failure.

use crate::{role_field, role_from_config, SinkError, SinkInterface};
use async_trait::async_trait;
use homechef_types::{
	truncate_id, ConfigSchema, Field, FieldType, OrderEvent, Schema, SinkOutcome, SinkRole,
	ValidationError,
};
use reqwest::StatusCode;
use std::time::Duration;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct WebhookSink {
	client: reqwest::Client,
	url: String,
	role: SinkRole,
}

impl WebhookSink {
	pub fn new(url: impl Into<String>, role: SinkRole, timeout: Duration) -> Result<Self, SinkError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| SinkError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
		Ok(Self {
			client,
			url: url.into(),
			role,
		})
	}
}

/// Maps a non-success response onto a sink outcome.
fn classify(status: StatusCode) -> SinkOutcome {
	if status == StatusCode::REQUEST_TIMEOUT
		|| status == StatusCode::TOO_MANY_REQUESTS
		|| status.is_server_error()
	{
		SinkOutcome::Retry {
			reason: format!("receiver answered {}", status),
		}
	} else {
		SinkOutcome::PermanentFailure {
			reason: format!("receiver answered {}", status),
		}
	}
}

#[async_trait]
impl SinkInterface for WebhookSink {
	fn role(&self) -> SinkRole {
		self.role
	}

	async fn deliver(
		&self,
		event: &OrderEvent,
		delivery_key: &str,
	) -> Result<SinkOutcome, SinkError> {
		let body = serde_json::json!({
			"delivery_key": delivery_key,
			"event": event,
		});

		let response = self
			.client
			.post(&self.url)
			.header(IDEMPOTENCY_HEADER, delivery_key)
			.json(&body)
			.send()
			.await
			.map_err(|e| SinkError::Network(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			tracing::debug!(
				order_id = %truncate_id(&event.order_id),
				sequence = event.sequence,
				status = %status,
				"Webhook delivery not accepted"
			);
			return Ok(classify(status));
		}

		// Disbursement receivers answer with {"reference": "..."}; others may
		// send anything, including an empty body.
		let reference = response
			.json::<serde_json::Value>()
			.await
			.ok()
			.and_then(|v| v.get("reference").and_then(|r| r.as_str()).map(String::from));

		Ok(SinkOutcome::Accepted { reference })
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(WebhookSinkSchema)
	}
}

pub struct WebhookSinkSchema;

impl ConfigSchema for WebhookSinkSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("url", FieldType::String).with_validator(|v| match v.as_str() {
				Some(s) if s.starts_with("http://") || s.starts_with("https://") => Ok(()),
				_ => Err("must be an http(s) URL".to_string()),
			})],
			vec![
				Field::new(
					"timeout_ms",
					FieldType::Integer {
						min: Some(1),
						max: Some(60_000),
					},
				),
				role_field(),
			],
		)
		.strict()
		.validate(config)
	}
}

/// Factory function to create a webhook sink from configuration.
///
/// Configuration parameters:
/// - `url`: receiver endpoint (required)
/// - `timeout_ms`: per-request timeout (default: 5000)
/// - `role`: "notification" or "tip_disbursement" (default: "notification")
pub fn create_sink(config: &toml::Value) -> Result<Box<dyn SinkInterface>, SinkError> {
	WebhookSinkSchema
		.validate(config)
		.map_err(|e| SinkError::Configuration(e.to_string()))?;

	let url = config
		.get("url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| SinkError::Configuration("url is required".into()))?;
	let timeout_ms = config
		.get("timeout_ms")
		.and_then(|v| v.as_integer())
		.unwrap_or(5000) as u64;
	let role = role_from_config(config, SinkRole::Notification);

	Ok(Box::new(WebhookSink::new(
		url,
		role,
		Duration::from_millis(timeout_ms),
	)?))
}

/// Registry for the webhook sink implementation.
pub struct Registry;

impl homechef_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "webhook";
	type Factory = crate::SinkFactory;

	fn factory() -> Self::Factory {
		create_sink
	}
}

impl crate::SinkRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{
		extract::State,
		http::{HeaderMap, StatusCode as AxumStatus},
		routing::post,
		Json, Router,
	};
	use chrono::Utc;
	use homechef_types::{Actor, OrderEventKind, OrderStatus};
	use std::sync::{Arc, Mutex};

	fn event() -> OrderEvent {
		OrderEvent {
			order_id: "o-1".into(),
			sequence: 1,
			kind: OrderEventKind::StatusChanged {
				from: None,
				to: OrderStatus::PaymentConfirmed,
				history_sequence: 1,
			},
			actor: Actor::customer("c-1"),
			timestamp: Utc::now(),
			payload: serde_json::json!({}),
		}
	}

	/// Serves `status` on POST / and records the idempotency keys it saw.
	async fn receiver(status: u16) -> (String, Arc<Mutex<Vec<String>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let app = Router::new()
			.route(
				"/",
				post(
					move |State(seen): State<Arc<Mutex<Vec<String>>>>, headers: HeaderMap| async move {
						if let Some(key) = headers.get(IDEMPOTENCY_HEADER) {
							seen.lock()
								.unwrap()
								.push(key.to_str().unwrap_or_default().to_string());
						}
						(
							AxumStatus::from_u16(status).unwrap(),
							Json(serde_json::json!({"reference": "ref-1"})),
						)
					},
				),
			)
			.with_state(seen.clone());
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		(format!("http://{}/", addr), seen)
	}

	#[tokio::test]
	async fn test_success_carries_reference_and_key() {
		let (url, seen) = receiver(200).await;
		let sink = WebhookSink::new(url, SinkRole::TipDisbursement, Duration::from_secs(2)).unwrap();
		let outcome = sink.deliver(&event(), "key-1").await.unwrap();
		assert_eq!(
			outcome,
			SinkOutcome::Accepted {
				reference: Some("ref-1".into())
			}
		);
		assert_eq!(seen.lock().unwrap().as_slice(), ["key-1".to_string()]);
	}

	#[tokio::test]
	async fn test_server_error_is_retried() {
		let (url, _) = receiver(503).await;
		let sink = WebhookSink::new(url, SinkRole::Notification, Duration::from_secs(2)).unwrap();
		let outcome = sink.deliver(&event(), "key-1").await.unwrap();
		assert!(matches!(outcome, SinkOutcome::Retry { .. }));
	}

	#[tokio::test]
	async fn test_client_error_is_permanent() {
		let (url, _) = receiver(422).await;
		let sink = WebhookSink::new(url, SinkRole::Notification, Duration::from_secs(2)).unwrap();
		let outcome = sink.deliver(&event(), "key-1").await.unwrap();
		assert!(matches!(outcome, SinkOutcome::PermanentFailure { .. }));
	}

	#[test]
	fn test_classify() {
		assert!(matches!(
			classify(StatusCode::TOO_MANY_REQUESTS),
			SinkOutcome::Retry { .. }
		));
		assert!(matches!(
			classify(StatusCode::REQUEST_TIMEOUT),
			SinkOutcome::Retry { .. }
		));
		assert!(matches!(
			classify(StatusCode::NOT_FOUND),
			SinkOutcome::PermanentFailure { .. }
		));
	}

	#[test]
	fn test_config_requires_http_url() {
		let bad: toml::Value = toml::from_str("url = \"ftp://hooks\"").unwrap();
		assert!(create_sink(&bad).is_err());
		let good: toml::Value =
			toml::from_str("url = \"https://hooks.local/tips\"\nrole = \"tip_disbursement\"")
				.unwrap();
		let sink = create_sink(&good).unwrap();
		assert_eq!(sink.role(), SinkRole::TipDisbursement);
	}
}
