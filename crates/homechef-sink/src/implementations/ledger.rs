//! In-process tip disbursement ledger.
//!
//! Credits the recipient of every `TipAdded` event exactly once per delivery
//! key and returns a transfer reference. Replaying a key returns the original
//! reference without crediting again, which is what makes at-least-once
//! delivery safe for money movement.

use crate::{SinkError, SinkInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use homechef_types::{
	truncate_id, ConfigSchema, Field, FieldType, OrderEvent, OrderEventKind, Schema, SinkOutcome,
	SinkRole, ValidationError,
};
use rust_decimal::Decimal;
use std::str::FromStr;

/// One credit written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
	pub transfer_id: String,
	pub recipient_id: String,
	pub tip_id: String,
	pub amount: Decimal,
}

pub struct LedgerSink {
	transfer_prefix: String,
	/// Tips above this amount are refused permanently.
	max_amount: Option<Decimal>,
	/// Delivery key to credit.
	credits: DashMap<String, Credit>,
	balances: DashMap<String, Decimal>,
}

impl LedgerSink {
	pub fn new(transfer_prefix: impl Into<String>, max_amount: Option<Decimal>) -> Self {
		Self {
			transfer_prefix: transfer_prefix.into(),
			max_amount,
			credits: DashMap::new(),
			balances: DashMap::new(),
		}
	}

	/// Total credited to `recipient_id`.
	pub fn balance(&self, recipient_id: &str) -> Decimal {
		self.balances
			.get(recipient_id)
			.map(|b| *b)
			.unwrap_or(Decimal::ZERO)
	}

	/// Number of distinct credits written.
	pub fn credit_count(&self) -> usize {
		self.credits.len()
	}

	pub fn credits(&self) -> Vec<Credit> {
		self.credits.iter().map(|c| c.value().clone()).collect()
	}
}

#[async_trait]
impl SinkInterface for LedgerSink {
	fn role(&self) -> SinkRole {
		SinkRole::TipDisbursement
	}

	async fn deliver(
		&self,
		event: &OrderEvent,
		delivery_key: &str,
	) -> Result<SinkOutcome, SinkError> {
		let OrderEventKind::TipAdded {
			tip_id,
			recipient_id,
			amount,
			..
		} = &event.kind
		else {
			return Ok(SinkOutcome::PermanentFailure {
				reason: format!("ledger does not handle {} events", event.kind.name()),
			});
		};

		if amount.is_sign_negative() || amount.is_zero() {
			return Ok(SinkOutcome::PermanentFailure {
				reason: "tip amount must be positive".into(),
			});
		}
		if let Some(max) = self.max_amount.filter(|max| amount > max) {
			return Ok(SinkOutcome::PermanentFailure {
				reason: format!("tip amount {} exceeds ledger limit {}", amount, max),
			});
		}

		// Holding the entry keeps a concurrent replay of the same key out.
		let entry = self.credits.entry(delivery_key.to_string());
		let credit = match entry {
			dashmap::mapref::entry::Entry::Occupied(existing) => {
				tracing::debug!(
					key = %truncate_id(delivery_key),
					"Replayed disbursement, returning original transfer"
				);
				existing.get().clone()
			},
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				let short: String = delivery_key.chars().take(16).collect();
				let credit = Credit {
					transfer_id: format!("{}_{}", self.transfer_prefix, short),
					recipient_id: recipient_id.clone(),
					tip_id: tip_id.clone(),
					amount: *amount,
				};
				*self.balances.entry(recipient_id.clone()).or_insert(Decimal::ZERO) += *amount;
				tracing::info!(
					tip_id = %truncate_id(tip_id),
					recipient = %truncate_id(recipient_id),
					amount = %amount,
					transfer_id = %credit.transfer_id,
					"Tip disbursed"
				);
				slot.insert(credit.clone());
				credit
			},
		};

		Ok(SinkOutcome::Accepted {
			reference: Some(credit.transfer_id),
		})
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LedgerSinkSchema)
	}
}

pub struct LedgerSinkSchema;

impl ConfigSchema for LedgerSinkSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![],
			vec![
				Field::new("transfer_prefix", FieldType::String).with_validator(|v| {
					match v.as_str() {
						Some(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()) => {
							Ok(())
						},
						_ => Err("must be a non-empty alphanumeric string".to_string()),
					}
				}),
				Field::new("max_amount", FieldType::String).with_validator(|v| {
					match v.as_str().map(Decimal::from_str) {
						Some(Ok(d)) if d > Decimal::ZERO => Ok(()),
						_ => Err("must be a positive decimal string, e.g. \"1000.00\"".to_string()),
					}
				}),
			],
		)
		.strict()
		.validate(config)
	}
}

/// Factory function to create a ledger sink from configuration.
///
/// Configuration parameters:
/// - `transfer_prefix`: prefix of returned transfer ids (default: "tr")
/// - `max_amount`: decimal string; larger tips fail permanently (default: no limit)
pub fn create_sink(config: &toml::Value) -> Result<Box<dyn SinkInterface>, SinkError> {
	LedgerSinkSchema
		.validate(config)
		.map_err(|e| SinkError::Configuration(e.to_string()))?;

	let prefix = config
		.get("transfer_prefix")
		.and_then(|v| v.as_str())
		.unwrap_or("tr");
	let max_amount = config
		.get("max_amount")
		.and_then(|v| v.as_str())
		.map(Decimal::from_str)
		.transpose()
		.map_err(|e| SinkError::Configuration(e.to_string()))?;

	Ok(Box::new(LedgerSink::new(prefix, max_amount)))
}

/// Registry for the ledger sink implementation.
pub struct Registry;

impl homechef_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "ledger";
	type Factory = crate::SinkFactory;

	fn factory() -> Self::Factory {
		create_sink
	}
}

impl crate::SinkRegistry for Registry {}
