//! Configuration module for the HomeChef order engine.
//!
//! This module provides structures and utilities for managing engine
//! configuration. It supports loading configuration from TOML files and
//! validates every section before the engine is built.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

#[cfg(any(test, feature = "testing"))]
pub mod builders {
	pub mod config;
}

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the order engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Engine identity and transition limits.
	pub engine: EngineConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Policy cache and the built-in default policy.
	#[serde(default)]
	pub policy: PolicyConfig,
	/// Countdown scheduler settings.
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	/// Outbox dispatcher settings.
	#[serde(default)]
	pub dispatcher: DispatcherConfig,
	/// Event sinks.
	#[serde(default)]
	pub sinks: SinksConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the engine instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
	/// Identifier of this engine instance, used in logs.
	pub id: String,
	/// Deadline applied to every engine operation.
	#[serde(default = "default_operation_timeout_seconds")]
	pub operation_timeout_seconds: u64,
	/// How many times a transition is retried after losing a version race.
	#[serde(default = "default_max_commit_attempts")]
	pub max_commit_attempts: u32,
	/// Added to the chef's preparation estimate to project delivery time.
	#[serde(default = "default_delivery_slack_minutes")]
	pub delivery_slack_minutes: u32,
	/// Reported to customers alongside a refund.
	#[serde(default = "default_refund_timeline_days")]
	pub refund_timeline_days: u32,
}

fn default_operation_timeout_seconds() -> u64 {
	5
}

fn default_max_commit_attempts() -> u32 {
	3
}

fn default_delivery_slack_minutes() -> u32 {
	30
}

fn default_refund_timeline_days() -> u32 {
	5
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	pub cleanup_interval_seconds: u64,
}

/// Policy cache and the policy written on first use.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
	/// How long a cached active policy is served before re-reading storage.
	#[serde(default = "default_cache_ttl_seconds")]
	pub cache_ttl_seconds: u64,
	#[serde(default = "default_free_window_seconds")]
	pub default_free_window_seconds: u64,
	#[serde(default = "default_penalty_rate")]
	pub default_penalty_rate: Decimal,
	#[serde(default = "default_min_penalty")]
	pub default_min_penalty: Decimal,
	#[serde(default = "default_max_penalty")]
	pub default_max_penalty: Decimal,
}

impl Default for PolicyConfig {
	fn default() -> Self {
		Self {
			cache_ttl_seconds: default_cache_ttl_seconds(),
			default_free_window_seconds: default_free_window_seconds(),
			default_penalty_rate: default_penalty_rate(),
			default_min_penalty: default_min_penalty(),
			default_max_penalty: default_max_penalty(),
		}
	}
}

fn default_cache_ttl_seconds() -> u64 {
	30
}

fn default_free_window_seconds() -> u64 {
	30
}

fn default_penalty_rate() -> Decimal {
	// 0.40
	Decimal::new(40, 2)
}

fn default_min_penalty() -> Decimal {
	Decimal::new(20, 0)
}

fn default_max_penalty() -> Decimal {
	Decimal::new(500, 0)
}

/// Countdown scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
	/// Countdowns expiring within this horizon are loaded into the queue.
	/// The horizon is re-scanned every half lookahead.
	#[serde(default = "default_lookahead_seconds")]
	pub lookahead_seconds: u64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			lookahead_seconds: default_lookahead_seconds(),
		}
	}
}

fn default_lookahead_seconds() -> u64 {
	3600
}

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
	/// Fallback poll for orders whose wake-up was missed.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Maximum events handed to one sink per order per pass.
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_retry_base_seconds")]
	pub retry_base_seconds: u64,
	#[serde(default = "default_retry_max_seconds")]
	pub retry_max_seconds: u64,
	/// Attempts before an event is dead-lettered.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval_ms(),
			batch_size: default_batch_size(),
			retry_base_seconds: default_retry_base_seconds(),
			retry_max_seconds: default_retry_max_seconds(),
			max_attempts: default_max_attempts(),
		}
	}
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_batch_size() -> usize {
	50
}

fn default_retry_base_seconds() -> u64 {
	2
}

fn default_retry_max_seconds() -> u64 {
	300
}

fn default_max_attempts() -> u32 {
	24
}

/// Configured sinks.
///
/// Each key names a sink instance. The instance uses the implementation given
/// by its `implementation` field, or the implementation with the same name as
/// the key when that field is absent. All other fields are passed to the
/// implementation's factory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SinksConfig {
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// A sink instance with its implementation resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkInstance {
	pub name: String,
	pub implementation: String,
	pub settings: toml::Value,
}

impl SinksConfig {
	/// Resolves every instance, in name order.
	pub fn instances(&self) -> Result<Vec<SinkInstance>, ConfigError> {
		let mut out = Vec::with_capacity(self.implementations.len());
		for (name, value) in &self.implementations {
			let mut table = value.as_table().cloned().ok_or_else(|| {
				ConfigError::Validation(format!("Sink '{}' must be a table", name))
			})?;
			let implementation = match table.remove("implementation") {
				Some(toml::Value::String(s)) => s,
				Some(_) => {
					return Err(ConfigError::Validation(format!(
						"Sink '{}': implementation must be a string",
						name
					)))
				},
				None => name.clone(),
			};
			out.push(SinkInstance {
				name: name.clone(),
				implementation,
				settings: toml::Value::Table(table),
			});
		}
		out.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(out)
	}
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024 // 1MB
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
	if condition {
		Ok(())
	} else {
		Err(ConfigError::Validation(message.into()))
	}
}

impl Config {
	/// Loads configuration from a file with async environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates every section.
	pub fn validate(&self) -> Result<(), ConfigError> {
		// Engine
		ensure(!self.engine.id.is_empty(), "Engine ID cannot be empty")?;
		ensure(
			(1..=300).contains(&self.engine.operation_timeout_seconds),
			"engine.operation_timeout_seconds must be between 1 and 300",
		)?;
		ensure(
			(1..=10).contains(&self.engine.max_commit_attempts),
			"engine.max_commit_attempts must be between 1 and 10",
		)?;
		ensure(
			self.engine.delivery_slack_minutes <= 240,
			"engine.delivery_slack_minutes cannot exceed 240",
		)?;

		// Storage
		ensure(
			!self.storage.implementations.is_empty(),
			"At least one storage implementation must be configured",
		)?;
		ensure(
			!self.storage.primary.is_empty(),
			"Storage primary implementation cannot be empty",
		)?;
		ensure(
			self.storage
				.implementations
				.contains_key(&self.storage.primary),
			format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			),
		)?;
		ensure(
			(1..=86400).contains(&self.storage.cleanup_interval_seconds),
			"Storage cleanup_interval_seconds must be between 1 and 86400",
		)?;

		// Policy
		let policy = &self.policy;
		ensure(
			(1..=60).contains(&policy.cache_ttl_seconds),
			"policy.cache_ttl_seconds must be between 1 and 60",
		)?;
		ensure(
			(1..=600).contains(&policy.default_free_window_seconds),
			"policy.default_free_window_seconds must be between 1 and 600",
		)?;
		ensure(
			policy.default_penalty_rate >= Decimal::ZERO && policy.default_penalty_rate <= Decimal::ONE,
			"policy.default_penalty_rate must be between 0 and 1",
		)?;
		ensure(
			policy.default_min_penalty >= Decimal::ZERO
				&& policy.default_min_penalty <= policy.default_max_penalty,
			"policy.default_min_penalty must be non-negative and not above default_max_penalty",
		)?;

		// Scheduler
		ensure(
			(60..=86400).contains(&self.scheduler.lookahead_seconds),
			"scheduler.lookahead_seconds must be between 60 and 86400",
		)?;

		// Dispatcher
		let dispatcher = &self.dispatcher;
		ensure(
			dispatcher.poll_interval_ms > 0,
			"dispatcher.poll_interval_ms must be greater than 0",
		)?;
		ensure(
			dispatcher.batch_size > 0,
			"dispatcher.batch_size must be greater than 0",
		)?;
		ensure(
			dispatcher.retry_base_seconds > 0
				&& dispatcher.retry_base_seconds <= dispatcher.retry_max_seconds,
			"dispatcher.retry_base_seconds must be positive and not above retry_max_seconds",
		)?;
		ensure(
			dispatcher.max_attempts > 0,
			"dispatcher.max_attempts must be at least 1",
		)?;

		// Sinks
		self.sinks.instances()?;

		Ok(())
	}
}

/// Implementation of FromStr trait for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
