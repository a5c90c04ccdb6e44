//! Configuration builder for tests and local development.
//!
//! Produces a valid [`Config`] backed by in-memory storage with no sinks, so
//! tests only spell out the fields they care about.

use crate::{
	ApiConfig, Config, DispatcherConfig, EngineConfig, PolicyConfig, SchedulerConfig, SinksConfig,
	StorageConfig,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	engine_id: String,
	operation_timeout_seconds: u64,
	max_commit_attempts: u32,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	storage_cleanup_interval_seconds: u64,
	policy: PolicyConfig,
	scheduler: SchedulerConfig,
	dispatcher: DispatcherConfig,
	sinks: HashMap<String, toml::Value>,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	/// Creates a new `ConfigBuilder` with default values suitable for testing.
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);
		Self {
			engine_id: "test-engine".to_string(),
			operation_timeout_seconds: 5,
			max_commit_attempts: 3,
			storage_primary: "memory".to_string(),
			storage_implementations,
			storage_cleanup_interval_seconds: 60,
			policy: PolicyConfig::default(),
			scheduler: SchedulerConfig::default(),
			dispatcher: DispatcherConfig::default(),
			sinks: HashMap::new(),
			api: None,
		}
	}

	pub fn engine_id(mut self, id: impl Into<String>) -> Self {
		self.engine_id = id.into();
		self
	}

	pub fn operation_timeout_seconds(mut self, seconds: u64) -> Self {
		self.operation_timeout_seconds = seconds;
		self
	}

	pub fn max_commit_attempts(mut self, attempts: u32) -> Self {
		self.max_commit_attempts = attempts;
		self
	}

	/// Uses the file backend rooted at `path` as primary storage.
	pub fn file_storage(mut self, path: impl Into<String>) -> Self {
		let mut table = toml::map::Map::new();
		table.insert("storage_path".into(), toml::Value::String(path.into()));
		self.storage_implementations
			.insert("file".into(), toml::Value::Table(table));
		self.storage_primary = "file".into();
		self
	}

	/// Sets the built-in policy written on first use.
	pub fn default_policy(
		mut self,
		free_window_seconds: u64,
		penalty_rate: Decimal,
		min_penalty: Decimal,
		max_penalty: Decimal,
	) -> Self {
		self.policy.default_free_window_seconds = free_window_seconds;
		self.policy.default_penalty_rate = penalty_rate;
		self.policy.default_min_penalty = min_penalty;
		self.policy.default_max_penalty = max_penalty;
		self
	}

	pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
		self.dispatcher = dispatcher;
		self
	}

	/// Adds a sink instance with the given settings table.
	pub fn sink(mut self, name: impl Into<String>, settings: toml::Value) -> Self {
		self.sinks.insert(name.into(), settings);
		self
	}

	/// Sets the API configuration.
	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	/// Builds the `Config` with the configured values.
	pub fn build(self) -> Config {
		Config {
			engine: EngineConfig {
				id: self.engine_id,
				operation_timeout_seconds: self.operation_timeout_seconds,
				max_commit_attempts: self.max_commit_attempts,
				delivery_slack_minutes: 30,
				refund_timeline_days: 5,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: self.storage_cleanup_interval_seconds,
			},
			policy: self.policy,
			scheduler: self.scheduler,
			dispatcher: self.dispatcher,
			sinks: SinksConfig {
				implementations: self.sinks,
			},
			api: self.api,
		}
	}
}
