//! Builder pattern for constructing order engines.
//!
//! Composes an [`OrderEngine`] from configuration and factory functions for
//! storage backends and sinks. Sinks and the clock can also be injected
//! directly, which is how tests observe deliveries and control time.

use crate::clock::{Clock, SystemClock};
use crate::engine::OrderEngine;
use homechef_config::Config;
use homechef_sink::{NamedSink, SinkError, SinkInterface, SinkService};
use homechef_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions keyed by implementation name.
pub struct EngineFactories<SF, KF> {
	pub storage_factories: HashMap<String, SF>,
	pub sink_factories: HashMap<String, KF>,
}

/// Builder for constructing an OrderEngine with pluggable implementations.
pub struct EngineBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
	extra_sinks: Vec<NamedSink>,
}

impl EngineBuilder {
	/// Starts a builder on the system clock with no extra sinks.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
			extra_sinks: Vec::new(),
		}
	}

	/// Replaces the wall clock.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	/// Adds a sink that is not described in configuration.
	pub fn with_sink(mut self, name: impl Into<String>, sink: Arc<dyn SinkInterface>) -> Self {
		self.extra_sinks.push(NamedSink {
			name: name.into(),
			sink,
		});
		self
	}

	/// Builds the engine using factories for each component type.
	pub fn build<SF, KF>(self, factories: EngineFactories<SF, KF>) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		KF: Fn(&toml::Value) -> Result<Box<dyn SinkInterface>, SinkError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			if let Some(factory) = factories.storage_factories.get(name) {
				match factory(config) {
					Ok(implementation) => {
						storage_impls.insert(name.clone(), implementation);
						let is_primary = &self.config.storage.primary == name;
						tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					},
					Err(e) => {
						tracing::error!(
							component = "storage",
							implementation = %name,
							error = %e,
							"Failed to create storage implementation"
						);
						return Err(BuilderError::Config(format!(
							"Failed to create storage implementation '{}': {}",
							name, e
						)));
					},
				}
			}
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let instances = self
			.config
			.sinks
			.instances()
			.map_err(|e| BuilderError::Config(e.to_string()))?;
		let mut sinks = Vec::with_capacity(instances.len() + self.extra_sinks.len());
		for instance in instances {
			let factory = factories
				.sink_factories
				.get(&instance.implementation)
				.ok_or_else(|| {
					BuilderError::MissingComponent(format!(
						"sink implementation '{}' (instance '{}')",
						instance.implementation, instance.name
					))
				})?;
			match factory(&instance.settings) {
				Ok(sink) => {
					tracing::info!(
						component = "sink",
						implementation = %instance.implementation,
						name = %instance.name,
						role = %sink.role(),
						"Loaded"
					);
					sinks.push(NamedSink {
						name: instance.name,
						sink: Arc::from(sink),
					});
				},
				Err(e) => {
					tracing::error!(
						component = "sink",
						name = %instance.name,
						error = %e,
						"Failed to create sink"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create sink '{}': {}",
						instance.name, e
					)));
				},
			}
		}

		for extra in self.extra_sinks {
			if sinks.iter().any(|s| s.name == extra.name) {
				return Err(BuilderError::Config(format!(
					"Sink '{}' is defined twice",
					extra.name
				)));
			}
			tracing::info!(component = "sink", name = %extra.name, role = %extra.sink.role(), "Loaded");
			sinks.push(extra);
		}

		let sinks = SinkService::new(sinks);
		if sinks.is_empty() {
			tracing::warn!("No sinks configured - order events will not be delivered anywhere");
		}
		if !sinks.has_tip_disbursement() {
			tracing::warn!("No tip disbursement sink configured - tips will stay in processing");
		}

		Ok(OrderEngine::new(self.config, storage, sinks, self.clock))
	}
}
