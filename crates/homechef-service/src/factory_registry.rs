//! Registry of storage and sink factories.
//!
//! Every implementation crate self-registers through
//! `get_all_implementations()`; configuration then picks implementations by
//! name. Unknown names fail the build with the list of what is available.

use homechef_config::Config;
use homechef_core::{EngineBuilder, EngineFactories, OrderEngine};
use homechef_sink::SinkFactory;
use homechef_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global registry for all implementation factories
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
	pub sink: HashMap<String, SinkFactory>,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
			sink: HashMap::new(),
		}
	}

	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}

	pub fn register_sink(&mut self, name: impl Into<String>, factory: SinkFactory) {
		self.sink.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the registry, populating it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in homechef_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		for (name, factory) in homechef_sink::get_all_implementations() {
			tracing::debug!("Registering sink implementation: {}", name);
			registry.register_sink(name, factory);
		}

		registry
	})
}

fn unknown(kind: &str, name: &str, available: &HashMap<String, impl Sized>) -> String {
	let mut names: Vec<_> = available.keys().cloned().collect();
	names.sort();
	format!(
		"Unknown {} implementation '{}'. Available: [{}]",
		kind,
		name,
		names.join(", ")
	)
}

/// Builds the engine from configuration using the registered factories.
pub fn build_engine_from_config(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let mut storage_factories = HashMap::new();
	for name in config.storage.implementations.keys() {
		let factory = registry
			.storage
			.get(name)
			.ok_or_else(|| unknown("storage", name, &registry.storage))?;
		storage_factories.insert(name.clone(), *factory);
	}

	let mut sink_factories = HashMap::new();
	for instance in config.sinks.instances()? {
		let factory = registry
			.sink
			.get(&instance.implementation)
			.ok_or_else(|| unknown("sink", &instance.implementation, &registry.sink))?;
		sink_factories.insert(instance.implementation, *factory);
	}

	let factories = EngineFactories {
		storage_factories,
		sink_factories,
	};
	Ok(EngineBuilder::new(config).build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use homechef_config::builders::config::ConfigBuilder;

	#[test]
	fn test_registry_lists_builtin_implementations() {
		let registry = get_registry();
		assert!(registry.storage.contains_key("memory"));
		assert!(registry.storage.contains_key("file"));
		for sink in ["log", "ledger", "webhook"] {
			assert!(registry.sink.contains_key(sink), "{}", sink);
		}
	}

	#[test]
	fn test_unknown_sink_names_alternatives() {
		let config = ConfigBuilder::new()
			.sink("pager", toml::from_str("implementation = \"pager\"").unwrap())
			.build();
		let err = build_engine_from_config(config).err().unwrap().to_string();
		assert!(err.contains("Unknown sink implementation 'pager'"), "{}", err);
		assert!(err.contains("ledger, log, webhook"), "{}", err);
	}

	#[test]
	fn test_builds_default_config() {
		let config = ConfigBuilder::new()
			.engine_id("registry-test")
			.sink("log", toml::from_str("implementation = \"log\"").unwrap())
			.build();
		let engine = build_engine_from_config(config).unwrap();
		assert_eq!(engine.config().engine.id, "registry-test");
	}
}
