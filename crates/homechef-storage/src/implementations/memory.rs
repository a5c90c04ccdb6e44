//! In-memory storage backend.
//!
//! Useful for tests and single-process development where persistence across
//! restarts is not required. Revisions and TTLs behave exactly as in the
//! file backend.

use crate::{StorageError, StorageInterface, Versioned};
use async_trait::async_trait;
use homechef_types::{ConfigSchema, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
	revision: u64,
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| now >= at)
	}
}

fn expiry(ttl: Option<Duration>) -> Option<Instant> {
	ttl.filter(|t| !t.is_zero()).map(|t| Instant::now() + t)
}

/// In-memory storage implementation.
pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	fn live_revision(store: &HashMap<String, Entry>, key: &str) -> u64 {
		store
			.get(key)
			.filter(|e| !e.is_expired(Instant::now()))
			.map(|e| e.revision)
			.unwrap_or(0)
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.filter(|e| !e.is_expired(Instant::now()))
			.map(|e| Versioned {
				revision: e.revision,
				value: e.value.clone(),
			})
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		let revision = Self::live_revision(&store, key) + 1;
		store.insert(
			key.to_string(),
			Entry {
				revision,
				value,
				expires_at: expiry(ttl),
			},
		);
		Ok(revision)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected_revision: u64,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		let actual = Self::live_revision(&store, key);
		if actual != expected_revision {
			return Err(StorageError::RevisionMismatch {
				expected: expected_revision,
				actual,
			});
		}
		let revision = actual + 1;
		store.insert(
			key.to_string(),
			Entry {
				revision,
				value,
				expires_at: expiry(ttl),
			},
		);
		Ok(revision)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(Self::live_revision(&store, key) > 0)
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		let now = Instant::now();
		Ok(store
			.iter()
			.filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
			.map(|(k, _)| k.clone())
			.collect())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut store = self.store.write().await;
		let now = Instant::now();
		let before = store.len();
		store.retain(|_, e| !e.is_expired(now));
		Ok(before - store.len())
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No settings; anything else is a typo.
		Schema::new(vec![], vec![]).strict().validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl homechef_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "orders:1";
		let rev = storage.set_bytes(key, b"v1".to_vec(), None).await.unwrap();
		assert_eq!(rev, 1);

		let stored = storage.get_bytes(key).await.unwrap();
		assert_eq!(stored.value, b"v1".to_vec());
		assert_eq!(stored.revision, 1);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_delete_resets_revision() {
		let storage = MemoryStorage::new();
		storage.set_bytes("k:1", b"a".to_vec(), None).await.unwrap();
		storage.set_bytes("k:1", b"b".to_vec(), None).await.unwrap();
		storage.delete("k:1").await.unwrap();
		let rev = storage
			.compare_and_swap("k:1", 0, b"c".to_vec(), None)
			.await
			.unwrap();
		assert_eq!(rev, 1);
	}

	#[tokio::test]
	async fn test_ttl_expiry_and_cleanup() {
		let storage = MemoryStorage::new();
		storage
			.set_bytes("k:short", b"x".to_vec(), Some(Duration::from_millis(10)))
			.await
			.unwrap();
		storage.set_bytes("k:long", b"y".to_vec(), None).await.unwrap();

		tokio::time::sleep(Duration::from_millis(30)).await;

		assert!(!storage.exists("k:short").await.unwrap());
		assert_eq!(storage.list_keys("k:").await.unwrap(), vec!["k:long".to_string()]);
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
	}

	#[test]
	fn test_schema_rejects_settings() {
		let config: toml::Value = toml::from_str("storage_path = \"/tmp\"").unwrap();
		assert!(create_storage(&config).is_err());
		let empty = toml::Value::Table(toml::map::Map::new());
		assert!(create_storage(&empty).is_ok());
	}
}
