//! Storage module for the HomeChef order engine.
//!
//! This module provides abstractions for persistent storage of engine data,
//! supporting different backend implementations such as in-memory and
//! file-based storage. Every stored value carries a revision so callers can
//! perform optimistic compare-and-swap updates without holding locks.

use async_trait::async_trait;
use homechef_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// The stored revision differs from the one the caller read.
	#[error("Revision mismatch: expected {expected}, found {actual}")]
	RevisionMismatch { expected: u64, actual: u64 },
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A stored value together with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
	/// Starts at 1 on creation and increases by one on every write.
	pub revision: u64,
	pub value: T,
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `namespace:id`. Revisions are per key: a missing key
/// has revision 0, creation yields revision 1 and every subsequent write
/// increments it.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes and the current revision for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError>;

	/// Stores raw bytes unconditionally with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError>;

	/// Stores raw bytes only if the current revision equals `expected_revision`.
	///
	/// Pass 0 to require that the key does not exist. Returns the new revision,
	/// or `RevisionMismatch` if another writer got there first.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected_revision: u64,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists live keys starting with `prefix`, in no particular order.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn key_for(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed operations.
///
/// Wraps a backend and serializes values as JSON under `namespace:id` keys.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a value unconditionally, overwriting any previous revision.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Stores a value unconditionally with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError> {
		self.backend
			.set_bytes(&key_for(namespace, id), encode(data)?, ttl)
			.await
	}

	/// Stores a value only if nothing is stored under the key yet.
	///
	/// Returns `RevisionMismatch` when the key is taken.
	pub async fn insert_new<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		self.backend
			.compare_and_swap(&key_for(namespace, id), 0, encode(data)?, None)
			.await
	}

	/// Retrieves and deserializes a value.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		Ok(self.retrieve_versioned(namespace, id).await?.value)
	}

	/// Retrieves a value together with its revision.
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let stored = self.backend.get_bytes(&key_for(namespace, id)).await?;
		Ok(Versioned {
			revision: stored.revision,
			value: decode(&stored.value)?,
		})
	}

	/// Replaces a value if its revision is still `expected_revision`.
	pub async fn update_versioned<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected_revision: u64,
		data: &T,
	) -> Result<u64, StorageError> {
		self.backend
			.compare_and_swap(&key_for(namespace, id), expected_revision, encode(data)?, None)
			.await
	}

	/// Retrieves every value in a namespace as (id, value) pairs.
	///
	/// Entries removed between listing and reading are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.list_keys(&prefix).await?;
		let mut out = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(stored) => {
					let id = key[prefix.len()..].to_string();
					out.push((id, decode(&stored.value)?));
				},
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(out)
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_for(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_for(namespace, id)).await
	}

	/// Removes expired entries; a no-op for backends without TTL support.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
