//! File-based storage backend.
//!
//! One file per key under `storage_path`. Each file starts with a fixed
//! 64-byte header carrying the revision and an optional expiry, followed by
//! the JSON payload. Writes go to a temp file that is renamed into place, so
//! readers never observe a torn value. Writers inside the process are
//! serialized by a mutex; an exclusive lock on `<storage_path>/.lock` keeps a
//! second process from opening the same directory.

use crate::{StorageError, StorageInterface, Versioned};
use async_trait::async_trait;
use fs2::FileExt;
use homechef_types::{ConfigSchema, Field, FieldType, Schema, StorageKey, ValidationError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "HCKV"
/// - [4-5]: Format version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-21]: Revision (u64, little-endian)
/// - [22-63]: Reserved
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
	version: u16,
	expires_at: u64,
	revision: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"HCKV";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(revision: u64, ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			unix_now().saturating_add(ttl.as_secs().max(1))
		};
		Self {
			version: Self::VERSION,
			expires_at,
			revision,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes[14..22].copy_from_slice(&self.revision.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Bad magic bytes".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires = [0u8; 8];
		expires.copy_from_slice(&bytes[6..14]);
		let mut revision = [0u8; 8];
		revision.copy_from_slice(&bytes[14..22]);

		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires),
			revision: u64::from_le_bytes(revision),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Reversible mapping from keys to file names.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len() + 8);
	for c in key.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			':' => out.push_str("%3A"),
			'\\' => out.push_str("%5C"),
			_ => out.push(c),
		}
	}
	out
}

fn decode_key(name: &str) -> String {
	name.replace("%3A", ":")
		.replace("%2F", "/")
		.replace("%5C", "\\")
		.replace("%25", "%")
}

/// TTL configuration per storage namespace.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();
		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(secs) = table.get(&config_key).and_then(|v| v.as_integer()) {
					ttls.insert(storage_key, Duration::from_secs(secs.max(0) as u64));
				}
			}
		}
		Self { ttls }
	}

	fn ttl_for_key(&self, key: &str) -> Duration {
		key.split(':')
			.next()
			.and_then(|ns| ns.parse::<StorageKey>().ok())
			.and_then(|sk| self.ttls.get(&sk).copied())
			.unwrap_or(Duration::ZERO)
	}
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	write_lock: Mutex<()>,
	/// Held for the lifetime of the backend.
	_dir_lock: std::fs::File,
}

impl FileStorage {
	/// Opens (creating if needed) a storage directory and takes its lock.
	pub fn open(base_path: impl Into<PathBuf>, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		let base_path = base_path.into();
		std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Backend(e.to_string()))?;

		let lock_file = std::fs::OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(base_path.join(".lock"))
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		lock_file.try_lock_exclusive().map_err(|e| {
			StorageError::Configuration(format!(
				"Storage directory {} is in use by another process: {}",
				base_path.display(),
				e
			))
		})?;

		Ok(Self {
			base_path,
			ttl_config,
			write_lock: Mutex::new(()),
			_dir_lock: lock_file,
		})
	}

	fn file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	/// Reads header and payload; `None` if missing or expired.
	async fn read_entry(&self, path: &Path) -> Result<Option<(FileHeader, Vec<u8>)>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Ok(None);
		}
		Ok(Some((header, data[FileHeader::SIZE..].to_vec())))
	}

	async fn current_revision(&self, path: &Path) -> Result<u64, StorageError> {
		Ok(self
			.read_entry(path)
			.await?
			.map(|(h, _)| h.revision)
			.unwrap_or(0))
	}

	/// Writes a new revision; callers hold `write_lock`.
	async fn write_entry(
		&self,
		key: &str,
		path: &Path,
		revision: u64,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let ttl = ttl.unwrap_or_else(|| self.ttl_config.ttl_for_key(key));
		let header = FileHeader::new(revision, ttl);

		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header.serialize());
		file_data.extend_from_slice(&value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn bin_files(&self) -> Result<Vec<PathBuf>, StorageError> {
		let mut files = Vec::new();
		let mut entries = fs::read_dir(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() == Some(std::ffi::OsStr::new("bin")) {
				files.push(path);
			}
		}
		Ok(files)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Versioned<Vec<u8>>, StorageError> {
		match self.read_entry(&self.file_path(key)).await? {
			Some((header, value)) => Ok(Versioned {
				revision: header.revision,
				value,
			}),
			None => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError> {
		let path = self.file_path(key);
		let _guard = self.write_lock.lock().await;
		let revision = self.current_revision(&path).await? + 1;
		self.write_entry(key, &path, revision, value, ttl).await?;
		Ok(revision)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected_revision: u64,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<u64, StorageError> {
		let path = self.file_path(key);
		let _guard = self.write_lock.lock().await;
		let actual = self.current_revision(&path).await?;
		if actual != expected_revision {
			return Err(StorageError::RevisionMismatch {
				expected: expected_revision,
				actual,
			});
		}
		let revision = actual + 1;
		self.write_entry(key, &path, revision, value, ttl).await?;
		Ok(revision)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.file_path(key);
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_entry(&self.file_path(key)).await?.is_some())
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		for path in self.bin_files().await? {
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			let key = decode_key(stem);
			if !key.starts_with(prefix) {
				continue;
			}
			match self.read_entry(&path).await {
				Ok(Some(_)) => keys.push(key),
				Ok(None) => {},
				Err(e) => tracing::debug!("Skipping unreadable file {:?}: {}", path, e),
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let _guard = self.write_lock.lock().await;
		let mut removed = 0;
		for path in self.bin_files().await? {
			let data = match fs::read(&path).await {
				Ok(data) => data,
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					continue;
				},
			};
			let expired = FileHeader::deserialize(&data)
				.map(|h| h.is_expired())
				.unwrap_or(false);
			if expired {
				match fs::remove_file(&path).await {
					Ok(_) => removed += 1,
					Err(e) => tracing::warn!("Failed to remove expired file {:?}: {}", path, e),
				}
			}
		}
		Ok(removed)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}
		Schema::new(vec![], optional_fields).strict().validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory (default: "./data/storage")
/// - `ttl_<namespace>`: TTL in seconds for a namespace, e.g. `ttl_dead_letters` (default: 0 = keep)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(
		storage_path,
		TtlConfig::from_config(config),
	)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl homechef_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
