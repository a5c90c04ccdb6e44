//! Cancellation policy store.
//!
//! All policy versions live in one [`PolicyLedger`] document. Appending a new
//! version and deactivating the previous one is a single compare-and-swap on
//! that document, which keeps exactly one row active at all times. Reads go
//! through an in-process snapshot that expires after the configured TTL and is
//! replaced eagerly on every successful update.

use crate::clock::Clock;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use homechef_config::PolicyConfig;
use homechef_storage::{StorageError, StorageService, Versioned};
use homechef_types::utils::money::has_money_scale;
use homechef_types::{CancellationPolicy, PolicyLedger, PolicyPatch, StorageKey};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

/// Storage id of the ledger document.
const LEDGER_ID: &str = "ledger";

/// Longest free window an administrator may configure.
pub const MAX_FREE_WINDOW_SECONDS: u64 = 600;

#[derive(Debug, Error)]
pub enum PolicyError {
	#[error("Invalid policy: {0}")]
	Invalid(String),
	#[error("Policy update conflicted {0} times")]
	Conflict(u32),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for PolicyError {
	fn from(err: StorageError) -> Self {
		PolicyError::Storage(err.to_string())
	}
}

struct CachedPolicy {
	policy: CancellationPolicy,
	loaded_at: DateTime<Utc>,
}

/// Versioned cancellation policies with a short-lived cache of the active one.
pub struct PolicyStore {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
	defaults: PolicyConfig,
	cache: ArcSwapOption<CachedPolicy>,
	ttl: chrono::Duration,
	max_attempts: u32,
}

impl PolicyStore {
	/// Creates a new `PolicyStore`.
	///
	/// # Arguments
	///
	/// * `storage` - Backend holding policy rows
	/// * `clock` - Time source for cache expiry and `created_at`
	/// * `defaults` - Built-in policy written on first use, plus the cache TTL
	/// * `max_attempts` - Compare-and-swap retries before giving up; at least 1
	pub fn new(
		storage: Arc<StorageService>,
		clock: Arc<dyn Clock>,
		defaults: PolicyConfig,
		max_attempts: u32,
	) -> Self {
		let ttl = chrono::Duration::seconds(defaults.cache_ttl_seconds as i64);
		Self {
			storage,
			clock,
			defaults,
			cache: ArcSwapOption::empty(),
			ttl,
			max_attempts: max_attempts.max(1),
		}
	}

	/// Returns the active policy, writing the built-in default on first use.
	pub async fn get_active(&self) -> Result<CancellationPolicy, PolicyError> {
		let now = self.clock.now();
		if let Some(cached) = self.cache.load_full() {
			if now - cached.loaded_at < self.ttl {
				return Ok(cached.policy.clone());
			}
		}

		let ledger = self.load_or_init().await?;
		let active = active_of(&ledger.value)?;
		self.remember(active.clone(), now);
		Ok(active)
	}

	/// Applies `patch` on top of the active policy as a new version.
	///
	/// Orders already placed keep the free window they captured.
	pub async fn update_active(
		&self,
		patch: &PolicyPatch,
		updated_by: &str,
	) -> Result<CancellationPolicy, PolicyError> {
		if patch.is_empty() {
			return Err(PolicyError::Invalid("no fields to update".into()));
		}

		for attempt in 1..=self.max_attempts {
			let ledger = self.load_or_init().await?;
			let current = active_of(&ledger.value)?;
			let now = self.clock.now();

			let next = CancellationPolicy {
				version: ledger.value.latest_version() + 1,
				free_window_seconds: patch
					.free_window_seconds
					.unwrap_or(current.free_window_seconds),
				penalty_rate: patch.penalty_rate.unwrap_or(current.penalty_rate),
				min_penalty: patch.min_penalty.unwrap_or(current.min_penalty),
				max_penalty: patch.max_penalty.unwrap_or(current.max_penalty),
				description: patch
					.description
					.clone()
					.unwrap_or_else(|| current.description.clone()),
				is_active: true,
				updated_by: updated_by.to_string(),
				updated_at: now,
			};
			validate_policy(&next)?;

			let mut updated = ledger.value;
			updated.push_active(next.clone());
			match self
				.storage
				.update_versioned(
					StorageKey::CancellationPolicies.as_str(),
					LEDGER_ID,
					ledger.revision,
					&updated,
				)
				.await
			{
				Ok(_) => {
					self.remember(next.clone(), now);
					tracing::info!(
						version = next.version,
						updated_by = %updated_by,
						free_window_seconds = next.free_window_seconds,
						penalty_rate = %next.penalty_rate,
						"Cancellation policy updated"
					);
					return Ok(next);
				},
				Err(StorageError::RevisionMismatch { .. }) => {
					tracing::debug!(attempt, "Policy ledger changed underneath update, retrying");
					continue;
				},
				Err(e) => return Err(e.into()),
			}
		}
		Err(PolicyError::Conflict(self.max_attempts))
	}

	/// Every policy version, newest first.
	pub async fn history(&self) -> Result<Vec<CancellationPolicy>, PolicyError> {
		let ledger = self.load_or_init().await?;
		Ok(ledger.value.rows.into_iter().rev().collect())
	}

	fn remember(&self, policy: CancellationPolicy, loaded_at: DateTime<Utc>) {
		self.cache
			.store(Some(Arc::new(CachedPolicy { policy, loaded_at })));
	}

	async fn load_or_init(&self) -> Result<Versioned<PolicyLedger>, PolicyError> {
		let namespace = StorageKey::CancellationPolicies.as_str();
		match self.storage.retrieve_versioned(namespace, LEDGER_ID).await {
			Ok(ledger) => return Ok(ledger),
			Err(StorageError::NotFound) => {},
			Err(e) => return Err(e.into()),
		}

		let mut ledger = PolicyLedger::default();
		ledger.push_active(self.default_policy());
		match self.storage.insert_new(namespace, LEDGER_ID, &ledger).await {
			Ok(revision) => {
				tracing::info!("Initialized default cancellation policy");
				Ok(Versioned {
					revision,
					value: ledger,
				})
			},
			// Another caller initialized it first.
			Err(StorageError::RevisionMismatch { .. }) => Ok(self
				.storage
				.retrieve_versioned(namespace, LEDGER_ID)
				.await?),
			Err(e) => Err(e.into()),
		}
	}

	fn default_policy(&self) -> CancellationPolicy {
		CancellationPolicy {
			version: 1,
			free_window_seconds: self.defaults.default_free_window_seconds,
			penalty_rate: self.defaults.default_penalty_rate,
			min_penalty: self.defaults.default_min_penalty,
			max_penalty: self.defaults.default_max_penalty,
			description: "Default cancellation policy".to_string(),
			is_active: true,
			updated_by: "system".to_string(),
			updated_at: self.clock.now(),
		}
	}
}

fn active_of(ledger: &PolicyLedger) -> Result<CancellationPolicy, PolicyError> {
	ledger
		.active()
		.cloned()
		.ok_or_else(|| PolicyError::Storage("policy ledger has no active row".into()))
}

/// Checks the bounds every stored policy must satisfy.
pub fn validate_policy(policy: &CancellationPolicy) -> Result<(), PolicyError> {
	if policy.free_window_seconds == 0 || policy.free_window_seconds > MAX_FREE_WINDOW_SECONDS {
		return Err(PolicyError::Invalid(format!(
			"free_window_seconds must be between 1 and {}",
			MAX_FREE_WINDOW_SECONDS
		)));
	}
	if policy.penalty_rate < Decimal::ZERO || policy.penalty_rate > Decimal::ONE {
		return Err(PolicyError::Invalid(
			"penalty_rate must be between 0 and 1".into(),
		));
	}
	if policy.min_penalty < Decimal::ZERO {
		return Err(PolicyError::Invalid("min_penalty must not be negative".into()));
	}
	if policy.min_penalty > policy.max_penalty {
		return Err(PolicyError::Invalid(
			"min_penalty must not exceed max_penalty".into(),
		));
	}
	if !has_money_scale(policy.min_penalty) || !has_money_scale(policy.max_penalty) {
		return Err(PolicyError::Invalid(
			"penalty bounds carry at most two decimal places".into(),
		));
	}
	if policy.description.len() > 500 {
		return Err(PolicyError::Invalid("description is too long".into()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use chrono::TimeZone;
	use homechef_storage::implementations::memory::MemoryStorage;
	use rust_decimal_macros::dec;

	fn setup() -> (PolicyStore, Arc<ManualClock>, Arc<StorageService>) {
		let clock = Arc::new(ManualClock::new(
			Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
		));
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = PolicyStore::new(storage.clone(), clock.clone(), PolicyConfig::default(), 3);
		(store, clock, storage)
	}

	#[tokio::test]
	async fn test_default_policy_written_on_first_read() {
		let (store, _, storage) = setup();
		let policy = store.get_active().await.unwrap();
		assert_eq!(policy.version, 1);
		assert_eq!(policy.free_window_seconds, 30);
		assert_eq!(policy.penalty_rate, dec!(0.40));
		assert_eq!(policy.min_penalty, dec!(20));
		assert_eq!(policy.max_penalty, dec!(500));
		assert!(storage
			.exists(StorageKey::CancellationPolicies.as_str(), LEDGER_ID)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_update_appends_version_and_keeps_one_active() {
		let (store, _, _) = setup();
		let patch = PolicyPatch {
			free_window_seconds: Some(60),
			min_penalty: Some(dec!(50)),
			..Default::default()
		};
		let updated = store.update_active(&patch, "admin-1").await.unwrap();
		assert_eq!(updated.version, 2);
		assert_eq!(updated.free_window_seconds, 60);
		assert_eq!(updated.penalty_rate, dec!(0.40));
		assert_eq!(updated.updated_by, "admin-1");

		let history = store.history().await.unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[0].version, 2);
		assert!(history[0].is_active);
		assert!(!history[1].is_active);
		assert_eq!(store.get_active().await.unwrap().version, 2);
	}

	#[tokio::test]
	async fn test_invalid_patches_rejected() {
		let (store, _, _) = setup();
		let cases = [
			PolicyPatch::default(),
			PolicyPatch {
				free_window_seconds: Some(0),
				..Default::default()
			},
			PolicyPatch {
				free_window_seconds: Some(601),
				..Default::default()
			},
			PolicyPatch {
				penalty_rate: Some(dec!(1.5)),
				..Default::default()
			},
			PolicyPatch {
				min_penalty: Some(dec!(600)),
				..Default::default()
			},
			PolicyPatch {
				max_penalty: Some(dec!(10.005)),
				..Default::default()
			},
		];
		for patch in cases {
			assert!(matches!(
				store.update_active(&patch, "admin-1").await,
				Err(PolicyError::Invalid(_))
			));
		}
		assert_eq!(store.history().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_cache_expires_after_ttl() {
		let (store, clock, storage) = setup();
		store.get_active().await.unwrap();

		// Another process writes a new version behind this cache.
		let other = PolicyStore::new(storage, clock.clone(), PolicyConfig::default(), 3);
		other
			.update_active(
				&PolicyPatch {
					penalty_rate: Some(dec!(0.5)),
					..Default::default()
				},
				"admin-2",
			)
			.await
			.unwrap();

		assert_eq!(store.get_active().await.unwrap().version, 1);
		clock.advance_secs(31);
		assert_eq!(store.get_active().await.unwrap().version, 2);
	}
}
