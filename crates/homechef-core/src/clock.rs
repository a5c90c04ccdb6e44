//! Time source for the engine.
//!
//! Every timestamp the engine writes and every deadline it checks comes from a
//! [`Clock`], so tests can drive countdowns and backoff with a
//! [`ManualClock`] instead of sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current instant.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(start),
		}
	}

	/// Moves the clock forward by `seconds`.
	pub fn advance_secs(&self, seconds: i64) {
		self.advance(Duration::seconds(seconds));
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
		*now += by;
	}

	pub fn set(&self, to: DateTime<Utc>) {
		*self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().unwrap_or_else(|e| e.into_inner())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_manual_clock_moves_only_when_told() {
		let start = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		assert_eq!(clock.now(), start);
		clock.advance_secs(45);
		assert_eq!(clock.now(), start + Duration::seconds(45));
	}
}
