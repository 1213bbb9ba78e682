//! Time abstraction so timers can be driven deterministically in tests.

use std::time::Duration;
use tokio::time::Instant;

/// A source of monotonic time for timers (heartbeat, SYNC, inhibit, event, SDO timeout).
///
/// Backed by `tokio::time::Instant` in production, which respects `tokio::time::pause()`
/// and `tokio::time::advance()` under `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl Clock {
	/// Get the current instant.
	pub fn now(&self) -> Instant {
		Instant::now()
	}

	/// Sleep until `instant`.
	pub async fn sleep_until(&self, instant: Instant) {
		tokio::time::sleep_until(instant).await
	}

	/// Sleep for `duration`.
	pub async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await
	}
}

/// A deadline that re-arms itself; used by heartbeat/SYNC/event timers.
///
/// `None` means the timer is disabled (a period of zero in CANopen means "no timeout").
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
	period: Option<Duration>,
	expires_at: Option<Instant>,
}

impl Deadline {
	/// Create a disabled deadline.
	pub fn disabled() -> Self {
		Self { period: None, expires_at: None }
	}

	/// Create a deadline with the given period, armed starting now.
	pub fn with_period(period: Duration, clock: &Clock) -> Self {
		if period.is_zero() {
			Self::disabled()
		} else {
			Self {
				period: Some(period),
				expires_at: Some(clock.now() + period),
			}
		}
	}

	/// Re-arm the deadline relative to now.
	pub fn reset(&mut self, clock: &Clock) {
		if let Some(period) = self.period {
			self.expires_at = Some(clock.now() + period);
		}
	}

	/// Change the period, disabling the deadline if `period` is zero.
	pub fn set_period(&mut self, period: Duration, clock: &Clock) {
		if period.is_zero() {
			self.period = None;
			self.expires_at = None;
		} else {
			self.period = Some(period);
			self.expires_at = Some(clock.now() + period);
		}
	}

	/// Check whether the deadline has expired, without re-arming it.
	pub fn has_expired(&self, clock: &Clock) -> bool {
		match self.expires_at {
			Some(expires_at) => clock.now() >= expires_at,
			None => false,
		}
	}

	/// Get the instant this deadline expires at, if armed.
	pub fn expires_at(&self) -> Option<Instant> {
		self.expires_at
	}

	/// Returns `true` if the deadline is armed (period is non-zero).
	pub fn is_armed(&self) -> bool {
		self.period.is_some()
	}
}
