use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[cfg(test)]
use mockall::automock;

/// Monotonic and wall-clock time sources for timestamps and timeouts.
/// A plain trait rather than a direct `std::time` dependency so tests
/// can control time deterministically.
#[cfg_attr(test, automock)]
pub trait Clock: Send + Sync {
	/// Nanoseconds since the Unix epoch, used to stamp new entries.
	fn now_wall_nanos(&self) -> i64;

	/// A monotonic instant, used for timeout accounting.
	fn now_monotonic(&self) -> Instant;
}

/// Default [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_wall_nanos(&self) -> i64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_nanos() as i64)
			.unwrap_or(0)
	}

	fn now_monotonic(&self) -> Instant {
		Instant::now()
	}
}
