//! Clock sources for admission timestamps.
//!
//! The engine never reads time itself; callers pass `now` explicitly. The host
//! layer reads a [`Clock`] once per request, which lets tests drive time with
//! a [`ManualClock`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

/// A source of timestamps, expressed as time elapsed since a fixed origin.
pub trait Clock: Send + Sync {
    /// Current time since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall-clock time since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let micros = Utc::now().timestamp_micros();
        Duration::from_micros(micros.max(0) as u64)
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same underlying time value.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    current: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a manual clock starting at `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a manual clock starting at `secs` seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs))
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Set the clock to a specific time.
    pub fn set(&self, to: Duration) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        let clock = SystemClock::new();
        // 2020-01-01T00:00:00Z
        assert!(clock.now() > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::from_secs_f64(10.0);
        assert_eq!(clock.now(), Duration::from_secs(10));

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(11_500));

        clock.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let shared = clock.clone();
        shared.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
    }
}
