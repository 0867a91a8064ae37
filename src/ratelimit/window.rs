//! Sliding window counter implementation.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Result of checking a key against its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    /// Whether another event fits in the window
    pub allowed: bool,
    /// Time until the oldest counted event leaves the window, rounded to a
    /// tenth of a second. Zero when allowed.
    pub cooldown: Duration,
}

impl WindowCheck {
    fn allow() -> Self {
        Self {
            allowed: true,
            cooldown: Duration::ZERO,
        }
    }

    fn deny(cooldown: Duration) -> Self {
        Self {
            allowed: false,
            cooldown,
        }
    }
}

/// Per-key event history over a trailing time window.
///
/// Each key owns an oldest-first sequence of event timestamps. Checking and
/// recording are separate steps: a check never mutates the history beyond
/// dropping expired events, so a caller can run several checks and record
/// only once every one of them has passed.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    /// Event timestamps per key, oldest first
    events: HashMap<String, VecDeque<Duration>>,
}

impl SlidingWindowCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired events for `key` and report whether another event fits.
    ///
    /// An event at `t` is expired once `t <= now - window`. The key is denied
    /// when the number of remaining events is at least `capacity`; an empty
    /// history is never denied.
    pub fn prune_and_check(
        &mut self,
        key: &str,
        capacity: u32,
        window: Duration,
        now: Duration,
    ) -> WindowCheck {
        let remaining = self.prune(key, window, now);
        if remaining == 0 || remaining < capacity as usize {
            return WindowCheck::allow();
        }

        let oldest = self
            .events
            .get(key)
            .and_then(|events| events.front().copied())
            .unwrap_or(now);

        // oldest - (now - window), written to stay unsigned.
        let cooldown = (oldest + window).saturating_sub(now);
        WindowCheck::deny(round_to_tenth(cooldown))
    }

    /// Append an event at `now` for `key`.
    ///
    /// Only call this after a passing check, once per admitted event.
    pub fn record(&mut self, key: &str, now: Duration) {
        let events = self.events.entry(key.to_string()).or_default();
        match events.back() {
            // Keep the sequence ordered if the caller's clock stepped backwards.
            Some(&last) if now < last => {
                let at = events.partition_point(|&t| t <= now);
                events.insert(at, now);
            }
            _ => events.push_back(now),
        }
    }

    /// Drop expired events for `key` and return how many remain.
    ///
    /// Keys whose history becomes empty are removed entirely.
    pub fn prune(&mut self, key: &str, window: Duration, now: Duration) -> usize {
        let Some(events) = self.events.get_mut(key) else {
            return 0;
        };

        if let Some(cutoff) = now.checked_sub(window) {
            while events.front().is_some_and(|&t| t <= cutoff) {
                events.pop_front();
            }
        }

        let remaining = events.len();
        if remaining == 0 {
            self.events.remove(key);
        }
        remaining
    }

    /// Number of recorded events for `key`, as of its last prune.
    pub fn count(&self, key: &str) -> usize {
        self.events.get(key).map_or(0, VecDeque::len)
    }

    /// Discard the history of a single key. Returns whether any existed.
    pub fn forget(&mut self, key: &str) -> bool {
        self.events.remove(key).is_some()
    }

    /// Discard every key's history.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of keys with at least one recorded event.
    pub fn active_keys(&self) -> usize {
        self.events.values().filter(|events| !events.is_empty()).count()
    }
}

/// Round a duration to the nearest tenth of a second, halves rounding up.
pub fn round_to_tenth(duration: Duration) -> Duration {
    const TENTH_NANOS: u128 = 100_000_000;
    let tenths = (duration.as_nanos() + TENTH_NANOS / 2) / TENTH_NANOS;
    Duration::from_millis(tenths as u64 * 100)
}
