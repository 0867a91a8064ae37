//! Admission decisions.

use std::fmt;
use std::time::Duration;

/// Why a request was admitted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The actor is in the bypass set
    Whitelist,
    /// The actor's own window is full
    UserLimit,
    /// The group's aggregate window is full
    GroupTotal,
    /// Every applicable check passed
    Ok,
}

impl Reason {
    /// Stable lowercase name, as used in logs and console output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Whitelist => "whitelist",
            Reason::UserLimit => "user_limit",
            Reason::GroupTotal => "group_total",
            Reason::Ok => "ok",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Time until a slot frees up, rounded to a tenth of a second
    pub cooldown: Duration,
    /// Which stage produced the outcome
    pub reason: Reason,
    /// The cap that denied the request, if any
    pub limit: Option<u32>,
    /// Window length in force when the decision was made
    pub window: Duration,
}

impl Decision {
    pub(crate) fn bypassed(window: Duration) -> Self {
        Self {
            allowed: true,
            cooldown: Duration::ZERO,
            reason: Reason::Whitelist,
            limit: None,
            window,
        }
    }

    pub(crate) fn admitted(window: Duration) -> Self {
        Self {
            allowed: true,
            cooldown: Duration::ZERO,
            reason: Reason::Ok,
            limit: None,
            window,
        }
    }

    pub(crate) fn denied(reason: Reason, cooldown: Duration, limit: u32, window: Duration) -> Self {
        Self {
            allowed: false,
            cooldown,
            reason,
            limit: Some(limit),
            window,
        }
    }

    /// Cooldown in seconds with one decimal place.
    pub fn cooldown_secs(&self) -> f64 {
        (self.cooldown.as_secs_f64() * 10.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_names() {
        assert_eq!(Reason::Whitelist.to_string(), "whitelist");
        assert_eq!(Reason::UserLimit.to_string(), "user_limit");
        assert_eq!(Reason::GroupTotal.to_string(), "group_total");
        assert_eq!(Reason::Ok.to_string(), "ok");
    }

    #[test]
    fn test_cooldown_secs() {
        let window = Duration::from_secs(60);
        let decision = Decision::denied(Reason::UserLimit, Duration::from_millis(20_000), 3, window);
        assert_eq!(decision.cooldown_secs(), 20.0);
        assert_eq!(decision.limit, Some(3));
        assert_eq!(decision.window, window);

        let decision = Decision::denied(Reason::GroupTotal, Duration::from_millis(7_700), 2, window);
        assert_eq!(decision.cooldown_secs(), 7.7);

        assert_eq!(Decision::admitted(window).cooldown_secs(), 0.0);
    }
}
