//! Limit configuration and cap resolution.
//!
//! Caps are layered: a per-actor override beats a per-group override, which
//! beats the global default. Group aggregate caps are resolved separately and
//! may be zero, meaning the group has no aggregate cap.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Default per-actor cap.
pub const DEFAULT_MAX_REQUESTS: u32 = 6;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// The complete limit configuration of one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    /// Cap applied to every actor without a more specific override
    pub default_user_limit: u32,
    /// Length of the sliding window shared by all counters
    pub time_window: Duration,
    /// Actors exempt from every check
    pub bypass: BTreeSet<String>,
    /// Per-actor cap applied to every actor inside a group
    pub group_user_limits: BTreeMap<String, u32>,
    /// Per-actor cap overrides, highest priority
    pub actor_limits: BTreeMap<String, u32>,
    /// Aggregate cap for groups without an override; 0 disables it
    pub default_group_total_limit: u32,
    /// Aggregate cap overrides per group
    pub group_total_limits: BTreeMap<String, u32>,
    /// Whether the per-actor stage runs at all
    pub user_limit_enabled: bool,
    /// Whether the group aggregate stage runs at all
    pub group_total_enabled: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default_user_limit: DEFAULT_MAX_REQUESTS,
            time_window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            bypass: BTreeSet::new(),
            group_user_limits: BTreeMap::new(),
            actor_limits: BTreeMap::new(),
            default_group_total_limit: 0,
            group_total_limits: BTreeMap::new(),
            user_limit_enabled: true,
            group_total_enabled: true,
        }
    }
}

impl LimitConfig {
    /// Create a configuration with the given default cap and window.
    pub fn new(default_user_limit: u32, time_window: Duration) -> Self {
        Self {
            default_user_limit,
            time_window,
            ..Self::default()
        }
    }

    /// Add a per-actor override.
    pub fn with_actor_limit(mut self, actor: &str, limit: u32) -> Self {
        self.actor_limits.insert(actor.to_string(), limit);
        self
    }

    /// Add a per-group per-actor override.
    pub fn with_group_user_limit(mut self, group: &str, limit: u32) -> Self {
        self.group_user_limits.insert(group.to_string(), limit);
        self
    }

    /// Add a group aggregate cap.
    pub fn with_group_total_limit(mut self, group: &str, limit: u32) -> Self {
        self.group_total_limits.insert(group.to_string(), limit);
        self
    }

    /// Set the default group aggregate cap.
    pub fn with_default_group_total_limit(mut self, limit: u32) -> Self {
        self.default_group_total_limit = limit;
        self
    }

    /// Add an actor to the bypass set.
    pub fn with_bypass(mut self, actor: &str) -> Self {
        self.bypass.insert(actor.to_string());
        self
    }

    /// Window length in whole seconds.
    pub fn window_secs(&self) -> u64 {
        self.time_window.as_secs()
    }

    /// Borrow a resolver over this configuration.
    pub fn resolver(&self) -> LimitResolver<'_> {
        LimitResolver::new(self)
    }
}

/// Resolves effective caps from a [`LimitConfig`] snapshot.
///
/// Resolution is a pure lookup; it never touches any counter.
#[derive(Debug, Clone, Copy)]
pub struct LimitResolver<'a> {
    config: &'a LimitConfig,
}

impl<'a> LimitResolver<'a> {
    /// Create a resolver over a configuration.
    pub fn new(config: &'a LimitConfig) -> Self {
        Self { config }
    }

    /// Whether `actor` is exempt from all checks.
    pub fn is_bypassed(&self, actor: &str) -> bool {
        self.config.bypass.contains(actor)
    }

    /// Resolve the per-actor cap.
    ///
    /// Exactly one tier wins: the actor's own override, else the group's
    /// per-actor override, else the global default.
    pub fn user_cap(&self, actor: &str, group: Option<&str>) -> u32 {
        if let Some(&limit) = self.config.actor_limits.get(actor) {
            return limit;
        }
        if let Some(&limit) = group.and_then(|g| self.config.group_user_limits.get(g)) {
            return limit;
        }
        self.config.default_user_limit
    }

    /// Resolve the aggregate cap for a group. Zero means no aggregate cap.
    pub fn group_total_cap(&self, group: &str) -> u32 {
        self.config
            .group_total_limits
            .get(group)
            .copied()
            .unwrap_or(self.config.default_group_total_limit)
    }
}

/// Check that a limit value is at least `min` and convert it to a count.
pub fn validate_count(field: &'static str, value: i64, min: i64) -> Result<u32> {
    if value < min {
        return Err(ThrottleError::InvalidLimit { field, value, min });
    }
    u32::try_from(value).map_err(|_| ThrottleError::InvalidLimit { field, value, min })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LimitConfig::default();
        assert_eq!(config.default_user_limit, 6);
        assert_eq!(config.window_secs(), 60);
        assert_eq!(config.default_group_total_limit, 0);
        assert!(config.user_limit_enabled);
        assert!(config.group_total_enabled);
    }

    #[test]
    fn test_user_cap_falls_back_to_default() {
        let config = LimitConfig::new(6, Duration::from_secs(60)).with_group_user_limit("gA", 7);
        let resolver = config.resolver();

        assert_eq!(resolver.user_cap("rand", None), 6);
        assert_eq!(resolver.user_cap("rand", Some("gB")), 6);
    }

    #[test]
    fn test_full_priority_chain() {
        let config = LimitConfig::new(6, Duration::from_secs(60))
            .with_group_user_limit("gA", 7)
            .with_actor_limit("uX", 4);
        let resolver = config.resolver();

        assert_eq!(resolver.user_cap("rand", None), 6);
        assert_eq!(resolver.user_cap("rand", Some("gA")), 7);
        assert_eq!(resolver.user_cap("uX", Some("gA")), 4);
        assert_eq!(resolver.user_cap("uX", None), 4);
    }

    #[test]
    fn test_actor_cap_ignores_group_changes() {
        let mut config = LimitConfig::default().with_actor_limit("sp", 4);
        assert_eq!(config.resolver().user_cap("sp", Some("gX")), 4);

        config.group_user_limits.insert("gX".to_string(), 1);
        config.default_user_limit = 100;
        assert_eq!(config.resolver().user_cap("sp", Some("gX")), 4);
    }

    #[test]
    fn test_group_total_cap() {
        let config = LimitConfig::default().with_group_total_limit("g1", 5);
        let resolver = config.resolver();

        assert_eq!(resolver.group_total_cap("g1"), 5);
        assert_eq!(resolver.group_total_cap("g2"), 0);

        let config = config.with_default_group_total_limit(20);
        assert_eq!(config.resolver().group_total_cap("g2"), 20);
        assert_eq!(config.resolver().group_total_cap("g1"), 5);
    }

    #[test]
    fn test_bypass_lookup() {
        let config = LimitConfig::default().with_bypass("vip");
        assert!(config.resolver().is_bypassed("vip"));
        assert!(!config.resolver().is_bypassed("normal"));
    }

    #[test]
    fn test_validate_count() {
        assert_eq!(validate_count("max_requests", 3, 1).unwrap(), 3);
        assert_eq!(validate_count("default_group_total_limit", 0, 0).unwrap(), 0);

        let err = validate_count("max_requests", 0, 1).unwrap_err();
        assert!(matches!(
            err,
            ThrottleError::InvalidLimit { field: "max_requests", value: 0, min: 1 }
        ));
        assert!(validate_count("max_requests", i64::from(u32::MAX) + 1, 1).is_err());
    }
}
