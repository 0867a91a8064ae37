//! Core admission engine.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::backend::AdmissionBackend;
use super::decision::{Decision, Reason};
use super::rules::{validate_count, LimitConfig};
use super::window::SlidingWindowCounter;
use crate::error::Result;

/// Snapshot of counter occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Actors with at least one event still recorded
    pub active_users: usize,
    /// Groups with at least one aggregate event still recorded
    pub active_groups: usize,
}

/// Everything one admission decision reads or writes.
#[derive(Debug, Default)]
struct EngineState {
    config: LimitConfig,
    users: SlidingWindowCounter,
    groups: SlidingWindowCounter,
}

impl EngineState {
    fn admit(&mut self, actor: &str, group: Option<&str>, now: Duration) -> Decision {
        let EngineState {
            config,
            users,
            groups,
        } = self;
        let resolver = config.resolver();
        let window = config.time_window;

        if resolver.is_bypassed(actor) {
            trace!(actor = %actor, "Actor is bypassed");
            return Decision::bypassed(window);
        }

        if config.user_limit_enabled {
            let cap = resolver.user_cap(actor, group);
            let check = users.prune_and_check(actor, cap, window, now);
            trace!(actor = %actor, cap = cap, allowed = check.allowed, "Checked user window");

            if !check.allowed {
                debug!(
                    actor = %actor,
                    group = ?group,
                    cap = cap,
                    cooldown_secs = check.cooldown.as_secs_f64(),
                    "User limit exceeded"
                );
                return Decision::denied(Reason::UserLimit, check.cooldown, cap, window);
            }
        }

        let group_cap = match group {
            Some(group) if config.group_total_enabled => {
                let cap = resolver.group_total_cap(group);
                (cap > 0).then_some((group, cap))
            }
            _ => None,
        };

        if let Some((group, cap)) = group_cap {
            let check = groups.prune_and_check(group, cap, window, now);
            trace!(group = %group, cap = cap, allowed = check.allowed, "Checked group window");

            if !check.allowed {
                debug!(
                    actor = %actor,
                    group = %group,
                    cap = cap,
                    cooldown_secs = check.cooldown.as_secs_f64(),
                    "Group total limit exceeded"
                );
                return Decision::denied(Reason::GroupTotal, check.cooldown, cap, window);
            }
        }

        // Both stages passed; only now does the request consume slots.
        if config.user_limit_enabled {
            users.record(actor, now);
        }
        if let Some((group, _)) = group_cap {
            groups.record(group, now);
        }

        Decision::admitted(window)
    }
}

/// The admission engine.
///
/// Owns the limit configuration and both counter collections behind a single
/// lock, so resolving caps, checking both windows and recording happen as one
/// critical section. Administrative mutations take the same lock.
#[derive(Debug, Default)]
pub struct AdmissionEngine {
    state: Mutex<EngineState>,
}

impl AdmissionEngine {
    /// Create an engine with the given configuration and empty counters.
    pub fn new(config: LimitConfig) -> Self {
        Self {
            state: Mutex::new(EngineState {
                config,
                ..EngineState::default()
            }),
        }
    }

    /// Decide whether `actor` (optionally inside `group`) may proceed at `now`.
    ///
    /// An empty group identifier is treated as no group.
    pub fn admit(&self, actor: &str, group: Option<&str>, now: Duration) -> Decision {
        let group = group.filter(|g| !g.is_empty());
        self.state.lock().admit(actor, group, now)
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> LimitConfig {
        self.state.lock().config.clone()
    }

    /// Replace the whole configuration, e.g. after reloading from the store.
    ///
    /// Counters survive unless the window length changed.
    pub fn replace_config(&self, config: LimitConfig) {
        let mut state = self.state.lock();
        if state.config.time_window != config.time_window {
            debug!(
                old_secs = state.config.window_secs(),
                new_secs = config.window_secs(),
                "Window changed on reload, clearing all counters"
            );
            state.users.clear();
            state.groups.clear();
        }
        state.config = config;
    }

    /// Effective per-actor cap under the current configuration.
    pub fn resolve_user_cap(&self, actor: &str, group: Option<&str>) -> u32 {
        self.state.lock().config.resolver().user_cap(actor, group)
    }

    /// Effective aggregate cap for a group; zero means none.
    pub fn resolve_group_total_cap(&self, group: &str) -> u32 {
        self.state.lock().config.resolver().group_total_cap(group)
    }

    /// Number of in-window events counted against `actor` at `now`.
    pub fn user_usage(&self, actor: &str, now: Duration) -> usize {
        let mut state = self.state.lock();
        let window = state.config.time_window;
        state.users.prune(actor, window, now)
    }

    /// Number of in-window events counted against `group`'s aggregate at `now`.
    pub fn group_usage(&self, group: &str, now: Duration) -> usize {
        let mut state = self.state.lock();
        let window = state.config.time_window;
        state.groups.prune(group, window, now)
    }

    /// Counter occupancy as of each key's last prune.
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            active_users: state.users.active_keys(),
            active_groups: state.groups.active_keys(),
        }
    }

    /// Discard every counter.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.users.clear();
        state.groups.clear();
    }

    /// Set a per-actor cap. Discards the actor's history.
    pub fn set_actor_limit(&self, actor: &str, count: u32) -> Result<()> {
        let count = validate_count("user_limits", i64::from(count), 1)?;
        let mut state = self.state.lock();
        state.config.actor_limits.insert(actor.to_string(), count);
        state.users.forget(actor);
        info!(actor = %actor, limit = count, "Set actor limit");
        Ok(())
    }

    /// Remove a per-actor cap. Returns whether one existed.
    pub fn clear_actor_limit(&self, actor: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.config.actor_limits.remove(actor).is_some();
        if existed {
            state.users.forget(actor);
            info!(actor = %actor, "Cleared actor limit");
        }
        existed
    }

    /// Set the per-actor cap applied inside a group.
    pub fn set_group_user_limit(&self, group: &str, count: u32) -> Result<()> {
        let count = validate_count("group_limits", i64::from(count), 1)?;
        let mut state = self.state.lock();
        state.config.group_user_limits.insert(group.to_string(), count);
        info!(group = %group, limit = count, "Set group user limit");
        Ok(())
    }

    /// Remove a group's per-actor cap. Returns whether one existed.
    pub fn clear_group_user_limit(&self, group: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.config.group_user_limits.remove(group).is_some();
        if existed {
            info!(group = %group, "Cleared group user limit");
        }
        existed
    }

    /// Set a group's aggregate cap.
    pub fn set_group_total_limit(&self, group: &str, count: u32) -> Result<()> {
        let count = validate_count("group_total_limits", i64::from(count), 1)?;
        let mut state = self.state.lock();
        state.config.group_total_limits.insert(group.to_string(), count);
        info!(group = %group, limit = count, "Set group total limit");
        Ok(())
    }

    /// Remove a group's aggregate cap. Discards the group's aggregate history.
    pub fn clear_group_total_limit(&self, group: &str) -> bool {
        let mut state = self.state.lock();
        let existed = state.config.group_total_limits.remove(group).is_some();
        if existed {
            state.groups.forget(group);
            info!(group = %group, "Cleared group total limit");
        }
        existed
    }

    /// Set the global per-actor cap.
    pub fn set_default_limit(&self, count: u32) -> Result<()> {
        let count = validate_count("max_requests", i64::from(count), 1)?;
        self.state.lock().config.default_user_limit = count;
        info!(limit = count, "Set default user limit");
        Ok(())
    }

    /// Set the aggregate cap for groups without an override. Zero disables it.
    pub fn set_default_group_total_limit(&self, count: u32) {
        self.state.lock().config.default_group_total_limit = count;
        info!(limit = count, "Set default group total limit");
    }

    /// Set the window length. Discards every counter.
    pub fn set_time_window(&self, secs: u64) -> Result<()> {
        let value = i64::try_from(secs).unwrap_or(i64::MAX);
        let secs = validate_count("time_window_seconds", value, 1)?;
        let mut state = self.state.lock();
        state.config.time_window = Duration::from_secs(u64::from(secs));
        state.users.clear();
        state.groups.clear();
        info!(window_secs = secs, "Set time window, all counters reset");
        Ok(())
    }

    /// Exempt an actor from all checks. Returns false if already exempt.
    pub fn add_to_bypass(&self, actor: &str) -> bool {
        let mut state = self.state.lock();
        let added = state.config.bypass.insert(actor.to_string());
        if added {
            state.users.forget(actor);
            info!(actor = %actor, "Added actor to bypass list");
        }
        added
    }

    /// Remove an actor's exemption. Returns false if it was not exempt.
    pub fn remove_from_bypass(&self, actor: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.config.bypass.remove(actor);
        if removed {
            state.users.forget(actor);
            info!(actor = %actor, "Removed actor from bypass list");
        }
        removed
    }

    /// Turn the per-actor stage on or off.
    pub fn set_user_limit_enabled(&self, enabled: bool) {
        self.state.lock().config.user_limit_enabled = enabled;
        info!(enabled = enabled, "Toggled user limit stage");
    }

    /// Turn the group aggregate stage on or off.
    pub fn set_group_total_enabled(&self, enabled: bool) {
        self.state.lock().config.group_total_enabled = enabled;
        info!(enabled = enabled, "Toggled group total stage");
    }
}

impl AdmissionBackend for AdmissionEngine {
    fn admit(&self, actor: &str, group: Option<&str>, now: Duration) -> Decision {
        AdmissionEngine::admit(self, actor, group, now)
    }
}
