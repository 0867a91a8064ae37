//! Administrative command surface.
//!
//! Commands arrive as `/rl <subcommand> [args]` text, are parsed into an
//! [`AdminCommand`], applied to the engine, and persisted to the store.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, instrument};

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{validate_count, AdmissionEngine, LimitConfig};
use crate::store::ConfigStore;

/// Prefix of every administrative command.
pub const COMMAND_PREFIX: &str = "/rl";

/// Errors produced while parsing a command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("not an admin command")]
    NotAdminCommand,
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),
    #[error("usage: /rl {0}")]
    Usage(&'static str),
    #[error("expected an integer, got {0:?}")]
    InvalidNumber(String),
    #[error("expected on or off, got {0:?}")]
    InvalidSwitch(String),
}

/// A parsed administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Status,
    WhitelistAdd(String),
    WhitelistDel(String),
    WhitelistList,
    SetRate(i64),
    SetWindow(i64),
    GroupSet { group: String, count: i64 },
    GroupDel(String),
    GroupList,
    UserSet { user: String, count: i64 },
    UserDel(String),
    UserList,
    GroupTotalSet { group: String, count: i64 },
    GroupTotalDel(String),
    GroupTotalList,
    GroupTotalDefault(i64),
    ToggleUser(bool),
    ToggleGroupTotal(bool),
}

impl AdminCommand {
    /// Parse a `/rl ...` line.
    pub fn parse(line: &str) -> std::result::Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        if words.next() != Some(COMMAND_PREFIX) {
            return Err(CommandError::NotAdminCommand);
        }

        let Some(sub) = words.next() else {
            return Ok(AdminCommand::Help);
        };
        let args: Vec<&str> = words.collect();

        let command = match sub {
            "help" => AdminCommand::Help,
            "status" => AdminCommand::Status,
            "wl_add" => AdminCommand::WhitelistAdd(one_id(&args, "wl_add <user_id>")?),
            "wl_del" => AdminCommand::WhitelistDel(one_id(&args, "wl_del <user_id>")?),
            "wl_list" => AdminCommand::WhitelistList,
            "set_rate" => AdminCommand::SetRate(one_number(&args, "set_rate <count>")?),
            "set_window" => AdminCommand::SetWindow(one_number(&args, "set_window <seconds>")?),
            "group_set" => {
                let (group, count) = id_and_number(&args, "group_set <group_id> <count>")?;
                AdminCommand::GroupSet { group, count }
            }
            "group_del" => AdminCommand::GroupDel(one_id(&args, "group_del <group_id>")?),
            "group_list" => AdminCommand::GroupList,
            "user_set" => {
                let (user, count) = id_and_number(&args, "user_set <user_id> <count>")?;
                AdminCommand::UserSet { user, count }
            }
            "user_del" => AdminCommand::UserDel(one_id(&args, "user_del <user_id>")?),
            "user_list" => AdminCommand::UserList,
            "group_total_set" => {
                let (group, count) = id_and_number(&args, "group_total_set <group_id> <count>")?;
                AdminCommand::GroupTotalSet { group, count }
            }
            "group_total_del" => {
                AdminCommand::GroupTotalDel(one_id(&args, "group_total_del <group_id>")?)
            }
            "group_total_list" => AdminCommand::GroupTotalList,
            "group_total_default" => {
                AdminCommand::GroupTotalDefault(one_number(&args, "group_total_default <count>")?)
            }
            "toggle_user" => AdminCommand::ToggleUser(one_switch(&args, "toggle_user <on|off>")?),
            "toggle_group_total" => {
                AdminCommand::ToggleGroupTotal(one_switch(&args, "toggle_group_total <on|off>")?)
            }
            other => return Err(CommandError::UnknownSubcommand(other.to_string())),
        };

        Ok(command)
    }

    /// Whether the command changes the configuration.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            AdminCommand::Help
                | AdminCommand::Status
                | AdminCommand::WhitelistList
                | AdminCommand::GroupList
                | AdminCommand::UserList
                | AdminCommand::GroupTotalList
        )
    }
}

fn one_id(args: &[&str], usage: &'static str) -> std::result::Result<String, CommandError> {
    match args {
        [id] => Ok(id.to_string()),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn one_number(args: &[&str], usage: &'static str) -> std::result::Result<i64, CommandError> {
    match args {
        [n] => parse_number(n),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn id_and_number(
    args: &[&str],
    usage: &'static str,
) -> std::result::Result<(String, i64), CommandError> {
    match args {
        [id, n] => Ok((id.to_string(), parse_number(n)?)),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn one_switch(args: &[&str], usage: &'static str) -> std::result::Result<bool, CommandError> {
    match args {
        [s] => match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            _ => Err(CommandError::InvalidSwitch(s.to_string())),
        },
        _ => Err(CommandError::Usage(usage)),
    }
}

fn parse_number(s: &str) -> std::result::Result<i64, CommandError> {
    s.parse().map_err(|_| CommandError::InvalidNumber(s.to_string()))
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

const HELP: &str = "\
LLM rate limit commands:
  /rl status
  /rl wl_add <user_id> | wl_del <user_id> | wl_list
  /rl set_rate <count> | set_window <seconds>
  /rl group_set <group_id> <count> | group_del <group_id> | group_list
  /rl user_set <user_id> <count> | user_del <user_id> | user_list
  /rl group_total_set <group_id> <count> | group_total_del <group_id> | group_total_list
  /rl group_total_default <count>
  /rl toggle_user <on|off> | toggle_group_total <on|off>";

/// Applies administrative commands to an engine and its store.
pub struct AdminHandler {
    engine: Arc<AdmissionEngine>,
    store: Arc<dyn ConfigStore>,
    /// Serializes mutate-then-persist so saves land in mutation order
    write_lock: Mutex<()>,
}

impl AdminHandler {
    /// Create a handler over an engine and the store its limits persist to.
    pub fn new(engine: Arc<AdmissionEngine>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            engine,
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Reload the engine's configuration from the store.
    ///
    /// Waits for any in-flight mutation to finish persisting first.
    pub fn reload(&self) {
        let _guard = self.write_lock.lock();
        self.reload_locked();
    }

    /// Caller must hold `write_lock`.
    fn reload_locked(&self) {
        self.engine.replace_config(LimitConfig::load(self.store.as_ref()));
    }

    /// Apply a command and return the reply text.
    ///
    /// Invalid values are reported in the reply; only persistence failures
    /// are returned as errors.
    #[instrument(skip(self))]
    pub fn handle(&self, command: AdminCommand) -> Result<String> {
        let _guard = self.write_lock.lock();
        if !command.is_mutation() {
            self.reload_locked();
            return Ok(self.render_listing(&command));
        }

        match self.apply(&command) {
            Ok(Some(reply)) => {
                self.engine.config().persist(self.store.as_ref())?;
                info!(command = ?command, "Applied admin command");
                Ok(reply)
            }
            Ok(None) => Ok(self.unchanged_reply(&command)),
            Err(ThrottleError::InvalidLimit { field, min, .. }) => {
                Ok(format!("❌ {} must be >= {}.", describe_field(field), min))
            }
            Err(e) => Err(e),
        }
    }

    /// Parse and apply a command line.
    pub fn handle_line(&self, line: &str) -> Result<String> {
        match AdminCommand::parse(line) {
            Ok(command) => self.handle(command),
            Err(e) => Ok(format!("❌ {}", e)),
        }
    }

    /// Apply a mutation. `Ok(None)` means nothing changed.
    fn apply(&self, command: &AdminCommand) -> Result<Option<String>> {
        let engine = &self.engine;
        let window = engine.config().window_secs();

        let reply = match command {
            AdminCommand::WhitelistAdd(user) => engine
                .add_to_bypass(user)
                .then(|| format!("✅ Added user {} to the whitelist.", user)),
            AdminCommand::WhitelistDel(user) => engine
                .remove_from_bypass(user)
                .then(|| format!("✅ Removed user {} from the whitelist.", user)),
            AdminCommand::SetRate(count) => {
                let count = validate_count("max_requests", *count, 1)?;
                engine.set_default_limit(count)?;
                Some(format!(
                    "✅ Global limit set to {} requests / {} seconds.",
                    count, window
                ))
            }
            AdminCommand::SetWindow(secs) => {
                let secs = validate_count("time_window_seconds", *secs, 1)?;
                engine.set_time_window(u64::from(secs))?;
                Some(format!(
                    "✅ Time window set to {} seconds (all counters reset).",
                    secs
                ))
            }
            AdminCommand::GroupSet { group, count } => {
                let count = validate_count("group_limits", *count, 1)?;
                engine.set_group_user_limit(group, count)?;
                Some(format!(
                    "✅ Group {} limit set to {} requests / {} seconds per user.",
                    group, count, window
                ))
            }
            AdminCommand::GroupDel(group) => engine.clear_group_user_limit(group).then(|| {
                format!(
                    "✅ Removed the custom limit of group {}, back to the global default ({} requests).",
                    group,
                    engine.config().default_user_limit
                )
            }),
            AdminCommand::UserSet { user, count } => {
                let count = validate_count("user_limits", *count, 1)?;
                engine.set_actor_limit(user, count)?;
                Some(format!(
                    "✅ User {} limit set to {} requests / {} seconds.",
                    user, count, window
                ))
            }
            AdminCommand::UserDel(user) => engine
                .clear_actor_limit(user)
                .then(|| format!("✅ Removed the custom limit of user {}.", user)),
            AdminCommand::GroupTotalSet { group, count } => {
                let count = validate_count("group_total_limits", *count, 1)?;
                engine.set_group_total_limit(group, count)?;
                Some(format!(
                    "✅ Group {} total limit set to {} requests / {} seconds.",
                    group, count, window
                ))
            }
            AdminCommand::GroupTotalDel(group) => engine
                .clear_group_total_limit(group)
                .then(|| format!("✅ Removed the total limit of group {}.", group)),
            AdminCommand::GroupTotalDefault(count) => {
                let count = validate_count("default_group_total_limit", *count, 0)?;
                engine.set_default_group_total_limit(count);
                Some(if count == 0 {
                    "✅ Default group total limit disabled.".to_string()
                } else {
                    format!(
                        "✅ Default group total limit set to {} requests / {} seconds.",
                        count, window
                    )
                })
            }
            AdminCommand::ToggleUser(enabled) => {
                engine.set_user_limit_enabled(*enabled);
                Some(format!("✅ Per-user limits turned {}.", on_off(*enabled)))
            }
            AdminCommand::ToggleGroupTotal(enabled) => {
                engine.set_group_total_enabled(*enabled);
                Some(format!("✅ Group total limits turned {}.", on_off(*enabled)))
            }
            AdminCommand::Help
            | AdminCommand::Status
            | AdminCommand::WhitelistList
            | AdminCommand::GroupList
            | AdminCommand::UserList
            | AdminCommand::GroupTotalList => None,
        };

        Ok(reply)
    }

    fn unchanged_reply(&self, command: &AdminCommand) -> String {
        match command {
            AdminCommand::WhitelistAdd(user) => format!("ℹ️ User {} is already whitelisted.", user),
            AdminCommand::WhitelistDel(user) => format!("ℹ️ User {} is not whitelisted.", user),
            AdminCommand::GroupDel(group) => format!("ℹ️ Group {} has no custom limit.", group),
            AdminCommand::UserDel(user) => format!("ℹ️ User {} has no custom limit.", user),
            AdminCommand::GroupTotalDel(group) => {
                format!("ℹ️ Group {} has no total limit.", group)
            }
            _ => "ℹ️ Nothing changed.".to_string(),
        }
    }

    fn render_listing(&self, command: &AdminCommand) -> String {
        let config = self.engine.config();
        let window = config.window_secs();
        let mut out = String::new();

        match command {
            AdminCommand::Status => {
                let stats = self.engine.stats();
                let group_total_default = match config.default_group_total_limit {
                    0 => "off".to_string(),
                    n => n.to_string(),
                };
                let _ = writeln!(out, "📊 LLM rate limit status");
                let _ = writeln!(
                    out,
                    "├ Global default: {} requests / {} seconds",
                    config.default_user_limit, window
                );
                let _ = writeln!(out, "├ Group limits: {}", config.group_user_limits.len());
                let _ = writeln!(out, "├ User limits: {}", config.actor_limits.len());
                let _ = writeln!(
                    out,
                    "├ Group total limits: {} (default: {})",
                    config.group_total_limits.len(),
                    group_total_default
                );
                let _ = writeln!(out, "├ Whitelisted users: {}", config.bypass.len());
                let _ = writeln!(
                    out,
                    "├ Per-user limits: {}, group total limits: {}",
                    on_off(config.user_limit_enabled),
                    on_off(config.group_total_enabled)
                );
                let _ = write!(
                    out,
                    "└ Active users: {}, active groups: {}",
                    stats.active_users, stats.active_groups
                );
                for (title, limits) in [
                    ("📁 Group limits:", &config.group_user_limits),
                    ("👤 User limits:", &config.actor_limits),
                    ("👥 Group total limits:", &config.group_total_limits),
                ] {
                    if !limits.is_empty() {
                        let _ = write!(out, "\n  {}", title);
                        for (id, limit) in limits {
                            let _ = write!(out, "\n    · {}: {} requests", id, limit);
                        }
                    }
                }
            }
            AdminCommand::WhitelistList => {
                if config.bypass.is_empty() {
                    out.push_str("📋 The whitelist is empty.");
                } else {
                    out.push_str("📋 Whitelisted users:");
                    for (i, user) in config.bypass.iter().enumerate() {
                        let _ = write!(out, "\n  {}. {}", i + 1, user);
                    }
                }
            }
            AdminCommand::GroupList => {
                if config.group_user_limits.is_empty() {
                    out.push_str("📁 No group limits, every group uses the global default.");
                } else {
                    let _ = write!(
                        out,
                        "📁 Group limits (default: {} requests):",
                        config.default_user_limit
                    );
                    for (group, limit) in &config.group_user_limits {
                        let _ = write!(out, "\n  · {}: {} requests / {} seconds", group, limit, window);
                    }
                }
            }
            AdminCommand::UserList => {
                if config.actor_limits.is_empty() {
                    out.push_str("👤 No user limits.");
                } else {
                    out.push_str("👤 User limits (highest priority):");
                    for (user, limit) in &config.actor_limits {
                        let _ = write!(out, "\n  · {}: {} requests / {} seconds", user, limit, window);
                    }
                }
            }
            AdminCommand::GroupTotalList => {
                if config.group_total_limits.is_empty() && config.default_group_total_limit == 0 {
                    out.push_str("👥 No group total limits.");
                } else {
                    let _ = write!(
                        out,
                        "👥 Group total limits (default: {}):",
                        config.default_group_total_limit
                    );
                    for (group, limit) in &config.group_total_limits {
                        let _ = write!(out, "\n  · {}: {} requests / {} seconds", group, limit, window);
                    }
                }
            }
            _ => out.push_str(HELP),
        }

        out
    }
}

fn describe_field(field: &str) -> &'static str {
    match field {
        "time_window_seconds" => "The time window",
        "default_group_total_limit" => "The default group total limit",
        _ => "The request count",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    fn handler() -> (AdminHandler, Arc<AdmissionEngine>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(AdmissionEngine::new(LimitConfig::load(store.as_ref())));
        let handler = AdminHandler::new(Arc::clone(&engine), store.clone());
        (handler, engine, store)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(AdminCommand::parse("/rl"), Ok(AdminCommand::Help));
        assert_eq!(AdminCommand::parse("/rl status"), Ok(AdminCommand::Status));
        assert_eq!(
            AdminCommand::parse("/rl  user_set  u1  3 "),
            Ok(AdminCommand::UserSet {
                user: "u1".to_string(),
                count: 3
            })
        );
        assert_eq!(
            AdminCommand::parse("/rl group_total_set g1 -2"),
            Ok(AdminCommand::GroupTotalSet {
                group: "g1".to_string(),
                count: -2
            })
        );
        assert_eq!(
            AdminCommand::parse("/rl toggle_user OFF"),
            Ok(AdminCommand::ToggleUser(false))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(AdminCommand::parse("hello"), Err(CommandError::NotAdminCommand));
        assert_eq!(
            AdminCommand::parse("/rl nope"),
            Err(CommandError::UnknownSubcommand("nope".to_string()))
        );
        assert_eq!(
            AdminCommand::parse("/rl user_set u1"),
            Err(CommandError::Usage("user_set <user_id> <count>"))
        );
        assert_eq!(
            AdminCommand::parse("/rl set_rate many"),
            Err(CommandError::InvalidNumber("many".to_string()))
        );
        assert_eq!(
            AdminCommand::parse("/rl toggle_group_total maybe"),
            Err(CommandError::InvalidSwitch("maybe".to_string()))
        );
    }

    #[test]
    fn test_mutation_persists_to_store() {
        let (handler, engine, store) = handler();

        let reply = handler.handle_line("/rl user_set u1 2").unwrap();
        assert!(reply.starts_with("✅"));
        assert_eq!(engine.resolve_user_cap("u1", None), 2);
        assert_eq!(store.get("user_limits"), Some(json!(["u1:2"])));

        handler.handle_line("/rl group_total_set g1 5").unwrap();
        handler.handle_line("/rl wl_add vip").unwrap();
        assert_eq!(store.get("group_total_limits"), Some(json!(["g1:5"])));
        assert_eq!(store.get("whitelist"), Some(json!(["vip"])));
    }

    #[test]
    fn test_invalid_count_is_rejected_without_change() {
        let (handler, engine, store) = handler();

        let reply = handler.handle_line("/rl set_rate 0").unwrap();
        assert_eq!(reply, "❌ The request count must be >= 1.");
        let reply = handler.handle_line("/rl set_window -5").unwrap();
        assert_eq!(reply, "❌ The time window must be >= 1.");

        assert_eq!(engine.config(), LimitConfig::default());
        assert!(store.get("max_requests").is_none());
    }

    #[test]
    fn test_unchanged_replies() {
        let (handler, _, _) = handler();

        handler.handle_line("/rl wl_add vip").unwrap();
        assert_eq!(
            handler.handle_line("/rl wl_add vip").unwrap(),
            "ℹ️ User vip is already whitelisted."
        );
        assert_eq!(
            handler.handle_line("/rl user_del ghost").unwrap(),
            "ℹ️ User ghost has no custom limit."
        );
        assert_eq!(
            handler.handle_line("/rl group_total_del g9").unwrap(),
            "ℹ️ Group g9 has no total limit."
        );
    }

    #[test]
    fn test_set_window_resets_counters() {
        let (handler, engine, _) = handler();
        engine.admit("u", None, Duration::from_secs(1));
        assert_eq!(engine.stats().active_users, 1);

        handler.handle(AdminCommand::SetWindow(10)).unwrap();
        assert_eq!(engine.stats().active_users, 0);
        assert_eq!(engine.config().window_secs(), 10);
    }

    #[test]
    fn test_listings_reload_from_store() {
        let (handler, engine, store) = handler();
        store.set("group_limits", json!(["gA:7", "bad"]));

        let reply = handler.handle(AdminCommand::GroupList).unwrap();
        assert!(reply.contains("gA: 7 requests / 60 seconds"));
        assert_eq!(engine.resolve_user_cap("x", Some("gA")), 7);
    }

    #[test]
    fn test_reload_picks_up_store_edits() {
        let (handler, engine, store) = handler();
        store.set("max_requests", json!(9));
        store.set("whitelist", json!(["vip"]));

        handler.reload();
        assert_eq!(engine.resolve_user_cap("anyone", None), 9);
        assert!(engine.admit("vip", None, Duration::from_secs(1)).allowed);
        assert!(engine.config().bypass.contains("vip"));
    }

    #[test]
    fn test_status_report() {
        let (handler, engine, _) = handler();
        handler.handle_line("/rl user_set u1 2").unwrap();
        handler.handle_line("/rl group_total_default 4").unwrap();
        engine.admit("u1", None, Duration::from_secs(1));

        let status = handler.handle(AdminCommand::Status).unwrap();
        assert!(status.contains("Global default: 6 requests / 60 seconds"));
        assert!(status.contains("Group total limits: 0 (default: 4)"));
        assert!(status.contains("Active users: 1"));
        assert!(status.contains("u1: 2 requests"));
    }

    #[test]
    fn test_toggles_and_help() {
        let (handler, engine, store) = handler();

        handler.handle_line("/rl toggle_group_total off").unwrap();
        assert!(!engine.config().group_total_enabled);
        assert_eq!(store.get("group_total_enabled"), Some(json!(false)));

        let help = handler.handle_line("/rl help").unwrap();
        assert!(help.contains("group_total_set"));
    }

    /// Store that parks the first write until released.
    struct PausingStore {
        inner: MemoryStore,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl ConfigStore for PausingStore {
        fn get(&self, key: &str) -> Option<serde_json::Value> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: serde_json::Value) {
            if let Some(entered) = self.entered.lock().take() {
                entered.send(()).unwrap();
                if let Some(release) = self.release.lock().take() {
                    let _ = release.recv_timeout(Duration::from_secs(5));
                }
            }
            self.inner.set(key, value);
        }

        fn save(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_listing_waits_for_in_flight_mutation() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(PausingStore {
            inner: MemoryStore::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let engine = Arc::new(AdmissionEngine::new(LimitConfig::load(store.as_ref())));
        let handler = AdminHandler::new(Arc::clone(&engine), store);

        std::thread::scope(|scope| {
            let mutation = scope.spawn(|| handler.handle_line("/rl user_set u1 2").unwrap());
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            let listing = scope.spawn(|| handler.handle(AdminCommand::UserList).unwrap());
            std::thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();

            assert!(mutation.join().unwrap().starts_with("✅"));
            assert!(listing.join().unwrap().contains("u1: 2 requests"));
        });

        assert_eq!(engine.resolve_user_cap("u1", None), 2);
    }
}
