//! Persistent key/value storage for the limit configuration.
//!
//! The engine only ever sees a typed [`LimitConfig`]; this module maps it to
//! and from the flat key/value layout the store persists. Limit maps are
//! stored as lists of `"<id>:<count>"` strings, the bypass set as a list of
//! identifiers, and scalars as native JSON values.

mod json_file;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::ratelimit::{LimitConfig, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};

pub use json_file::JsonFileStore;

/// Store keys of the persisted limit configuration.
pub mod keys {
    pub const MAX_REQUESTS: &str = "max_requests";
    pub const TIME_WINDOW_SECONDS: &str = "time_window_seconds";
    pub const WHITELIST: &str = "whitelist";
    pub const GROUP_LIMITS: &str = "group_limits";
    pub const USER_LIMITS: &str = "user_limits";
    pub const DEFAULT_GROUP_TOTAL_LIMIT: &str = "default_group_total_limit";
    pub const GROUP_TOTAL_LIMITS: &str = "group_total_limits";
    pub const USER_LIMIT_ENABLED: &str = "user_limit_enabled";
    pub const GROUP_TOTAL_ENABLED: &str = "group_total_enabled";
}

/// An opaque key/value settings store.
pub trait ConfigStore: Send + Sync {
    /// Read a value, if present.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value in memory. Call [`save`](ConfigStore::save) to persist.
    fn set(&self, key: &str, value: Value);

    /// Persist all values.
    fn save(&self) -> Result<()>;
}

/// In-memory store; `save` is a no-op.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from a JSON object. Non-object values yield an empty store.
    pub fn from_json(value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            values: RwLock::new(values),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    fn save(&self) -> Result<()> {
        Ok(())
    }
}

/// Parse `"<id>:<count>"` entries into a map.
///
/// Entries without a `:`, with an empty id, or with a count that is not an
/// integer >= 1 are skipped. Later duplicates win.
pub fn parse_limit_entries(key: &str, raw: &[Value]) -> BTreeMap<String, u32> {
    let mut limits = BTreeMap::new();

    for item in raw {
        let entry = value_to_string(item);
        let entry = entry.trim();

        let parsed = entry.split_once(':').and_then(|(id, count)| {
            let id = id.trim();
            let count = count.trim().parse::<u32>().ok()?;
            (!id.is_empty() && count >= 1).then(|| (id.to_string(), count))
        });

        match parsed {
            Some((id, count)) => {
                limits.insert(id, count);
            }
            None => warn!(key = %key, entry = %entry, "Skipping malformed limit entry"),
        }
    }

    limits
}

/// Serialize a limit map to `"<id>:<count>"` entries.
pub fn dump_limit_entries(limits: &BTreeMap<String, u32>) -> Vec<String> {
    limits
        .iter()
        .map(|(id, count)| format!("{}:{}", id, count))
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_list(store: &dyn ConfigStore, key: &str) -> Vec<Value> {
    match store.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            warn!(key = %key, value = %other, "Expected a list, ignoring value");
            Vec::new()
        }
    }
}

fn read_count(store: &dyn ConfigStore, key: &str, min: i64, default: u32) -> u32 {
    let Some(value) = store.get(key) else {
        return default;
    };

    let number = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));

    match number {
        Some(n) if n >= min && n <= i64::from(u32::MAX) => n as u32,
        _ => {
            warn!(key = %key, value = %value, default = default, "Invalid value, using default");
            default
        }
    }
}

fn read_flag(store: &dyn ConfigStore, key: &str, default: bool) -> bool {
    match store.get(key) {
        None => default,
        Some(Value::Bool(flag)) => flag,
        Some(other) => {
            warn!(key = %key, value = %other, default = default, "Invalid flag, using default");
            default
        }
    }
}

impl LimitConfig {
    /// Load a typed configuration from a store.
    ///
    /// Missing keys take their defaults and malformed values are skipped;
    /// loading never fails.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let bypass: BTreeSet<String> = read_list(store, keys::WHITELIST)
            .iter()
            .map(|item| value_to_string(item).trim().to_string())
            .filter(|actor| !actor.is_empty())
            .collect();

        let config = LimitConfig {
            default_user_limit: read_count(store, keys::MAX_REQUESTS, 1, DEFAULT_MAX_REQUESTS),
            time_window: Duration::from_secs(u64::from(read_count(
                store,
                keys::TIME_WINDOW_SECONDS,
                1,
                DEFAULT_WINDOW_SECS as u32,
            ))),
            bypass,
            group_user_limits: parse_limit_entries(
                keys::GROUP_LIMITS,
                &read_list(store, keys::GROUP_LIMITS),
            ),
            actor_limits: parse_limit_entries(
                keys::USER_LIMITS,
                &read_list(store, keys::USER_LIMITS),
            ),
            default_group_total_limit: read_count(store, keys::DEFAULT_GROUP_TOTAL_LIMIT, 0, 0),
            group_total_limits: parse_limit_entries(
                keys::GROUP_TOTAL_LIMITS,
                &read_list(store, keys::GROUP_TOTAL_LIMITS),
            ),
            user_limit_enabled: read_flag(store, keys::USER_LIMIT_ENABLED, true),
            group_total_enabled: read_flag(store, keys::GROUP_TOTAL_ENABLED, true),
        };

        debug!(
            max_requests = config.default_user_limit,
            window_secs = config.window_secs(),
            bypass = config.bypass.len(),
            group_limits = config.group_user_limits.len(),
            user_limits = config.actor_limits.len(),
            group_total_limits = config.group_total_limits.len(),
            "Loaded limit configuration"
        );

        config
    }

    /// Write every key of this configuration to a store and save it.
    pub fn persist(&self, store: &dyn ConfigStore) -> Result<()> {
        store.set(keys::MAX_REQUESTS, Value::from(self.default_user_limit));
        store.set(keys::TIME_WINDOW_SECONDS, Value::from(self.window_secs()));
        store.set(
            keys::WHITELIST,
            Value::from(self.bypass.iter().cloned().collect::<Vec<_>>()),
        );
        store.set(
            keys::GROUP_LIMITS,
            Value::from(dump_limit_entries(&self.group_user_limits)),
        );
        store.set(keys::USER_LIMITS, Value::from(dump_limit_entries(&self.actor_limits)));
        store.set(
            keys::DEFAULT_GROUP_TOTAL_LIMIT,
            Value::from(self.default_group_total_limit),
        );
        store.set(
            keys::GROUP_TOTAL_LIMITS,
            Value::from(dump_limit_entries(&self.group_total_limits)),
        );
        store.set(keys::USER_LIMIT_ENABLED, Value::from(self.user_limit_enabled));
        store.set(keys::GROUP_TOTAL_ENABLED, Value::from(self.group_total_enabled));
        store.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_limit_entries_skips_malformed() {
        let raw = vec![
            json!("g1:5"),
            json!(" g2 : 7 "),
            json!("no_colon"),
            json!("g3:abc"),
            json!("g4:0"),
            json!("g5:-2"),
            json!(":3"),
            json!(42),
            json!("g6:2:extra"),
        ];
        let limits = parse_limit_entries("group_limits", &raw);

        assert_eq!(limits.len(), 2);
        assert_eq!(limits["g1"], 5);
        assert_eq!(limits["g2"], 7);
    }

    #[test]
    fn test_parse_limit_entries_keeps_colon_in_id_prefix_only() {
        let limits = parse_limit_entries("user_limits", &[json!("a:b:3")]);
        assert!(limits.is_empty());

        let limits = parse_limit_entries("user_limits", &[json!("u1:3"), json!("u1:4")]);
        assert_eq!(limits["u1"], 4);
    }

    #[test]
    fn test_dump_limit_entries() {
        let mut limits = BTreeMap::new();
        limits.insert("g1".to_string(), 5);
        limits.insert("g2".to_string(), 1);
        assert_eq!(dump_limit_entries(&limits), vec!["g1:5", "g2:1"]);
    }

    #[test]
    fn test_load_defaults_from_empty_store() {
        let store = MemoryStore::new();
        assert_eq!(LimitConfig::load(&store), LimitConfig::default());
    }

    #[test]
    fn test_load_full_document() {
        let store = MemoryStore::from_json(json!({
            "max_requests": 3,
            "time_window_seconds": 30,
            "whitelist": ["vip", " admin ", ""],
            "group_limits": ["gA:7"],
            "user_limits": ["uX:4", "broken"],
            "default_group_total_limit": 10,
            "group_total_limits": ["g1:5"],
            "user_limit_enabled": false,
            "group_total_enabled": true
        }));
        let config = LimitConfig::load(&store);

        assert_eq!(config.default_user_limit, 3);
        assert_eq!(config.window_secs(), 30);
        assert_eq!(config.bypass.len(), 2);
        assert!(config.bypass.contains("admin"));
        assert_eq!(config.group_user_limits["gA"], 7);
        assert_eq!(config.actor_limits.len(), 1);
        assert_eq!(config.default_group_total_limit, 10);
        assert_eq!(config.group_total_limits["g1"], 5);
        assert!(!config.user_limit_enabled);
        assert!(config.group_total_enabled);
    }

    #[test]
    fn test_load_invalid_scalars_fall_back_to_defaults() {
        let store = MemoryStore::from_json(json!({
            "max_requests": 0,
            "time_window_seconds": "soon",
            "whitelist": "vip",
            "default_group_total_limit": -1,
            "user_limit_enabled": "yes"
        }));
        let config = LimitConfig::load(&store);

        assert_eq!(config.default_user_limit, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.window_secs(), DEFAULT_WINDOW_SECS);
        assert!(config.bypass.is_empty());
        assert_eq!(config.default_group_total_limit, 0);
        assert!(config.user_limit_enabled);
    }

    #[test]
    fn test_load_accepts_numeric_strings() {
        let store = MemoryStore::from_json(json!({ "max_requests": " 9 " }));
        assert_eq!(LimitConfig::load(&store).default_user_limit, 9);
    }

    #[test]
    fn test_persist_layout() {
        let store = MemoryStore::new();
        let config = LimitConfig::new(4, Duration::from_secs(20))
            .with_actor_limit("u1", 2)
            .with_group_user_limit("g1", 3)
            .with_group_total_limit("g1", 9)
            .with_bypass("vip");
        config.persist(&store).unwrap();

        assert_eq!(store.get("max_requests"), Some(json!(4)));
        assert_eq!(store.get("time_window_seconds"), Some(json!(20)));
        assert_eq!(store.get("whitelist"), Some(json!(["vip"])));
        assert_eq!(store.get("user_limits"), Some(json!(["u1:2"])));
        assert_eq!(store.get("group_limits"), Some(json!(["g1:3"])));
        assert_eq!(store.get("group_total_limits"), Some(json!(["g1:9"])));
        assert_eq!(store.get("default_group_total_limit"), Some(json!(0)));
        assert_eq!(store.get("user_limit_enabled"), Some(json!(true)));

        assert_eq!(LimitConfig::load(&store), config);
    }
}
