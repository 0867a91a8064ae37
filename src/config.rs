//! Configuration management for the throttle service.
//!
//! This is the static application configuration (where the limit store lives,
//! denial message templates, logging). The limits themselves are mutable at
//! runtime and live in the [`ConfigStore`](crate::store::ConfigStore).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThrottleError};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "LLM_THROTTLE";

/// Main configuration for the throttle service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Limit store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Denial message templates
    #[serde(default)]
    pub messages: MessageTemplates,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limit store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON document holding the limit configuration
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("rate_limit_config.json")
}

/// Templates for denial messages.
///
/// `{cooldown}`, `{max}` and `{window}` are substituted with the cooldown in
/// seconds, the cap that was hit, and the window length in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplates {
    /// Sent when the actor's own limit is hit
    #[serde(default = "default_tip_message")]
    pub tip_message: String,

    /// Sent when the group's aggregate limit is hit
    #[serde(default = "default_group_tip_message")]
    pub group_tip_message: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            tip_message: default_tip_message(),
            group_tip_message: default_group_tip_message(),
        }
    }
}

fn default_tip_message() -> String {
    "Too many requests, please retry in {cooldown} seconds (limit: {max} requests per {window} seconds).".to_string()
}

fn default_group_tip_message() -> String {
    "This group is sending too many requests, please retry in {cooldown} seconds (group limit: {max} requests per {window} seconds).".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ThrottleError::Config(e.to_string()))
    }

    /// Load configuration from an optional file layered with environment
    /// overrides such as `LLM_THROTTLE__STORE__PATH`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.store.path, PathBuf::from("rate_limit_config.json"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.messages.tip_message.contains("{cooldown}"));
        assert!(config.messages.group_tip_message.contains("{max}"));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
store:
  path: /var/lib/llm-throttle/limits.json
messages:
  tip_message: "Slow down, {cooldown}s left"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/llm-throttle/limits.json"));
        assert_eq!(config.messages.tip_message, "Slow down, {cooldown}s left");
        assert_eq!(config.messages.group_tip_message, default_group_tip_message());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = AppConfig::from_yaml("store: [unterminated").unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("throttle.yaml");
        std::fs::write(&path, "logging:\n  level: debug\n  json: true\n").unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.store, StoreConfig::default());
    }
}
