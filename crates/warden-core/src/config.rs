//! WardenConfig - 起動時に 1 度だけ読み込み、参照で渡す設定
//!
//! Every section and field has a default, so an empty document is a valid
//! configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::observability::LogFormat;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message signing between the dispatch core and remote agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub auth_enabled: bool,
    /// Key this process signs outgoing messages with.
    #[serde(default)]
    pub signing_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of queue lanes this process serves.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Lanes are named `{name_prefix}-{n}`.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// How long a queue may stay missing before the reaper deletes it.
    #[serde(default = "default_missing_grace_secs")]
    pub missing_grace_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_name_prefix() -> String {
    "worker".to_string()
}

fn default_missing_grace_secs() -> u64 {
    300
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            name_prefix: default_name_prefix(),
            missing_grace_secs: default_missing_grace_secs(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl WorkersConfig {
    pub fn queue_names(&self) -> Vec<String> {
        (0..self.count)
            .map(|n| format!("{}-{n}", self.name_prefix))
            .collect()
    }

    pub fn missing_grace(&self) -> Duration {
        Duration::from_secs(self.missing_grace_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl WardenConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: WardenConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the dispatch core cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();
        if self.workers.count == 0 {
            invalid.push("workers.count".to_string());
        }
        if self.workers.name_prefix.is_empty() {
            invalid.push("workers.name_prefix".to_string());
        }
        if self.workers.reap_interval_secs == 0 {
            invalid.push("workers.reap_interval_secs".to_string());
        }
        if self.messaging.auth_enabled && self.messaging.signing_key.is_empty() {
            invalid.push("messaging.signing_key".to_string());
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(WardenError::InvalidValue(invalid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = WardenConfig::from_json_str("{}").unwrap();

        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.workers.count, 4);
        assert!(!config.messaging.auth_enabled);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = WardenConfig::from_json_str(
            r#"{"workers": {"count": 2, "name_prefix": "reserved"}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        assert_eq!(config.workers.queue_names(), vec!["reserved-0", "reserved-1"]);
        assert_eq!(config.workers.missing_grace(), Duration::from_secs(300));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[rstest]
    #[case(r#"{"workers": {"count": 0}}"#, "workers.count")]
    #[case(r#"{"workers": {"name_prefix": ""}}"#, "workers.name_prefix")]
    #[case(r#"{"workers": {"reap_interval_secs": 0}}"#, "workers.reap_interval_secs")]
    #[case(r#"{"messaging": {"auth_enabled": true}}"#, "messaging.signing_key")]
    fn invalid_settings_are_named(#[case] raw: &str, #[case] field: &str) {
        let err = WardenConfig::from_json_str(raw).unwrap_err();

        assert!(matches!(err, WardenError::InvalidValue(fields) if fields == vec![field.to_string()]));
    }

    #[test]
    fn malformed_json_is_an_encoding_error() {
        let err = WardenConfig::from_json_str("{workers:").unwrap_err();

        assert!(matches!(err, WardenError::Encoding(_)));
    }
}
