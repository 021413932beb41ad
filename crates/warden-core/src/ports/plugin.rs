//! Plugin ports - importer / distributor / content handler
//!
//! プラグインの中身（コンテンツ処理）はこのクレートの範囲外です。
//! ここでは呼び出し規約だけを定義します。

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{PluginReport, Repo};
use crate::ports::conduit::Conduit;
use crate::ports::store::Document;

/// Errors a plugin may raise. The dispatch core wraps these with the
/// resource they were raised for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("{0} is not supported by this plugin")]
    Unimplemented(&'static str),

    #[error("canceled")]
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCapability {
    Importer,
    Distributor,
    ContentHandler,
}

impl fmt::Display for PluginCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginCapability::Importer => "importer",
            PluginCapability::Distributor => "distributor",
            PluginCapability::ContentHandler => "content handler",
        })
    }
}

/// Layered configuration handed to a plugin call.
///
/// Lookup precedence: `override_config` > `repo_plugin_config` > `plugin_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginCallConfig {
    /// Type-wide defaults registered with the plugin.
    pub plugin_config: Document,
    /// Configuration stored on the repository's importer / distributor.
    pub repo_plugin_config: Document,
    /// Per-call overrides from the caller.
    pub override_config: Document,
}

impl PluginCallConfig {
    pub fn new(plugin_config: Document, repo_plugin_config: Document, override_config: Document) -> Self {
        Self {
            plugin_config,
            repo_plugin_config,
            override_config,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.override_config
            .get(key)
            .or_else(|| self.repo_plugin_config.get(key))
            .or_else(|| self.plugin_config.get(key))
    }

    /// All three layers merged into one mapping.
    pub fn flatten(&self) -> Document {
        let mut merged = self.plugin_config.clone();
        merged.extend(self.repo_plugin_config.clone());
        merged.extend(self.override_config.clone());
        merged
    }
}

/// A consumer's subscription to a repository, handled by the plugin of `type_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub type_id: String,
    pub repo_id: String,
    #[serde(default)]
    pub details: Value,
}

/// A content unit to install, update or uninstall on a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub type_id: String,
    pub unit_key: Value,
}

#[async_trait]
pub trait Importer: Send + Sync {
    async fn sync_repo(
        &self,
        repo: &Repo,
        conduit: &dyn Conduit,
        config: &PluginCallConfig,
    ) -> Result<PluginReport, PluginError>;
}

#[async_trait]
pub trait Distributor: Send + Sync {
    async fn publish_repo(
        &self,
        repo: &Repo,
        conduit: &dyn Conduit,
        config: &PluginCallConfig,
    ) -> Result<PluginReport, PluginError>;
}

/// Handles one content type on a consumer.
///
/// Handlers implement the operations their type supports; the rest answer
/// `Unimplemented`.
#[async_trait]
pub trait ContentHandler: Send + Sync {
    async fn bind(
        &self,
        _conduit: &dyn Conduit,
        _bindings: &[Binding],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("bind"))
    }

    async fn unbind(
        &self,
        _conduit: &dyn Conduit,
        _bindings: &[Binding],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("unbind"))
    }

    async fn install(
        &self,
        _conduit: &dyn Conduit,
        _units: &[ContentUnit],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("install"))
    }

    async fn update(
        &self,
        _conduit: &dyn Conduit,
        _units: &[ContentUnit],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("update"))
    }

    async fn uninstall(
        &self,
        _conduit: &dyn Conduit,
        _units: &[ContentUnit],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("uninstall"))
    }

    async fn clean(&self, _conduit: &dyn Conduit) -> Result<PluginReport, PluginError> {
        Err(PluginError::Unimplemented("clean"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn override_wins_over_repo_over_plugin() {
        let config = PluginCallConfig::new(
            layer(json!({"a": 1, "b": 1, "c": 1})),
            layer(json!({"b": 2, "c": 2})),
            layer(json!({"c": 3})),
        );

        assert_eq!(config.get("a"), Some(&json!(1)));
        assert_eq!(config.get("b"), Some(&json!(2)));
        assert_eq!(config.get("c"), Some(&json!(3)));
        assert_eq!(config.get("d"), None);
        assert_eq!(Value::Object(config.flatten()), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn capability_reads_naturally() {
        assert_eq!(PluginCapability::ContentHandler.to_string(), "content handler");
    }
}
