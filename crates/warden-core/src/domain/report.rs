//! Plugin report: the common result shape every plugin call returns.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// What a plugin hands back after a sync, publish or content operation.
///
/// `summary` is short and human oriented, `details` is free-form and may be
/// large. Neither is interpreted by the dispatch core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginReport {
    pub succeeded: bool,

    #[serde(default)]
    pub summary: Value,

    #[serde(default)]
    pub details: Value,
}

impl PluginReport {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            summary: Value::Null,
            details: Value::Null,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            summary: Value::String(reason.into()),
            details: Value::Null,
        }
    }

    pub fn with_summary(mut self, summary: Value) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Plain mapping form, `{succeeded, summary, details}`.
    pub fn dict(&self) -> Value {
        json!({
            "succeeded": self.succeeded,
            "summary": self.summary,
            "details": self.details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_always_carries_succeeded_and_details() {
        let report = PluginReport::failure("disk full").with_details(json!({"units": 3}));
        let dict = report.dict();

        assert_eq!(dict["succeeded"], json!(false));
        assert_eq!(dict["summary"], json!("disk full"));
        assert_eq!(dict["details"], json!({"units": 3}));
    }

    #[test]
    fn success_has_empty_payloads() {
        let dict = PluginReport::success().dict();

        assert_eq!(dict["succeeded"], json!(true));
        assert!(dict["details"].is_null());
    }
}
