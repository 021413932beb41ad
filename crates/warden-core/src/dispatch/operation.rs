//! Operation - キューに載せる作業単位
//!
//! 各 operation は 1 つの resource（repository か consumer）に対して実行され、
//! その resource の予約が同じ queue への直列化を保証する。

use serde::{Deserialize, Serialize};

use crate::domain::{Consumer, Repo};
use crate::ports::plugin::{Binding, ContentUnit};
use crate::ports::store::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    Sync {
        repo_id: String,
        #[serde(default)]
        overrides: Document,
    },
    Publish {
        repo_id: String,
        distributor_id: String,
        #[serde(default)]
        overrides: Document,
    },
    AutoPublish {
        repo_id: String,
    },
    Bind {
        consumer_id: String,
        bindings: Vec<Binding>,
        #[serde(default)]
        options: Document,
    },
    Unbind {
        consumer_id: String,
        bindings: Vec<Binding>,
        #[serde(default)]
        options: Document,
    },
    Install {
        consumer_id: String,
        units: Vec<ContentUnit>,
        #[serde(default)]
        options: Document,
    },
    Update {
        consumer_id: String,
        units: Vec<ContentUnit>,
        #[serde(default)]
        options: Document,
    },
    Uninstall {
        consumer_id: String,
        units: Vec<ContentUnit>,
        #[serde(default)]
        options: Document,
    },
    Clean {
        consumer_id: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sync { .. } => "sync",
            Operation::Publish { .. } => "publish",
            Operation::AutoPublish { .. } => "auto_publish",
            Operation::Bind { .. } => "bind",
            Operation::Unbind { .. } => "unbind",
            Operation::Install { .. } => "install",
            Operation::Update { .. } => "update",
            Operation::Uninstall { .. } => "uninstall",
            Operation::Clean { .. } => "clean",
        }
    }

    /// The consumer this operation acts on, for consumer-side operations.
    pub fn consumer_id(&self) -> Option<&str> {
        match self {
            Operation::Bind { consumer_id, .. }
            | Operation::Unbind { consumer_id, .. }
            | Operation::Install { consumer_id, .. }
            | Operation::Update { consumer_id, .. }
            | Operation::Uninstall { consumer_id, .. }
            | Operation::Clean { consumer_id } => Some(consumer_id),
            Operation::Sync { .. } | Operation::Publish { .. } | Operation::AutoPublish { .. } => {
                None
            }
        }
    }

    /// Reservation key: `repository:<id>` or `consumer:<id>`.
    pub fn resource(&self) -> String {
        match self {
            Operation::Sync { repo_id, .. }
            | Operation::Publish { repo_id, .. }
            | Operation::AutoPublish { repo_id } => Repo::resource_name(repo_id),
            Operation::Bind { consumer_id, .. }
            | Operation::Unbind { consumer_id, .. }
            | Operation::Install { consumer_id, .. }
            | Operation::Update { consumer_id, .. }
            | Operation::Uninstall { consumer_id, .. }
            | Operation::Clean { consumer_id } => Consumer::resource_name(consumer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"operation": "sync", "repo_id": "zoo"}), "sync", "repository:zoo")]
    #[case(
        json!({"operation": "publish", "repo_id": "zoo", "distributor_id": "yum"}),
        "publish",
        "repository:zoo"
    )]
    #[case(json!({"operation": "auto_publish", "repo_id": "zoo"}), "auto_publish", "repository:zoo")]
    #[case(json!({"operation": "clean", "consumer_id": "c1"}), "clean", "consumer:c1")]
    #[case(
        json!({"operation": "install", "consumer_id": "c1", "units": [{"type_id": "rpm", "unit_key": {"name": "zsh"}}]}),
        "install",
        "consumer:c1"
    )]
    fn parses_tagged_form(
        #[case] value: serde_json::Value,
        #[case] name: &str,
        #[case] resource: &str,
    ) {
        let op: Operation = serde_json::from_value(value).unwrap();

        assert_eq!(op.name(), name);
        assert_eq!(op.resource(), resource);
    }

    #[test]
    fn consumer_operations_name_their_consumer() {
        let op = Operation::Clean {
            consumer_id: "c1".to_string(),
        };
        let sync = Operation::AutoPublish {
            repo_id: "zoo".to_string(),
        };

        assert_eq!(op.consumer_id(), Some("c1"));
        assert_eq!(sync.consumer_id(), None);
    }
}
