//! Repository records and the per-target state used by publish / sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::EntryId;
use super::report::PluginReport;

/// A content repository. Only the identity matters to the dispatch core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub notes: Map<String, Value>,
}

impl Repo {
    pub const COLLECTION: &'static str = "repos";

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            description: None,
            notes: Map::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Repository ids are non-empty and limited to `[A-Za-z0-9_.-]`.
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    /// Reservation key used when dispatching work against this repository.
    pub fn resource_name(id: &str) -> String {
        format!("repository:{id}")
    }
}

/// A distributor attached to a repository.
///
/// `publish_in_progress` is flipped with a conditional update, so at most one
/// publish per (repository, distributor) pair can hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoDistributor {
    #[serde(rename = "_id")]
    pub key: String,
    pub id: String,
    pub repo_id: String,
    pub distributor_type_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub auto_publish: bool,
    #[serde(default)]
    pub publish_in_progress: bool,
    #[serde(default)]
    pub last_publish: Option<DateTime<Utc>>,
}

impl RepoDistributor {
    pub const COLLECTION: &'static str = "repo_distributors";

    pub fn new(
        repo_id: impl Into<String>,
        id: impl Into<String>,
        distributor_type_id: impl Into<String>,
        config: Map<String, Value>,
        auto_publish: bool,
    ) -> Self {
        let repo_id = repo_id.into();
        let id = id.into();
        Self {
            key: Self::key_for(&repo_id, &id),
            id,
            repo_id,
            distributor_type_id: distributor_type_id.into(),
            config,
            auto_publish,
            publish_in_progress: false,
            last_publish: None,
        }
    }

    pub fn key_for(repo_id: &str, distributor_id: &str) -> String {
        format!("{repo_id}:{distributor_id}")
    }
}

/// The single importer of a repository; keyed by the repository id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoImporter {
    #[serde(rename = "_id")]
    pub repo_id: String,
    pub importer_type_id: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub sync_in_progress: bool,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl RepoImporter {
    pub const COLLECTION: &'static str = "repo_importers";

    pub fn new(
        repo_id: impl Into<String>,
        importer_type_id: impl Into<String>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            importer_type_id: importer_type_id.into(),
            config,
            sync_in_progress: false,
            last_sync: None,
        }
    }
}

/// How a publish or sync ended.
///
/// - `success`: the plugin returned a successful report
/// - `failed`: the plugin returned a report flagged as unsuccessful
/// - `error`: the plugin raised an error (or panicked)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    Success,
    Failed,
    Error,
}

/// One entry of the publish / sync history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(rename = "_id")]
    pub id: EntryId,
    pub repo_id: String,
    pub target_id: String,
    pub target_type_id: String,
    pub started: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub result: ResultCode,
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OperationResult {
    pub const PUBLISH_COLLECTION: &'static str = "repo_publish_results";
    pub const SYNC_COLLECTION: &'static str = "repo_sync_results";

    /// Builds an entry from a report the plugin returned.
    pub fn from_report(
        id: EntryId,
        target: (&str, &str, &str),
        started: DateTime<Utc>,
        completed: DateTime<Utc>,
        report: &PluginReport,
    ) -> Self {
        let (repo_id, target_id, target_type_id) = target;
        Self {
            id,
            repo_id: repo_id.to_string(),
            target_id: target_id.to_string(),
            target_type_id: target_type_id.to_string(),
            started,
            completed,
            result: if report.succeeded {
                ResultCode::Success
            } else {
                ResultCode::Failed
            },
            summary: report.summary.clone(),
            details: report.details.clone(),
            error_message: None,
        }
    }

    /// Builds an entry for a plugin call that raised.
    pub fn from_error(
        id: EntryId,
        target: (&str, &str, &str),
        started: DateTime<Utc>,
        completed: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let (repo_id, target_id, target_type_id) = target;
        Self {
            id,
            repo_id: repo_id.to_string(),
            target_id: target_id.to_string(),
            target_type_id: target_type_id.to_string(),
            started,
            completed,
            result: ResultCode::Error,
            summary: Value::Null,
            details: Value::Null,
            error_message: Some(message.into()),
        }
    }
}
