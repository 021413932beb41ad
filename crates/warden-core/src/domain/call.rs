//! Call reports: the durable record of one dispatched operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::errors::{CodedError, ErrorDocument, codes, error_data};
use super::ids::CallId;
use crate::error::WardenError;

/// Lifecycle of a dispatched call.
///
/// ```text
/// waiting ──> running ──> finished
///    │           └──────> error
///    └──────────────────> canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Waiting,
    Running,
    Finished,
    Error,
    Canceled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Finished | CallState::Error | CallState::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReport {
    #[serde(rename = "_id")]
    pub call_id: CallId,
    pub operation: String,
    pub resource: String,
    pub queue: String,
    pub state: CallState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorDocument>,
    #[serde(default)]
    pub progress: Option<Value>,
}

impl CallReport {
    pub const COLLECTION: &'static str = "call_reports";

    pub fn waiting(
        call_id: CallId,
        operation: impl Into<String>,
        resource: impl Into<String>,
        queue: impl Into<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            operation: operation.into(),
            resource: resource.into(),
            queue: queue.into(),
            state: CallState::Waiting,
            submitted_at,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            progress: None,
        }
    }

    /// The "accepted, will run later" error an API layer answers with.
    pub fn postponed(&self) -> CodedError {
        CodedError::new(
            &codes::OPERATION_POSTPONED,
            error_data([
                ("call_id", json!(self.call_id.to_string())),
                ("queue", json!(self.queue)),
            ]),
        )
    }
}

/// What a caller gets back from the dispatcher.
#[derive(Debug)]
pub enum OperationOutcome {
    /// The operation ran; the value is the plugin's report.
    Completed(Value),
    /// The operation was queued; poll or wait on the call report.
    Postponed(CallReport),
    /// The operation ran and failed.
    Failed(WardenError),
}

impl OperationOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            OperationOutcome::Completed(_) => 200,
            OperationOutcome::Postponed(_) => 202,
            OperationOutcome::Failed(err) => err.http_status(),
        }
    }

    /// Response body: the result, the call report, or the error document.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            OperationOutcome::Completed(value) => Ok(value.clone()),
            OperationOutcome::Postponed(report) => serde_json::to_value(report),
            OperationOutcome::Failed(err) => serde_json::to_value(err.to_document()),
        }
    }
}
