use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::errors::{CodedError, ErrorCode, ErrorDocument, ErrorKind, SubError, codes, error_data};
use crate::ports::plugin::{PluginCapability, PluginError};

pub type Result<T, E = WardenError> = std::result::Result<T, E>;

/// Crate-wide error type.
///
/// Every variant maps onto exactly one [`ErrorCode`]; `to_coded()` produces
/// the transport form with the variant's fields as `data`.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("{collection} record [{name}] does not exist")]
    DoesNotExist {
        collection: &'static str,
        name: String,
    },

    #[error("there are no healthy worker queues available")]
    NoAvailableQueues,

    #[error("missing resource(s): {0:?}")]
    MissingResource(BTreeMap<String, String>),

    #[error("operation timed out after {0:?}")]
    OperationTimedOut(Duration),

    #[error("operation {call_id} was canceled")]
    OperationCanceled { call_id: String },

    #[error("queue {queue} is not served by this dispatcher")]
    LaneClosed { queue: String },

    #[error("operation {0} is not implemented")]
    NotImplemented(String),

    #[error("invalid properties: {0:?}")]
    InvalidValue(Vec<String>),

    #[error("missing properties: {0:?}")]
    MissingValue(Vec<String>),

    #[error("unsupported properties: {0:?}")]
    UnsupportedValue(Vec<String>),

    #[error("duplicate resource: {0}")]
    DuplicateResource(String),

    #[error("signature validation failed for sender {sender_id}")]
    ValidationFailed { sender_id: String },

    #[error("no {capability} plugin registered for type_id={type_id}")]
    MissingPlugin {
        capability: PluginCapability,
        type_id: String,
    },

    #[error("repository {repo_id} has no distributor {distributor_id}")]
    NoDistributor {
        repo_id: String,
        distributor_id: String,
    },

    #[error("distributor type {distributor_type_id} of repository {repo_id} is not installed")]
    MissingDistributorPlugin {
        repo_id: String,
        distributor_type_id: String,
    },

    #[error("repository {repo_id} is already being published by {distributor_id}")]
    PublishInProgress {
        repo_id: String,
        distributor_id: String,
    },

    #[error("publish of repository {repo_id} with {distributor_id} failed")]
    PublishFailed {
        repo_id: String,
        distributor_id: String,
        #[source]
        source: PluginError,
    },

    #[error("auto publish of repository {repo_id} failed on {} distributor(s)", .failures.len())]
    AutoPublishFailed {
        repo_id: String,
        failures: Vec<(String, WardenError)>,
    },

    #[error("repository {repo_id} has no importer")]
    NoImporter { repo_id: String },

    #[error("importer type {importer_type_id} of repository {repo_id} is not installed")]
    MissingImporterPlugin {
        repo_id: String,
        importer_type_id: String,
    },

    #[error("repository {repo_id} is already being synchronized")]
    SyncInProgress { repo_id: String },

    #[error("sync of repository {repo_id} failed")]
    SyncFailed {
        repo_id: String,
        #[source]
        source: PluginError,
    },

    #[error("{operation} on consumer {consumer_id} failed")]
    ConsumerOperationFailed {
        consumer_id: String,
        operation: &'static str,
        #[source]
        source: PluginError,
    },

    #[error(transparent)]
    Coded(#[from] CodedError),

    #[error("store failure: {0}")]
    Store(String),

    #[error("encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl WardenError {
    /// Shorthand for `MissingResource` with a single entry.
    pub fn missing(kind: &str, id: impl Into<String>) -> Self {
        WardenError::MissingResource(BTreeMap::from([(kind.to_string(), id.into())]))
    }

    pub fn code(&self) -> &'static ErrorCode {
        match self {
            WardenError::DoesNotExist { .. } | WardenError::MissingResource(_) => {
                &codes::MISSING_RESOURCE
            }
            WardenError::NoAvailableQueues => &codes::NO_AVAILABLE_QUEUES,
            WardenError::OperationTimedOut(_) => &codes::OPERATION_TIMED_OUT,
            WardenError::OperationCanceled { .. } => &codes::OPERATION_CANCELED,
            WardenError::LaneClosed { .. } => &codes::QUEUE_UNAVAILABLE,
            WardenError::NotImplemented(_) => &codes::NOT_IMPLEMENTED,
            WardenError::InvalidValue(_) => &codes::INVALID_VALUE,
            WardenError::MissingValue(_) => &codes::MISSING_VALUE,
            WardenError::UnsupportedValue(_) => &codes::UNSUPPORTED_VALUE,
            WardenError::DuplicateResource(_) => &codes::DUPLICATE_RESOURCE,
            WardenError::ValidationFailed { .. } => &codes::VALIDATION_FAILED,
            WardenError::MissingPlugin { .. } => &codes::MISSING_PLUGIN,
            WardenError::NoDistributor { .. } => &codes::NO_DISTRIBUTOR,
            WardenError::MissingDistributorPlugin { .. } => &codes::MISSING_DISTRIBUTOR_PLUGIN,
            WardenError::PublishInProgress { .. } => &codes::PUBLISH_IN_PROGRESS,
            WardenError::PublishFailed { .. } => &codes::REPO_PUBLISH_FAILED,
            WardenError::AutoPublishFailed { .. } => &codes::AUTO_PUBLISH_FAILED,
            WardenError::NoImporter { .. } => &codes::NO_IMPORTER,
            WardenError::MissingImporterPlugin { .. } => &codes::MISSING_IMPORTER_PLUGIN,
            WardenError::SyncInProgress { .. } => &codes::SYNC_IN_PROGRESS,
            WardenError::SyncFailed { .. } => &codes::REPO_SYNC_FAILED,
            WardenError::ConsumerOperationFailed { .. } => &codes::CONSUMER_OPERATION_FAILED,
            WardenError::Coded(err) => err.code(),
            WardenError::Store(_) | WardenError::Encoding(_) => &codes::STORE_FAILURE,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// The repository this error is scoped to, when it has one.
    pub fn repo_id(&self) -> Option<&str> {
        match self {
            WardenError::NoDistributor { repo_id, .. }
            | WardenError::MissingDistributorPlugin { repo_id, .. }
            | WardenError::PublishInProgress { repo_id, .. }
            | WardenError::PublishFailed { repo_id, .. }
            | WardenError::AutoPublishFailed { repo_id, .. }
            | WardenError::NoImporter { repo_id }
            | WardenError::MissingImporterPlugin { repo_id, .. }
            | WardenError::SyncInProgress { repo_id }
            | WardenError::SyncFailed { repo_id, .. } => Some(repo_id),
            WardenError::MissingResource(resources) => {
                resources.get("repository").map(String::as_str)
            }
            _ => None,
        }
    }

    pub fn to_coded(&self) -> CodedError {
        let code = self.code();
        let data = match self {
            WardenError::DoesNotExist { collection, name } => {
                error_data([("resources", json!({ *collection: name }))])
            }
            WardenError::MissingResource(resources) => {
                error_data([("resources", json!(resources))])
            }
            WardenError::NoAvailableQueues => error_data::<&str, _>([]),
            WardenError::OperationTimedOut(after) => {
                error_data([("timeout", json!(format!("{after:?}")))])
            }
            WardenError::OperationCanceled { call_id } => {
                error_data([("call_id", json!(call_id))])
            }
            WardenError::LaneClosed { queue } => error_data([("queue", json!(queue))]),
            WardenError::NotImplemented(operation) => {
                error_data([("operation_name", json!(operation))])
            }
            WardenError::InvalidValue(props)
            | WardenError::MissingValue(props)
            | WardenError::UnsupportedValue(props) => error_data([("properties", json!(props))]),
            WardenError::DuplicateResource(id) => error_data([("resource_id", json!(id))]),
            WardenError::ValidationFailed { sender_id } => {
                error_data([("sender_id", json!(sender_id))])
            }
            WardenError::MissingPlugin {
                capability,
                type_id,
            } => error_data([
                ("capability", json!(capability.to_string())),
                ("type_id", json!(type_id)),
            ]),
            WardenError::NoDistributor {
                repo_id,
                distributor_id,
            }
            | WardenError::PublishInProgress {
                repo_id,
                distributor_id,
            }
            | WardenError::PublishFailed {
                repo_id,
                distributor_id,
                ..
            } => error_data([
                ("repo_id", json!(repo_id)),
                ("distributor_id", json!(distributor_id)),
            ]),
            WardenError::MissingDistributorPlugin {
                repo_id,
                distributor_type_id,
            } => error_data([
                ("repo_id", json!(repo_id)),
                ("distributor_type_id", json!(distributor_type_id)),
            ]),
            WardenError::AutoPublishFailed { repo_id, failures } => {
                let ids: Vec<&str> = failures.iter().map(|(id, _)| id.as_str()).collect();
                error_data([("repo_id", json!(repo_id)), ("distributor_ids", json!(ids))])
            }
            WardenError::NoImporter { repo_id }
            | WardenError::SyncInProgress { repo_id }
            | WardenError::SyncFailed { repo_id, .. } => error_data([("repo_id", json!(repo_id))]),
            WardenError::MissingImporterPlugin {
                repo_id,
                importer_type_id,
            } => error_data([
                ("repo_id", json!(repo_id)),
                ("importer_type_id", json!(importer_type_id)),
            ]),
            WardenError::ConsumerOperationFailed {
                consumer_id,
                operation,
                ..
            } => error_data([
                ("operation", json!(operation)),
                ("consumer_id", json!(consumer_id)),
            ]),
            WardenError::Coded(err) => return err.clone(),
            WardenError::Store(reason) => error_data([("reason", Value::from(reason.as_str()))]),
            WardenError::Encoding(err) => error_data([("reason", json!(err.to_string()))]),
        };

        let mut coded = CodedError::new(code, data);
        match self {
            WardenError::PublishFailed { source, .. }
            | WardenError::SyncFailed { source, .. }
            | WardenError::ConsumerOperationFailed { source, .. } => {
                coded.add_child(SubError::Other(source.to_string()));
            }
            WardenError::AutoPublishFailed { failures, .. } => {
                for (_, failure) in failures {
                    coded.add_child(failure.to_coded());
                }
            }
            _ => {}
        }
        coded
    }

    pub fn to_document(&self) -> ErrorDocument {
        self.to_coded().to_document()
    }
}
