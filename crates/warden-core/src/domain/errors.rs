//! Coded errors - machine-readable codes, message templates, nested sub-errors.
//!
//! Every error that crosses an API boundary is converted into a
//! [`CodedError`] and from there into an [`ErrorDocument`]:
//!
//! ```text
//! { "code": "WRD0034", "description": "...", "data": {...}, "sub_errors": [...] }
//! ```
//!
//! # 設計原則
//! - コードごとに必須フィールドを宣言する（required_fields）
//! - 必須フィールドが欠けている場合、エラー自体が WRD0008 に変換される
//! - 子エラーは再帰的に同じ形にシリアライズされる

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Abstract error classification, used for transport-level status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Timeout,
    Postponed,
    ValidationFailed,
    Unimplemented,
    DataValidation,
    Duplicate,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status an API layer should report for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::Duplicate => 409,
            ErrorKind::Timeout | ErrorKind::Unavailable => 503,
            ErrorKind::Postponed => 202,
            ErrorKind::ValidationFailed => 401,
            ErrorKind::Unimplemented => 501,
            ErrorKind::DataValidation => 400,
            ErrorKind::Internal => 500,
        }
    }
}

/// A symbolic error code with its message template and required data fields.
///
/// Templates reference data fields as `{field}`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: &'static str,
    pub required_fields: &'static [&'static str],
}

impl ErrorCode {
    /// Finds a code by its string form.
    pub fn lookup(code: &str) -> Option<&'static ErrorCode> {
        codes::ALL.iter().copied().find(|c| c.code == code)
    }

    /// Interpolates `data` into the message template.
    ///
    /// Strings are inserted raw, arrays are comma-joined, objects render as
    /// `key=value` pairs. Unknown placeholders are left untouched.
    pub fn render(&self, data: &Map<String, Value>) -> String {
        let mut out = String::with_capacity(self.message.len());
        let mut rest = self.message;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let field = &after[..end];
                    match data.get(field) {
                        Some(value) => out.push_str(&display_value(value)),
                        None => {
                            out.push('{');
                            out.push_str(field);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(fields) => fields
            .iter()
            .map(|(k, v)| format!("{k}={}", display_value(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// The catalogue of error codes.
pub mod codes {
    use super::{ErrorCode, ErrorKind};

    pub static GENERIC: ErrorCode = ErrorCode {
        code: "WRD0000",
        kind: ErrorKind::Internal,
        message: "An unexpected error occurred",
        required_fields: &[],
    };

    pub static MISSING_REQUIRED_FIELD: ErrorCode = ErrorCode {
        code: "WRD0008",
        kind: ErrorKind::Internal,
        message: "Error code {code} requires field {field} to be set",
        required_fields: &["code", "field"],
    };

    pub static MISSING_RESOURCE: ErrorCode = ErrorCode {
        code: "WRD0009",
        kind: ErrorKind::NotFound,
        message: "The following resource(s) could not be found: {resources}",
        required_fields: &["resources"],
    };

    pub static OPERATION_TIMED_OUT: ErrorCode = ErrorCode {
        code: "WRD0011",
        kind: ErrorKind::Timeout,
        message: "Operation timed out after: {timeout}",
        required_fields: &["timeout"],
    };

    pub static OPERATION_POSTPONED: ErrorCode = ErrorCode {
        code: "WRD0012",
        kind: ErrorKind::Postponed,
        message: "Operation {call_id} has been accepted and will run on queue {queue}",
        required_fields: &["call_id", "queue"],
    };

    pub static OPERATION_CANCELED: ErrorCode = ErrorCode {
        code: "WRD0013",
        kind: ErrorKind::Conflict,
        message: "Operation {call_id} was canceled before it completed",
        required_fields: &["call_id"],
    };

    pub static NOT_IMPLEMENTED: ErrorCode = ErrorCode {
        code: "WRD0014",
        kind: ErrorKind::Unimplemented,
        message: "The operation {operation_name} is not implemented",
        required_fields: &["operation_name"],
    };

    pub static INVALID_VALUE: ErrorCode = ErrorCode {
        code: "WRD0015",
        kind: ErrorKind::DataValidation,
        message: "Invalid properties: {properties}",
        required_fields: &["properties"],
    };

    pub static MISSING_VALUE: ErrorCode = ErrorCode {
        code: "WRD0016",
        kind: ErrorKind::DataValidation,
        message: "Missing values for the following properties: {properties}",
        required_fields: &["properties"],
    };

    pub static UNSUPPORTED_VALUE: ErrorCode = ErrorCode {
        code: "WRD0017",
        kind: ErrorKind::DataValidation,
        message: "The following properties are not supported: {properties}",
        required_fields: &["properties"],
    };

    pub static DUPLICATE_RESOURCE: ErrorCode = ErrorCode {
        code: "WRD0018",
        kind: ErrorKind::Duplicate,
        message: "Duplicate resource: {resource_id}",
        required_fields: &["resource_id"],
    };

    pub static NO_AVAILABLE_QUEUES: ErrorCode = ErrorCode {
        code: "WRD0020",
        kind: ErrorKind::Unavailable,
        message: "There are no healthy worker queues available",
        required_fields: &[],
    };

    pub static QUEUE_UNAVAILABLE: ErrorCode = ErrorCode {
        code: "WRD0021",
        kind: ErrorKind::Unavailable,
        message: "Worker queue {queue} is not accepting work in this process",
        required_fields: &["queue"],
    };

    pub static VALIDATION_FAILED: ErrorCode = ErrorCode {
        code: "WRD0022",
        kind: ErrorKind::ValidationFailed,
        message: "Signature validation failed for message from {sender_id}",
        required_fields: &["sender_id"],
    };

    pub static REPO_PUBLISH_FAILED: ErrorCode = ErrorCode {
        code: "WRD0030",
        kind: ErrorKind::Internal,
        message: "Publish of repository [{repo_id}] with distributor [{distributor_id}] failed",
        required_fields: &["repo_id", "distributor_id"],
    };

    pub static NO_DISTRIBUTOR: ErrorCode = ErrorCode {
        code: "WRD0031",
        kind: ErrorKind::NotFound,
        message: "Repository [{repo_id}] has no distributor [{distributor_id}]",
        required_fields: &["repo_id", "distributor_id"],
    };

    pub static MISSING_DISTRIBUTOR_PLUGIN: ErrorCode = ErrorCode {
        code: "WRD0032",
        kind: ErrorKind::NotFound,
        message: "Distributor type [{distributor_type_id}] configured on repository [{repo_id}] is not installed",
        required_fields: &["repo_id", "distributor_type_id"],
    };

    pub static PUBLISH_IN_PROGRESS: ErrorCode = ErrorCode {
        code: "WRD0033",
        kind: ErrorKind::Conflict,
        message: "Repository [{repo_id}] is already being published by distributor [{distributor_id}]",
        required_fields: &["repo_id", "distributor_id"],
    };

    pub static AUTO_PUBLISH_FAILED: ErrorCode = ErrorCode {
        code: "WRD0034",
        kind: ErrorKind::Internal,
        message: "Automatic publish of repository [{repo_id}] failed on distributors [{distributor_ids}]",
        required_fields: &["repo_id", "distributor_ids"],
    };

    pub static REPO_SYNC_FAILED: ErrorCode = ErrorCode {
        code: "WRD0035",
        kind: ErrorKind::Internal,
        message: "Sync of repository [{repo_id}] failed",
        required_fields: &["repo_id"],
    };

    pub static NO_IMPORTER: ErrorCode = ErrorCode {
        code: "WRD0036",
        kind: ErrorKind::NotFound,
        message: "Repository [{repo_id}] has no importer",
        required_fields: &["repo_id"],
    };

    pub static MISSING_IMPORTER_PLUGIN: ErrorCode = ErrorCode {
        code: "WRD0037",
        kind: ErrorKind::NotFound,
        message: "Importer type [{importer_type_id}] configured on repository [{repo_id}] is not installed",
        required_fields: &["repo_id", "importer_type_id"],
    };

    pub static SYNC_IN_PROGRESS: ErrorCode = ErrorCode {
        code: "WRD0038",
        kind: ErrorKind::Conflict,
        message: "Repository [{repo_id}] is already being synchronized",
        required_fields: &["repo_id"],
    };

    pub static MISSING_PLUGIN: ErrorCode = ErrorCode {
        code: "WRD0040",
        kind: ErrorKind::NotFound,
        message: "No {capability} plugin is registered for type [{type_id}]",
        required_fields: &["capability", "type_id"],
    };

    pub static CONSUMER_OPERATION_FAILED: ErrorCode = ErrorCode {
        code: "WRD0041",
        kind: ErrorKind::Internal,
        message: "{operation} on consumer [{consumer_id}] failed",
        required_fields: &["operation", "consumer_id"],
    };

    pub static STORE_FAILURE: ErrorCode = ErrorCode {
        code: "WRD0050",
        kind: ErrorKind::Internal,
        message: "Document store failure: {reason}",
        required_fields: &["reason"],
    };

    pub(super) static ALL: &[&ErrorCode] = &[
        &GENERIC,
        &MISSING_REQUIRED_FIELD,
        &MISSING_RESOURCE,
        &OPERATION_TIMED_OUT,
        &OPERATION_POSTPONED,
        &OPERATION_CANCELED,
        &NOT_IMPLEMENTED,
        &INVALID_VALUE,
        &MISSING_VALUE,
        &UNSUPPORTED_VALUE,
        &DUPLICATE_RESOURCE,
        &NO_AVAILABLE_QUEUES,
        &QUEUE_UNAVAILABLE,
        &VALIDATION_FAILED,
        &REPO_PUBLISH_FAILED,
        &NO_DISTRIBUTOR,
        &MISSING_DISTRIBUTOR_PLUGIN,
        &PUBLISH_IN_PROGRESS,
        &AUTO_PUBLISH_FAILED,
        &REPO_SYNC_FAILED,
        &NO_IMPORTER,
        &MISSING_IMPORTER_PLUGIN,
        &SYNC_IN_PROGRESS,
        &MISSING_PLUGIN,
        &CONSUMER_OPERATION_FAILED,
        &STORE_FAILURE,
    ];
}

/// Builds an `error_data` map from key/value pairs.
pub fn error_data<K, I>(pairs: I) -> Map<String, Value>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// A nested error: either coded, or a plain message from a foreign error.
#[derive(Debug, Clone, PartialEq)]
pub enum SubError {
    Coded(CodedError),
    Other(String),
}

impl SubError {
    fn to_document(&self) -> ErrorDocument {
        match self {
            SubError::Coded(err) => err.to_document(),
            SubError::Other(description) => ErrorDocument {
                code: codes::GENERIC.code.to_string(),
                description: description.clone(),
                data: Map::new(),
                sub_errors: Vec::new(),
            },
        }
    }
}

impl From<CodedError> for SubError {
    fn from(err: CodedError) -> Self {
        SubError::Coded(err)
    }
}

/// A structured error: code + data + ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedError {
    code: &'static ErrorCode,
    data: Map<String, Value>,
    children: Vec<SubError>,
}

impl CodedError {
    /// Creates a coded error, validating the code's required fields.
    ///
    /// A missing field does not panic: the returned error is a
    /// `MISSING_REQUIRED_FIELD` error naming the offending code and field.
    pub fn new(code: &'static ErrorCode, data: Map<String, Value>) -> Self {
        if let Some(field) = code.required_fields.iter().find(|f| !data.contains_key(**f)) {
            return Self {
                code: &codes::MISSING_REQUIRED_FIELD,
                data: error_data([
                    ("code", Value::from(code.code)),
                    ("field", Value::from(*field)),
                ]),
                children: Vec::new(),
            };
        }
        Self {
            code,
            data,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: impl Into<SubError>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn add_child(&mut self, child: impl Into<SubError>) {
        self.children.push(child.into());
    }

    pub fn code(&self) -> &'static ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn children(&self) -> &[SubError] {
        &self.children
    }

    pub fn description(&self) -> String {
        self.code.render(&self.data)
    }

    /// `{code, description, data, sub_errors}`, recursively.
    pub fn to_document(&self) -> ErrorDocument {
        ErrorDocument {
            code: self.code.code.to_string(),
            description: self.description(),
            data: self.data.clone(),
            sub_errors: self.children.iter().map(SubError::to_document).collect(),
        }
    }

    /// Rebuilds an error tree from its document form.
    ///
    /// Returns `None` when the top-level code is unknown. Unknown nested
    /// codes, and generic children without data, come back as
    /// [`SubError::Other`] carrying their description.
    pub fn from_document(doc: &ErrorDocument) -> Option<Self> {
        let code = ErrorCode::lookup(&doc.code)?;
        let mut err = Self::new(code, doc.data.clone());
        for child in &doc.sub_errors {
            let is_plain = child.code == codes::GENERIC.code
                && child.data.is_empty()
                && child.sub_errors.is_empty();
            let sub = match Self::from_document(child) {
                Some(coded) if !is_plain => SubError::Coded(coded),
                _ => SubError::Other(child.description.clone()),
            };
            err.children.push(sub);
        }
        Some(err)
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

impl std::error::Error for CodedError {}

/// Transport form of a coded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDocument {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub sub_errors: Vec<ErrorDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn renders_template_fields() {
        let err = CodedError::new(
            &codes::NO_DISTRIBUTOR,
            error_data([("repo_id", json!("zoo")), ("distributor_id", json!("yum"))]),
        );

        assert_eq!(err.description(), "Repository [zoo] has no distributor [yum]");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn renders_objects_and_arrays() {
        let resources = CodedError::new(
            &codes::MISSING_RESOURCE,
            error_data([("resources", json!({"repository": "zoo"}))]),
        );
        let props = CodedError::new(
            &codes::INVALID_VALUE,
            error_data([("properties", json!(["id", "display_name"]))]),
        );

        assert!(resources.description().ends_with("repository=zoo"));
        assert_eq!(props.description(), "Invalid properties: id, display_name");
    }

    #[test]
    fn missing_required_field_becomes_meta_error() {
        let err = CodedError::new(
            &codes::NO_DISTRIBUTOR,
            error_data([("repo_id", json!("zoo"))]),
        );

        assert_eq!(err.code(), &codes::MISSING_REQUIRED_FIELD);
        assert_eq!(err.data()["code"], json!("WRD0031"));
        assert_eq!(err.data()["field"], json!("distributor_id"));
    }

    #[test]
    fn document_nests_children_and_normalizes_foreign_errors() {
        let err = CodedError::new(
            &codes::AUTO_PUBLISH_FAILED,
            error_data([("repo_id", json!("zoo")), ("distributor_ids", json!(["a"]))]),
        )
        .with_child(CodedError::new(
            &codes::REPO_PUBLISH_FAILED,
            error_data([("repo_id", json!("zoo")), ("distributor_id", json!("a"))]),
        ))
        .with_child(SubError::Other("disk full".to_string()));

        let doc = err.to_document();

        assert_eq!(doc.code, "WRD0034");
        assert_eq!(doc.sub_errors.len(), 2);
        assert_eq!(doc.sub_errors[0].code, "WRD0030");
        assert_eq!(doc.sub_errors[1].code, "WRD0000");
        assert_eq!(doc.sub_errors[1].description, "disk full");
        assert!(doc.sub_errors[1].data.is_empty());
    }

    #[test]
    fn document_survives_json_and_reconstruction() {
        let inner = CodedError::new(
            &codes::REPO_SYNC_FAILED,
            error_data([("repo_id", json!("zoo"))]),
        )
        .with_child(SubError::Other("connection reset".to_string()));
        let err = CodedError::new(
            &codes::MISSING_PLUGIN,
            error_data([("capability", json!("importer")), ("type_id", json!("yum"))]),
        )
        .with_child(inner);

        let text = serde_json::to_string(&err.to_document()).unwrap();
        let doc: ErrorDocument = serde_json::from_str(&text).unwrap();
        let rebuilt = CodedError::from_document(&doc).unwrap();

        assert_eq!(rebuilt, err);
        assert_eq!(rebuilt.to_document(), err.to_document());
    }

    #[test]
    fn unknown_code_is_not_reconstructed() {
        let doc = ErrorDocument {
            code: "XYZ9999".to_string(),
            description: "?".to_string(),
            data: Map::new(),
            sub_errors: Vec::new(),
        };

        assert!(CodedError::from_document(&doc).is_none());
    }

    #[rstest]
    #[case(ErrorKind::NotFound, 404)]
    #[case(ErrorKind::Conflict, 409)]
    #[case(ErrorKind::Timeout, 503)]
    #[case(ErrorKind::Postponed, 202)]
    #[case(ErrorKind::DataValidation, 400)]
    #[case(ErrorKind::Unimplemented, 501)]
    fn kinds_map_to_http_status(#[case] kind: ErrorKind, #[case] status: u16) {
        assert_eq!(kind.http_status(), status);
    }

    #[test]
    fn every_code_is_unique_and_looked_up() {
        for code in codes::ALL {
            assert_eq!(ErrorCode::lookup(code.code), Some(*code));
        }
    }
}
