//! Consumer record: a managed host that content handlers act on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    #[serde(rename = "_id")]
    pub id: String,

    /// Handed to handlers through `Conduit::consumer_config`.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Consumer {
    pub const COLLECTION: &'static str = "consumers";

    pub fn new(id: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    pub fn resource_name(id: &str) -> String {
        format!("consumer:{id}")
    }
}
