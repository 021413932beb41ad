//! Resource reservation record.

use serde::{Deserialize, Serialize};

fn one() -> u64 {
    1
}

/// Maps a resource name (e.g. `repository:zoo`) to the queue that owns it.
///
/// A reservation whose count drops to zero is deleted, so a stored record
/// always has `num_reservations >= 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReservation {
    #[serde(rename = "_id")]
    pub name: String,

    #[serde(default)]
    pub assigned_queue: Option<String>,

    #[serde(default = "one")]
    pub num_reservations: u64,
}

impl ResourceReservation {
    pub const COLLECTION: &'static str = "reserved_resources";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assigned_queue: None,
            num_reservations: 1,
        }
    }

    pub fn assigned(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            assigned_queue: Some(queue.into()),
            ..Self::new(name)
        }
    }
}
