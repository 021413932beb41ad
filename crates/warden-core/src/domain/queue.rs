//! Worker queue record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One worker queue and the number of resources currently pinned to it.
///
/// `missing_since == None` means the queue's worker is healthy. Only healthy
/// queues receive new reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(rename = "_id")]
    pub name: String,

    #[serde(default)]
    pub num_reservations: u64,

    #[serde(default)]
    pub missing_since: Option<DateTime<Utc>>,
}

impl Queue {
    pub const COLLECTION: &'static str = "available_queues";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_reservations: 0,
            missing_since: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.missing_since.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_shape_uses_id_field() {
        let value = serde_json::to_value(Queue::new("worker-1")).unwrap();

        assert_eq!(
            value,
            json!({"_id": "worker-1", "num_reservations": 0, "missing_since": null})
        );
    }

    #[test]
    fn absent_fields_default_to_healthy_and_empty() {
        let queue: Queue = serde_json::from_value(json!({"_id": "worker-2"})).unwrap();

        assert!(queue.is_healthy());
        assert_eq!(queue.num_reservations, 0);
    }
}
