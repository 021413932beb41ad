//! Observability - logging setup and status views.

use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::Queue;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines (for production).
    Json,
    /// Human readable (for development).
    #[default]
    Pretty,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// level. Later calls, or a subscriber installed elsewhere, make this a no-op.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Subscriber for tests: output is captured per test, `RUST_LOG` applies.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Status view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLoad {
    pub queue: String,
    pub num_reservations: u64,
    pub healthy: bool,
}

impl From<&Queue> for QueueLoad {
    fn from(queue: &Queue) -> Self {
        Self {
            queue: queue.name.clone(),
            num_reservations: queue.num_reservations,
            healthy: queue.is_healthy(),
        }
    }
}
