//! ReaperLoop - missing queue の回収
//!
//! # フロー
//! 1. `missing_since` が猶予期間より古い queue を探す
//! 2. queue を削除する（その queue に割り当てられた予約も一緒に消える）
//! 3. 次の resource は `assign` で健全な queue に割り当て直される

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::error::{Result, WardenError};
use crate::ports::Clock;
use crate::resources::QueueRegistry;

pub struct ReaperLoop {
    queues: QueueRegistry,
    clock: Arc<dyn Clock>,
    grace: Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(
        queues: QueueRegistry,
        clock: Arc<dyn Clock>,
        grace: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queues,
            clock,
            grace,
            // tokio::time::interval panics on zero
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Deletes every queue missing for longer than the grace period and
    /// returns their names.
    #[instrument(skip(self))]
    pub async fn reap_once(&self) -> Result<Vec<String>> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|_| WardenError::InvalidValue(vec!["workers.missing_grace_secs".to_string()]))?;
        let Some(cutoff) = self.clock.now().checked_sub_signed(grace) else {
            return Ok(Vec::new());
        };

        let mut reaped = Vec::new();
        for queue in self.queues.missing_before(cutoff).await? {
            self.queues.delete(&queue.name).await?;
            reaped.push(queue.name);
        }
        if !reaped.is_empty() {
            info!(count = reaped.len(), queues = ?reaped, "reaped missing queues");
        }
        Ok(reaped)
    }

    /// Reaps on every tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reap_once().await {
                        warn!(error = %err, "reap failed");
                    }
                }
            }
        }
        info!("reaper stopped");
    }
}
