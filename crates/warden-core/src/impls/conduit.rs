//! ScopedConduit - 1 回のプラグイン呼び出しに紐づく Conduit 実装

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::watch;

use crate::ports::Conduit;
use crate::ports::store::Document;

/// Shared cancellation flag. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Conduit handed to a plugin for the duration of one call.
///
/// Progress is published on a watch channel so observers only ever see the
/// latest report.
pub struct ScopedConduit {
    progress: watch::Sender<Option<Value>>,
    cancel: CancelFlag,
    consumer_config: Document,
}

impl ScopedConduit {
    pub fn new(cancel: CancelFlag, consumer_config: Document) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            progress,
            cancel,
            consumer_config,
        }
    }

    /// A conduit nobody cancels or observes.
    pub fn detached() -> Self {
        Self::new(CancelFlag::new(), Document::new())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Value>> {
        self.progress.subscribe()
    }

    pub fn last_progress(&self) -> Option<Value> {
        self.progress.borrow().clone()
    }
}

impl Conduit for ScopedConduit {
    fn update_progress(&self, report: Value) {
        // send_replace: 受信側がいなくても値を保持する
        self.progress.send_replace(Some(report));
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn consumer_config(&self) -> Document {
        self.consumer_config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_only_latest_progress() {
        let conduit = ScopedConduit::detached();
        let rx = conduit.subscribe();

        conduit.update_progress(json!({"step": 1}));
        conduit.update_progress(json!({"step": 2}));

        assert_eq!(conduit.last_progress(), Some(json!({"step": 2})));
        assert_eq!(*rx.borrow(), Some(json!({"step": 2})));
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let conduit = ScopedConduit::new(flag.clone(), Document::new());

        assert!(!conduit.cancelled());
        flag.cancel();
        assert!(conduit.cancelled());
    }
}
