//! Conduit port - プラグインから呼び出し元への窓口
//!
//! A conduit is scoped to one plugin call. Plugins report progress through
//! it and poll `cancelled()` at safe points; cancellation is cooperative.

use serde_json::Value;

use crate::ports::store::Document;

pub trait Conduit: Send + Sync {
    /// Replaces the last progress report of the running call.
    fn update_progress(&self, report: Value);

    fn cancelled(&self) -> bool;

    /// Configuration of the consumer the call runs for (empty for repository work).
    fn consumer_config(&self) -> Document;
}
