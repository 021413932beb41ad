//! Repo - repository records and the publish / sync flows that act on them.

pub mod cud;
pub mod distributors;
pub mod importers;
pub mod publish;
pub mod sync;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{OperationResult, PluginReport};
use crate::error::{Result, WardenError};
use crate::ports::plugin::PluginError;
use crate::ports::store::{Criteria, DocumentStore, Filter, Update, from_document, to_document};
use crate::ports::{Clock, IdGenerator};

pub use self::cud::RepoManager;
pub use self::distributors::DistributorManager;
pub use self::importers::ImporterManager;
pub use self::publish::PublishManager;
pub use self::sync::SyncManager;

/// Runs a plugin call on its own task so a panicking plugin surfaces as an
/// error instead of unwinding through the caller.
pub(crate) async fn run_plugin<F>(call: F) -> Result<PluginReport, PluginError>
where
    F: Future<Output = Result<PluginReport, PluginError>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(outcome) => outcome,
        Err(join) if join.is_panic() => Err(PluginError::Failed("plugin panicked".to_string())),
        Err(join) => Err(PluginError::Failed(join.to_string())),
    }
}

/// Where a claimed publish or sync records how it ended.
pub(crate) struct Ledger {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    /// Collection and `_id` of the record carrying the in-progress flag.
    pub(crate) state: (&'static str, String),
    pub(crate) in_progress: &'static str,
    /// Timestamp field stamped when the call ends (`last_publish` / `last_sync`).
    pub(crate) stamp: &'static str,
    pub(crate) history: &'static str,
    /// `(repo_id, target_id, target_type_id)` of the history entry.
    pub(crate) target: (String, String, String),
}

/// Plugin outcome and whether its bookkeeping was stored.
pub(crate) type Settled = (Result<PluginReport, PluginError>, Result<()>);

impl Ledger {
    /// Clears the in-progress flag, stamps the end time and appends the
    /// history entry. Both writes are attempted; the first failure is returned.
    async fn record(
        &self,
        started: DateTime<Utc>,
        completed: DateTime<Utc>,
        outcome: &Result<PluginReport, PluginError>,
    ) -> Result<()> {
        let reset = self.reset(completed).await;
        if let Err(err) = &reset {
            warn!(error = %err, record = %self.state.1, "failed to clear in-progress flag");
        }
        let appended = self.append(started, completed, outcome).await;
        if let Err(err) = &appended {
            warn!(error = %err, record = %self.state.1, "failed to append history entry");
        }
        reset.and(appended)
    }

    async fn reset(&self, completed: DateTime<Utc>) -> Result<()> {
        let (collection, key) = &self.state;
        self.store
            .update(
                collection,
                &Filter::by_id(key.as_str()),
                &Update::new()
                    .set(self.in_progress, false)
                    .set(self.stamp, serde_json::to_value(completed)?),
            )
            .await?;
        Ok(())
    }

    async fn append(
        &self,
        started: DateTime<Utc>,
        completed: DateTime<Utc>,
        outcome: &Result<PluginReport, PluginError>,
    ) -> Result<()> {
        let (repo_id, target_id, type_id) = &self.target;
        let target = (repo_id.as_str(), target_id.as_str(), type_id.as_str());
        let id = self.ids.generate_entry_id();
        let entry = match outcome {
            Ok(report) => OperationResult::from_report(id, target, started, completed, report),
            Err(err) => OperationResult::from_error(id, target, started, completed, err.to_string()),
        };
        self.store.insert(self.history, to_document(&entry)?).await
    }
}

/// Runs a plugin call whose in-progress flag is already claimed.
///
/// The call and its bookkeeping share one spawned task, so the flag is
/// cleared and the history written even when the caller stops waiting.
pub(crate) async fn run_claimed<F>(call: F, ledger: Ledger) -> Settled
where
    F: Future<Output = Result<PluginReport, PluginError>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let started = ledger.clock.now();
        let outcome = run_plugin(call).await;
        let completed = ledger.clock.now();
        let recorded = ledger.record(started, completed, &outcome).await;
        (outcome, recorded)
    });
    match task.await {
        Ok(settled) => settled,
        Err(join) => (
            Err(PluginError::Failed(join.to_string())),
            Err(WardenError::Store(format!("bookkeeping task ended early: {join}"))),
        ),
    }
}

/// History entries for a repository (optionally one target), newest first.
pub(crate) async fn history(
    store: &dyn DocumentStore,
    collection: &str,
    repo_id: &str,
    target_id: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<OperationResult>> {
    let mut filter = Filter::all().eq("repo_id", repo_id);
    if let Some(target_id) = target_id {
        filter = filter.eq("target_id", target_id);
    }
    let mut entries: Vec<OperationResult> = store
        .query(collection, &Criteria::new(filter))
        .await?
        .map(from_document)
        .collect::<Result<_>>()?;
    // timestamps are compared parsed; their string forms do not sort reliably
    entries.sort_by(|a, b| b.started.cmp(&a.started).then_with(|| b.id.cmp(&a.id)));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    Ok(entries)
}
