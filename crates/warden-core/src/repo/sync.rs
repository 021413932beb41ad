//! SyncManager - importer による repository の sync
//!
//! publish と同じ流れ: 存在確認 → `sync_in_progress` の条件付き取得 →
//! plugin 実行 → 必ず状態を戻して `last_sync` を記録 → 履歴追加。
//! plugin と後処理は同じ task で走るので、呼び出し側が待つのをやめても状態は戻る。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::dispatch::PluginRegistry;
use crate::domain::{OperationResult, PluginReport, RepoImporter};
use crate::error::{Result, WardenError};
use crate::impls::ScopedConduit;
use crate::ports::plugin::{PluginCallConfig, PluginCapability, PluginError};
use crate::ports::store::{Document, DocumentStore, Filter, Update};
use crate::ports::{Clock, Conduit, IdGenerator};
use crate::repo::{ImporterManager, Ledger, RepoManager, history, run_claimed};

const IN_PROGRESS: &str = "sync_in_progress";

#[derive(Clone)]
pub struct SyncManager {
    store: Arc<dyn DocumentStore>,
    plugins: Arc<PluginRegistry>,
    repos: RepoManager,
    importers: ImporterManager,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        plugins: Arc<PluginRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            repos: RepoManager::new(Arc::clone(&store)),
            importers: ImporterManager::new(Arc::clone(&store), Arc::clone(&plugins)),
            store,
            plugins,
            clock,
            ids,
        }
    }

    pub async fn sync(&self, repo_id: &str, overrides: Document) -> Result<PluginReport> {
        self.sync_with(repo_id, overrides, Arc::new(ScopedConduit::detached()))
            .await
    }

    #[instrument(skip(self, overrides, conduit))]
    pub async fn sync_with(
        &self,
        repo_id: &str,
        overrides: Document,
        conduit: Arc<dyn Conduit>,
    ) -> Result<PluginReport> {
        let repo = self.repos.get_repo(repo_id).await?;
        let importer = self
            .importers
            .find_importer(repo_id)
            .await?
            .ok_or_else(|| WardenError::NoImporter {
                repo_id: repo_id.to_string(),
            })?;
        let type_id = importer.importer_type_id.clone();
        let plugin = self
            .plugins
            .importer(&type_id)
            .ok_or_else(|| WardenError::MissingImporterPlugin {
                repo_id: repo_id.to_string(),
                importer_type_id: type_id.clone(),
            })?;
        let config = PluginCallConfig::new(
            self.plugins.default_config(PluginCapability::Importer, &type_id),
            importer.config.clone(),
            overrides,
        );

        let claimed = self
            .store
            .find_and_modify(
                RepoImporter::COLLECTION,
                &Filter::by_id(repo_id).eq(IN_PROGRESS, false),
                &Update::new().set(IN_PROGRESS, true),
            )
            .await?;
        if claimed.is_none() {
            return Err(WardenError::SyncInProgress {
                repo_id: repo_id.to_string(),
            });
        }

        info!(importer_type_id = %type_id, "sync started");
        let ledger = Ledger {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            state: (RepoImporter::COLLECTION, repo_id.to_string()),
            in_progress: IN_PROGRESS,
            stamp: "last_sync",
            history: OperationResult::SYNC_COLLECTION,
            target: (repo_id.to_string(), type_id.clone(), type_id),
        };
        let (outcome, recorded) = run_claimed(
            async move { plugin.sync_repo(&repo, conduit.as_ref(), &config).await },
            ledger,
        )
        .await;

        let failed = |source| WardenError::SyncFailed {
            repo_id: repo_id.to_string(),
            source,
        };
        match (outcome, recorded) {
            (Err(source), _) => {
                warn!(error = %source, "sync failed");
                Err(failed(source))
            }
            (Ok(_), Err(err)) => Err(failed(PluginError::Failed(format!(
                "sync finished but its outcome was not recorded: {err}"
            )))),
            (Ok(report), Ok(())) => Ok(report),
        }
    }

    /// When the repository last finished a sync; `None` if it never did.
    pub async fn last_sync(&self, repo_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.importers.get_importer(repo_id).await?.last_sync)
    }

    pub async fn sync_history(&self, repo_id: &str, limit: Option<usize>) -> Result<Vec<OperationResult>> {
        self.repos.get_repo(repo_id).await?;
        history(
            self.store.as_ref(),
            OperationResult::SYNC_COLLECTION,
            repo_id,
            None,
            limit,
        )
        .await
    }
}
