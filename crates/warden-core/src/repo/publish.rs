//! PublishManager - distributor による repository の publish
//!
//! # フロー
//! 1. repository / distributor / plugin の存在確認
//! 2. `publish_in_progress` を false → true に条件付き更新（取れなければ PublishInProgress）
//! 3. plugin と後処理を 1 つの task で実行（panic も失敗として扱う）
//! 4. 成否に関わらず `publish_in_progress` を戻し `last_publish` を記録し、履歴を 1 件追加
//!    （呼び出し側が待つのをやめても task は最後まで走る）
//! 5. plugin の失敗は repository 付きのエラーに包んで返す

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::dispatch::PluginRegistry;
use crate::domain::{OperationResult, PluginReport, RepoDistributor};
use crate::error::{Result, WardenError};
use crate::impls::ScopedConduit;
use crate::ports::plugin::{PluginCallConfig, PluginCapability, PluginError};
use crate::ports::store::{Document, DocumentStore, Filter, Update};
use crate::ports::{Clock, Conduit, IdGenerator};
use crate::repo::{DistributorManager, Ledger, RepoManager, history, run_claimed};

const IN_PROGRESS: &str = "publish_in_progress";

#[derive(Clone)]
pub struct PublishManager {
    store: Arc<dyn DocumentStore>,
    plugins: Arc<PluginRegistry>,
    repos: RepoManager,
    distributors: DistributorManager,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl PublishManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        plugins: Arc<PluginRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            repos: RepoManager::new(Arc::clone(&store)),
            distributors: DistributorManager::new(
                Arc::clone(&store),
                Arc::clone(&plugins),
                Arc::clone(&ids),
            ),
            store,
            plugins,
            clock,
            ids,
        }
    }

    /// Publishes with a conduit nobody observes.
    pub async fn publish(
        &self,
        repo_id: &str,
        distributor_id: &str,
        overrides: Document,
    ) -> Result<PluginReport> {
        self.publish_with(
            repo_id,
            distributor_id,
            overrides,
            Arc::new(ScopedConduit::detached()),
        )
        .await
    }

    #[instrument(skip(self, overrides, conduit))]
    pub async fn publish_with(
        &self,
        repo_id: &str,
        distributor_id: &str,
        overrides: Document,
        conduit: Arc<dyn Conduit>,
    ) -> Result<PluginReport> {
        let repo = self.repos.get_repo(repo_id).await?;
        let distributor = self
            .distributors
            .find_distributor(repo_id, distributor_id)
            .await?
            .ok_or_else(|| WardenError::NoDistributor {
                repo_id: repo_id.to_string(),
                distributor_id: distributor_id.to_string(),
            })?;
        let type_id = distributor.distributor_type_id.clone();
        let plugin = self.plugins.distributor(&type_id).ok_or_else(|| {
            WardenError::MissingDistributorPlugin {
                repo_id: repo_id.to_string(),
                distributor_type_id: type_id.clone(),
            }
        })?;
        let config = PluginCallConfig::new(
            self.plugins
                .default_config(PluginCapability::Distributor, &type_id),
            distributor.config.clone(),
            overrides,
        );

        let claimed = self
            .store
            .find_and_modify(
                RepoDistributor::COLLECTION,
                &Filter::by_id(&distributor.key).eq(IN_PROGRESS, false),
                &Update::new().set(IN_PROGRESS, true),
            )
            .await?;
        if claimed.is_none() {
            return Err(WardenError::PublishInProgress {
                repo_id: repo_id.to_string(),
                distributor_id: distributor_id.to_string(),
            });
        }

        info!(distributor_type_id = %type_id, "publish started");
        let ledger = Ledger {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            state: (RepoDistributor::COLLECTION, distributor.key.clone()),
            in_progress: IN_PROGRESS,
            stamp: "last_publish",
            history: OperationResult::PUBLISH_COLLECTION,
            target: (repo_id.to_string(), distributor_id.to_string(), type_id),
        };
        let (outcome, recorded) = run_claimed(
            async move {
                plugin
                    .publish_repo(&repo, conduit.as_ref(), &config)
                    .await
            },
            ledger,
        )
        .await;

        let failed = |source| WardenError::PublishFailed {
            repo_id: repo_id.to_string(),
            distributor_id: distributor_id.to_string(),
            source,
        };
        match (outcome, recorded) {
            (Err(source), _) => {
                warn!(error = %source, "publish failed");
                Err(failed(source))
            }
            (Ok(_), Err(err)) => Err(failed(PluginError::Failed(format!(
                "publish finished but its outcome was not recorded: {err}"
            )))),
            (Ok(report), Ok(())) => {
                if report.succeeded {
                    info!("publish finished");
                } else {
                    warn!(summary = %report.summary, "distributor reported an unsuccessful publish");
                }
                Ok(report)
            }
        }
    }

    /// Publishes every auto-publish distributor of the repository.
    ///
    /// All of them are attempted; failures are collected into a single
    /// `AutoPublishFailed`. An unknown repository publishes nothing.
    #[instrument(skip(self))]
    pub async fn auto_publish_for_repo(&self, repo_id: &str) -> Result<Vec<(String, PluginReport)>> {
        if self.repos.find_repo(repo_id).await?.is_none() {
            return Ok(Vec::new());
        }
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for distributor in self.distributors.auto_distributors(repo_id).await? {
            match self
                .publish(repo_id, &distributor.id, Document::new())
                .await
            {
                Ok(report) => reports.push((distributor.id, report)),
                Err(err) => failures.push((distributor.id, err)),
            }
        }
        if failures.is_empty() {
            Ok(reports)
        } else {
            Err(WardenError::AutoPublishFailed {
                repo_id: repo_id.to_string(),
                failures,
            })
        }
    }

    /// When the distributor last finished a publish; `None` if it never did.
    pub async fn last_publish(
        &self,
        repo_id: &str,
        distributor_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .distributors
            .get_distributor(repo_id, distributor_id)
            .await?
            .last_publish)
    }

    pub async fn publish_history(
        &self,
        repo_id: &str,
        distributor_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<OperationResult>> {
        self.repos.get_repo(repo_id).await?;
        history(
            self.store.as_ref(),
            OperationResult::PUBLISH_COLLECTION,
            repo_id,
            Some(distributor_id),
            limit,
        )
        .await
    }
}
