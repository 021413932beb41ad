//! DistributorManager - repository に紐づく distributor の管理

use std::sync::Arc;

use tracing::info;

use crate::dispatch::PluginRegistry;
use crate::domain::{Repo, RepoDistributor};
use crate::error::{Result, WardenError};
use crate::ports::IdGenerator;
use crate::ports::plugin::PluginCapability;
use crate::ports::store::{Criteria, Document, DocumentStore, Filter, from_document, to_document};
use crate::repo::RepoManager;

#[derive(Clone)]
pub struct DistributorManager {
    store: Arc<dyn DocumentStore>,
    repos: RepoManager,
    plugins: Arc<PluginRegistry>,
    ids: Arc<dyn IdGenerator>,
}

impl DistributorManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        plugins: Arc<PluginRegistry>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            repos: RepoManager::new(Arc::clone(&store)),
            store,
            plugins,
            ids,
        }
    }

    /// Attaches a distributor of `distributor_type_id` to the repository.
    ///
    /// Without an explicit id one is generated. An existing distributor with
    /// the same id is replaced.
    pub async fn add_distributor(
        &self,
        repo_id: &str,
        distributor_type_id: &str,
        config: Document,
        auto_publish: bool,
        distributor_id: Option<&str>,
    ) -> Result<RepoDistributor> {
        self.repos.get_repo(repo_id).await?;
        if !self.plugins.has(PluginCapability::Distributor, distributor_type_id) {
            return Err(WardenError::InvalidValue(vec![
                "distributor_type_id".to_string(),
            ]));
        }
        let id = match distributor_id {
            Some(id) if Repo::is_valid_id(id) => id.to_string(),
            Some(_) => return Err(WardenError::InvalidValue(vec!["distributor_id".to_string()])),
            None => self.ids.generate_key(),
        };

        let distributor =
            RepoDistributor::new(repo_id, id, distributor_type_id, config, auto_publish);
        self.store
            .save(RepoDistributor::COLLECTION, to_document(&distributor)?)
            .await?;
        info!(repo_id, distributor_id = %distributor.id, distributor_type_id, "distributor added");
        Ok(distributor)
    }

    pub async fn find_distributor(
        &self,
        repo_id: &str,
        distributor_id: &str,
    ) -> Result<Option<RepoDistributor>> {
        self.store
            .find_one(
                RepoDistributor::COLLECTION,
                &Filter::by_id(RepoDistributor::key_for(repo_id, distributor_id)),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn get_distributor(
        &self,
        repo_id: &str,
        distributor_id: &str,
    ) -> Result<RepoDistributor> {
        self.find_distributor(repo_id, distributor_id)
            .await?
            .ok_or_else(|| WardenError::missing("distributor", distributor_id))
    }

    pub async fn remove_distributor(&self, repo_id: &str, distributor_id: &str) -> Result<()> {
        let removed = self
            .store
            .remove(
                RepoDistributor::COLLECTION,
                &Filter::by_id(RepoDistributor::key_for(repo_id, distributor_id)),
            )
            .await?;
        if removed == 0 {
            return Err(WardenError::missing("distributor", distributor_id));
        }
        info!(repo_id, distributor_id, "distributor removed");
        Ok(())
    }

    pub async fn distributors(&self, repo_id: &str) -> Result<Vec<RepoDistributor>> {
        self.query(Filter::all().eq("repo_id", repo_id)).await
    }

    /// Distributors flagged to publish automatically after a sync.
    pub async fn auto_distributors(&self, repo_id: &str) -> Result<Vec<RepoDistributor>> {
        self.query(Filter::all().eq("repo_id", repo_id).eq("auto_publish", true))
            .await
    }

    async fn query(&self, filter: Filter) -> Result<Vec<RepoDistributor>> {
        self.store
            .query(RepoDistributor::COLLECTION, &Criteria::new(filter))
            .await?
            .map(from_document)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::testing::{MockDistributor, store};

    async fn manager() -> DistributorManager {
        let store = store();
        let repos = RepoManager::new(Arc::clone(&store));
        for id in ["repo-1", "repo-2", "repo-3"] {
            repos.create_repo(Repo::new(id)).await.unwrap();
        }
        let mut plugins = PluginRegistry::new();
        plugins
            .register_distributor("mock-distributor", Arc::new(MockDistributor::new()))
            .unwrap();
        DistributorManager::new(
            store,
            Arc::new(plugins),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    #[tokio::test]
    async fn auto_distributors_filters_by_repo_and_flag() {
        let dists = manager().await;
        for (repo, id, auto) in [
            ("repo-1", "dist-1", true),
            ("repo-1", "dist-2", true),
            ("repo-1", "dist-3", false),
            ("repo-2", "dist-1", true),
            ("repo-3", "dist-1", false),
        ] {
            dists
                .add_distributor(repo, "mock-distributor", Document::new(), auto, Some(id))
                .await
                .unwrap();
        }

        let repo1: Vec<String> = dists
            .auto_distributors("repo-1")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();

        assert_eq!(repo1, vec!["dist-1", "dist-2"]);
        assert_eq!(dists.auto_distributors("repo-2").await.unwrap().len(), 1);
        assert!(dists.auto_distributors("repo-3").await.unwrap().is_empty());
        assert_eq!(dists.distributors("repo-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_type_or_repo_is_rejected() {
        let dists = manager().await;

        let bad_type = dists
            .add_distributor("repo-1", "nope", Document::new(), false, None)
            .await
            .unwrap_err();
        let bad_repo = dists
            .add_distributor("ghost", "mock-distributor", Document::new(), false, None)
            .await
            .unwrap_err();

        assert!(matches!(bad_type, WardenError::InvalidValue(p) if p == vec!["distributor_type_id"]));
        assert!(matches!(bad_repo, WardenError::MissingResource(_)));
    }

    #[tokio::test]
    async fn generated_ids_are_used_when_none_given() {
        let dists = manager().await;

        let added = dists
            .add_distributor("repo-1", "mock-distributor", Document::new(), false, None)
            .await
            .unwrap();

        assert!(!added.id.is_empty());
        let fetched = dists.get_distributor("repo-1", &added.id).await.unwrap();
        assert_eq!(fetched, added);
        dists.remove_distributor("repo-1", &added.id).await.unwrap();
        assert!(dists.find_distributor("repo-1", &added.id).await.unwrap().is_none());
    }
}
