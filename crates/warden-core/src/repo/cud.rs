//! RepoManager - repository の作成・取得・削除

use std::sync::Arc;

use tracing::info;

use crate::domain::{Repo, RepoDistributor, RepoImporter};
use crate::error::{Result, WardenError};
use crate::ports::store::{Criteria, DocumentStore, Filter, from_document, to_document};

#[derive(Clone)]
pub struct RepoManager {
    store: Arc<dyn DocumentStore>,
}

impl RepoManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores a new repository. Ids must be unique and well formed.
    pub async fn create_repo(&self, repo: Repo) -> Result<Repo> {
        if !Repo::is_valid_id(&repo.id) {
            return Err(WardenError::InvalidValue(vec!["id".to_string()]));
        }
        self.store
            .insert(Repo::COLLECTION, to_document(&repo)?)
            .await?;
        info!(repo_id = %repo.id, "repository created");
        Ok(repo)
    }

    pub async fn find_repo(&self, repo_id: &str) -> Result<Option<Repo>> {
        self.store
            .find_one(Repo::COLLECTION, &Filter::by_id(repo_id))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn get_repo(&self, repo_id: &str) -> Result<Repo> {
        self.find_repo(repo_id)
            .await?
            .ok_or_else(|| WardenError::missing("repository", repo_id))
    }

    /// Removes the repository together with its importer and distributors.
    pub async fn delete_repo(&self, repo_id: &str) -> Result<()> {
        let removed = self
            .store
            .remove(Repo::COLLECTION, &Filter::by_id(repo_id))
            .await?;
        if removed == 0 {
            return Err(WardenError::missing("repository", repo_id));
        }
        self.store
            .remove(
                RepoDistributor::COLLECTION,
                &Filter::all().eq("repo_id", repo_id),
            )
            .await?;
        self.store
            .remove(RepoImporter::COLLECTION, &Filter::by_id(repo_id))
            .await?;
        info!(repo_id, "repository deleted");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Repo>> {
        self.store
            .query(Repo::COLLECTION, &Criteria::new(Filter::all()))
            .await?
            .map(from_document)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::store;

    #[tokio::test]
    async fn create_then_get() {
        let repos = RepoManager::new(store());

        repos
            .create_repo(Repo::new("zoo").with_display_name("Zoo"))
            .await
            .unwrap();

        let repo = repos.get_repo("zoo").await.unwrap();
        assert_eq!(repo.display_name.as_deref(), Some("Zoo"));
        assert_eq!(repos.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_and_invalid_ids_are_rejected() {
        let repos = RepoManager::new(store());
        repos.create_repo(Repo::new("zoo")).await.unwrap();

        let dup = repos.create_repo(Repo::new("zoo")).await.unwrap_err();
        let bad = repos.create_repo(Repo::new("no spaces")).await.unwrap_err();

        assert!(matches!(dup, WardenError::DuplicateResource(id) if id == "zoo"));
        assert!(matches!(bad, WardenError::InvalidValue(props) if props == vec!["id"]));
    }

    #[tokio::test]
    async fn missing_repo_carries_its_id() {
        let repos = RepoManager::new(store());

        let err = repos.get_repo("not-here").await.unwrap_err();

        assert_eq!(err.repo_id(), Some("not-here"));
        assert_eq!(err.http_status(), 404);
        assert!(repos.delete_repo("not-here").await.is_err());
    }
}
