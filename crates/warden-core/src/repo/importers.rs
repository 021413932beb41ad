//! ImporterManager - repository ごとに 1 つの importer を管理

use std::sync::Arc;

use tracing::info;

use crate::dispatch::PluginRegistry;
use crate::domain::RepoImporter;
use crate::error::{Result, WardenError};
use crate::ports::plugin::PluginCapability;
use crate::ports::store::{Document, DocumentStore, Filter, from_document, to_document};
use crate::repo::RepoManager;

#[derive(Clone)]
pub struct ImporterManager {
    store: Arc<dyn DocumentStore>,
    repos: RepoManager,
    plugins: Arc<PluginRegistry>,
}

impl ImporterManager {
    pub fn new(store: Arc<dyn DocumentStore>, plugins: Arc<PluginRegistry>) -> Self {
        Self {
            repos: RepoManager::new(Arc::clone(&store)),
            store,
            plugins,
        }
    }

    /// Sets (or replaces) the repository's importer.
    pub async fn set_importer(
        &self,
        repo_id: &str,
        importer_type_id: &str,
        config: Document,
    ) -> Result<RepoImporter> {
        self.repos.get_repo(repo_id).await?;
        if !self.plugins.has(PluginCapability::Importer, importer_type_id) {
            return Err(WardenError::InvalidValue(vec!["importer_type_id".to_string()]));
        }
        let importer = RepoImporter::new(repo_id, importer_type_id, config);
        self.store
            .save(RepoImporter::COLLECTION, to_document(&importer)?)
            .await?;
        info!(repo_id, importer_type_id, "importer set");
        Ok(importer)
    }

    pub async fn find_importer(&self, repo_id: &str) -> Result<Option<RepoImporter>> {
        self.store
            .find_one(RepoImporter::COLLECTION, &Filter::by_id(repo_id))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn get_importer(&self, repo_id: &str) -> Result<RepoImporter> {
        self.find_importer(repo_id)
            .await?
            .ok_or_else(|| WardenError::missing("importer", repo_id))
    }

    pub async fn remove_importer(&self, repo_id: &str) -> Result<()> {
        let removed = self
            .store
            .remove(RepoImporter::COLLECTION, &Filter::by_id(repo_id))
            .await?;
        if removed == 0 {
            return Err(WardenError::missing("importer", repo_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Repo;
    use crate::testing::{MockImporter, doc, store};
    use serde_json::json;

    #[tokio::test]
    async fn set_replaces_and_remove_clears() {
        let store = store();
        RepoManager::new(Arc::clone(&store))
            .create_repo(Repo::new("zoo"))
            .await
            .unwrap();
        let mut plugins = PluginRegistry::new();
        plugins
            .register_importer("mock-importer", Arc::new(MockImporter::new()))
            .unwrap();
        let importers = ImporterManager::new(store, Arc::new(plugins));

        importers
            .set_importer("zoo", "mock-importer", doc(json!({"feed": "a"})))
            .await
            .unwrap();
        importers
            .set_importer("zoo", "mock-importer", doc(json!({"feed": "b"})))
            .await
            .unwrap();

        assert_eq!(importers.get_importer("zoo").await.unwrap().config["feed"], json!("b"));
        importers.remove_importer("zoo").await.unwrap();
        assert!(importers.find_importer("zoo").await.unwrap().is_none());
        assert!(importers.set_importer("zoo", "nope", Document::new()).await.is_err());
    }
}
