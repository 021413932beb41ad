//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::agent::ConsumerAgent;
use crate::app::reaper_loop::ReaperLoop;
use crate::auth::{Authenticator, SenderKeys, StaticSenderKeys};
use crate::config::WardenConfig;
use crate::dispatch::{CallReportStore, Dispatcher, OperationExecutor, PluginRegistry};
use crate::error::{Result, WardenError};
use crate::impls::InMemoryDocumentStore;
use crate::ports::plugin::{ContentHandler, Distributor, Importer, PluginCapability};
use crate::ports::store::{Document, DocumentStore};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::repo::{DistributorManager, ImporterManager, PublishManager, RepoManager, SyncManager};
use crate::resources::{QueueRegistry, ReservationCoordinator, ReservationTable};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .register_distributor("yum", Arc::new(YumDistributor))?
///     .expect_plugins(&["yum"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 設定は build() 時に検証する
/// - expect_plugins() で期待される type_id を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct AppBuilder {
    config: WardenConfig,
    store: Option<Arc<dyn DocumentStore>>,
    clock: Option<Arc<dyn Clock>>,
    sender_keys: Option<Arc<dyn SenderKeys>>,
    plugins: PluginRegistry,
    expected_plugins: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing plugin types: {0:?}. These plugins were expected but not registered.")]
    MissingPluginTypes(Vec<String>),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[source] WardenError),
}

impl AppBuilder {
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            sender_keys: None,
            plugins: PluginRegistry::new(),
            expected_plugins: None,
        }
    }

    /// Shared document store. Defaults to a fresh in-memory store.
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Keys of the agents whose messages are validated. Defaults to none.
    pub fn sender_keys(mut self, keys: Arc<dyn SenderKeys>) -> Self {
        self.sender_keys = Some(keys);
        self
    }

    pub fn register_importer(mut self, type_id: &str, importer: Arc<dyn Importer>) -> Result<Self> {
        self.plugins.register_importer(type_id, importer)?;
        Ok(self)
    }

    pub fn register_distributor(
        mut self,
        type_id: &str,
        distributor: Arc<dyn Distributor>,
    ) -> Result<Self> {
        self.plugins.register_distributor(type_id, distributor)?;
        Ok(self)
    }

    pub fn register_handler(mut self, type_id: &str, handler: Arc<dyn ContentHandler>) -> Result<Self> {
        self.plugins.register_handler(type_id, handler)?;
        Ok(self)
    }

    pub fn with_default_config(
        mut self,
        capability: PluginCapability,
        type_id: &str,
        config: Document,
    ) -> Self {
        self.plugins.set_default_config(capability, type_id, config);
        self
    }

    /// 期待される type_id のリストを設定
    pub fn expect_plugins(mut self, type_ids: &[&str]) -> Self {
        self.expected_plugins = Some(type_ids.iter().map(|t| t.to_string()).collect());
        self
    }

    /// # 検証
    /// - 設定が不正なら BuildError::InvalidConfig
    /// - expect_plugins() の type_id が未登録なら BuildError::MissingPluginTypes
    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;
        if let Some(expected) = &self.expected_plugins {
            let registered = self.plugins.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingPluginTypes(missing));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryDocumentStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let sender_keys = self
            .sender_keys
            .unwrap_or_else(|| Arc::new(StaticSenderKeys::new()));
        let plugins = Arc::new(self.plugins);

        let publish = PublishManager::new(
            Arc::clone(&store),
            Arc::clone(&plugins),
            Arc::clone(&clock),
            Arc::clone(&ids),
        );
        let sync = SyncManager::new(
            Arc::clone(&store),
            Arc::clone(&plugins),
            Arc::clone(&clock),
            Arc::clone(&ids),
        );
        let agent = ConsumerAgent::new(Arc::clone(&store), Arc::clone(&plugins));
        let executor = OperationExecutor::new(publish.clone(), sync.clone(), agent.clone());
        let coordinator = ReservationCoordinator::new(
            QueueRegistry::new(Arc::clone(&store), Arc::clone(&clock)),
            ReservationTable::new(Arc::clone(&store)),
        );

        Ok(App {
            authenticator: Authenticator::new(&self.config.messaging, sender_keys),
            repos: RepoManager::new(Arc::clone(&store)),
            distributors: DistributorManager::new(
                Arc::clone(&store),
                Arc::clone(&plugins),
                Arc::clone(&ids),
            ),
            importers: ImporterManager::new(Arc::clone(&store), Arc::clone(&plugins)),
            calls: CallReportStore::new(Arc::clone(&store)),
            config: self.config,
            store,
            clock,
            ids,
            plugins,
            publish,
            sync,
            agent,
            coordinator,
            executor,
        })
    }
}

/// App はアプリケーションのランタイム
///
/// 全ての manager は同じ document store を共有する。
pub struct App {
    pub config: WardenConfig,
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub plugins: Arc<PluginRegistry>,
    pub repos: RepoManager,
    pub distributors: DistributorManager,
    pub importers: ImporterManager,
    pub publish: PublishManager,
    pub sync: SyncManager,
    pub agent: ConsumerAgent,
    pub coordinator: ReservationCoordinator,
    pub calls: CallReportStore,
    pub executor: OperationExecutor,
    pub authenticator: Authenticator,
}

impl App {
    /// Starts one lane per configured queue (`workers.count`).
    pub async fn start_dispatcher(&self) -> Result<Dispatcher> {
        Dispatcher::start(
            &self.config.workers.queue_names(),
            self.coordinator.clone(),
            self.executor.clone(),
            self.calls.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.ids),
        )
        .await
    }

    pub fn reaper(&self) -> ReaperLoop {
        ReaperLoop::new(
            self.coordinator.queues().clone(),
            Arc::clone(&self.clock),
            self.config.workers.missing_grace(),
            self.config.workers.reap_interval(),
        )
    }
}
