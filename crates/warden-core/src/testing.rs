//! Test fixtures: in-memory store, fixed clock, counting mock plugins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::agent::ConsumerAgent;
use crate::dispatch::{CallReportStore, Dispatcher, OperationExecutor, PluginRegistry};
use crate::domain::{PluginReport, Repo};
use crate::impls::InMemoryDocumentStore;
use crate::observability::init_test_logging;
use crate::ports::plugin::{
    Binding, ContentHandler, ContentUnit, Distributor, Importer, PluginCallConfig, PluginError,
};
use crate::error::{Result as StoreResult, WardenError};
use crate::ports::store::{Criteria, Cursor, Document, DocumentStore, Filter, Update, Upserted};
use crate::ports::{Clock, Conduit, FixedClock, IdGenerator, UlidGenerator};
use crate::repo::{DistributorManager, ImporterManager, PublishManager, RepoManager, SyncManager};
use crate::resources::{QueueRegistry, ReservationCoordinator, ReservationTable};

pub fn store() -> Arc<dyn DocumentStore> {
    Arc::new(InMemoryDocumentStore::new())
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ))
}

pub fn coordinator(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> ReservationCoordinator {
    ReservationCoordinator::new(
        QueueRegistry::new(Arc::clone(&store), clock),
        ReservationTable::new(store),
    )
}

pub fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

/// Store whose `update` fails for one collection; everything else goes through.
pub struct UpdatesFail {
    inner: Arc<dyn DocumentStore>,
    collection: &'static str,
}

impl UpdatesFail {
    pub fn new(inner: Arc<dyn DocumentStore>, collection: &'static str) -> Self {
        Self { inner, collection }
    }
}

#[async_trait]
impl DocumentStore for UpdatesFail {
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        self.inner.find_one(collection, filter).await
    }

    async fn insert(&self, collection: &str, doc: Document) -> StoreResult<()> {
        self.inner.insert(collection, doc).await
    }

    async fn insert_if_absent(&self, collection: &str, doc: Document) -> StoreResult<Upserted> {
        self.inner.insert_if_absent(collection, doc).await
    }

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64> {
        if collection == self.collection {
            return Err(WardenError::Store(format!("{collection} is read-only")));
        }
        self.inner.update(collection, filter, update).await
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        self.inner.find_and_modify(collection, filter, update).await
    }

    async fn remove(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.remove(collection, filter).await
    }

    async fn query(&self, collection: &str, criteria: &Criteria) -> StoreResult<Cursor> {
        self.inner.query(collection, criteria).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn save(&self, collection: &str, doc: Document) -> StoreResult<()> {
        self.inner.save(collection, doc).await
    }
}

/// What a mock plugin does once called.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    /// Raise `PluginError::Failed`.
    Fail(String),
    /// Return a report flagged as unsuccessful.
    Unsuccessful(String),
    Panic,
}

/// Call counter shared by the mock plugins.
#[derive(Default)]
pub struct CallLog {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    last_config: Mutex<Option<PluginCallConfig>>,
    last_repo: Mutex<Option<String>>,
}

impl CallLog {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<PluginCallConfig> {
        self.last_config.lock().unwrap().clone()
    }

    pub fn last_repo(&self) -> Option<String> {
        self.last_repo.lock().unwrap().clone()
    }

    async fn run(
        &self,
        behavior: &Behavior,
        delay: Option<Duration>,
        repo: Option<&Repo>,
        conduit: &dyn Conduit,
        config: Option<&PluginCallConfig>,
    ) -> Result<PluginReport, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = config.cloned();
        *self.last_repo.lock().unwrap() = repo.map(|r| r.id.clone());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        conduit.update_progress(json!({"state": "started"}));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if conduit.cancelled() {
            return Err(PluginError::Canceled);
        }
        match behavior {
            Behavior::Succeed => Ok(PluginReport::success().with_summary(json!("ok"))),
            Behavior::Fail(reason) => Err(PluginError::Failed(reason.clone())),
            Behavior::Unsuccessful(reason) => Ok(PluginReport::failure(reason.clone())),
            Behavior::Panic => panic!("mock plugin panicked"),
        }
    }
}

macro_rules! mock_repo_plugin {
    ($name:ident) => {
        pub struct $name {
            pub calls_seen: CallLog,
            behavior: Behavior,
            delay: Option<Duration>,
        }

        impl $name {
            pub fn new() -> Self {
                Self::with_behavior(Behavior::Succeed)
            }

            pub fn with_behavior(behavior: Behavior) -> Self {
                Self {
                    calls_seen: CallLog::default(),
                    behavior,
                    delay: None,
                }
            }

            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.delay = Some(delay);
                self
            }
        }
    };
}

mock_repo_plugin!(MockDistributor);
mock_repo_plugin!(MockImporter);

#[async_trait]
impl Distributor for MockDistributor {
    async fn publish_repo(
        &self,
        repo: &Repo,
        conduit: &dyn Conduit,
        config: &PluginCallConfig,
    ) -> Result<PluginReport, PluginError> {
        self.calls_seen
            .run(&self.behavior, self.delay, Some(repo), conduit, Some(config))
            .await
    }
}

#[async_trait]
impl Importer for MockImporter {
    async fn sync_repo(
        &self,
        repo: &Repo,
        conduit: &dyn Conduit,
        config: &PluginCallConfig,
    ) -> Result<PluginReport, PluginError> {
        self.calls_seen
            .run(&self.behavior, self.delay, Some(repo), conduit, Some(config))
            .await
    }
}

/// Content handler that implements everything but `uninstall`.
pub struct MockHandler {
    pub calls_seen: CallLog,
    behavior: Behavior,
    seen: Mutex<Vec<(String, usize)>>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            calls_seen: CallLog::default(),
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// `(operation, number of items)` per call, in call order.
    pub fn seen(&self) -> Vec<(String, usize)> {
        self.seen.lock().unwrap().clone()
    }

    async fn record(
        &self,
        operation: &str,
        items: usize,
        conduit: &dyn Conduit,
    ) -> Result<PluginReport, PluginError> {
        self.seen.lock().unwrap().push((operation.to_string(), items));
        self.calls_seen.run(&self.behavior, None, None, conduit, None).await
    }
}

#[async_trait]
impl ContentHandler for MockHandler {
    async fn bind(
        &self,
        conduit: &dyn Conduit,
        bindings: &[Binding],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        self.record("bind", bindings.len(), conduit).await
    }

    async fn unbind(
        &self,
        conduit: &dyn Conduit,
        bindings: &[Binding],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        self.record("unbind", bindings.len(), conduit).await
    }

    async fn install(
        &self,
        conduit: &dyn Conduit,
        units: &[ContentUnit],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        self.record("install", units.len(), conduit).await
    }

    async fn update(
        &self,
        conduit: &dyn Conduit,
        units: &[ContentUnit],
        _options: &Document,
    ) -> Result<PluginReport, PluginError> {
        self.record("update", units.len(), conduit).await
    }

    async fn clean(&self, conduit: &dyn Conduit) -> Result<PluginReport, PluginError> {
        self.record("clean", 0, conduit).await
    }
}

/// Fully wired managers over one in-memory store.
///
/// Repositories `zoo` and `farm` each carry an auto-publish distributor `yum`
/// of type `mock-distributor`; `zoo` also has a `mock-importer`. Consumer `c1`
/// exists and the `rpm` content type is handled by `handler`.
pub struct Harness {
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<FixedClock>,
    pub ids: Arc<dyn IdGenerator>,
    pub coordinator: ReservationCoordinator,
    pub calls: CallReportStore,
    pub executor: OperationExecutor,
    pub distributor: Arc<MockDistributor>,
    pub importer: Arc<MockImporter>,
    pub handler: Arc<MockHandler>,
}

pub async fn harness(distributor: MockDistributor) -> Harness {
    init_test_logging();
    let store = store();
    let clock = fixed_clock();
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
    let distributor = Arc::new(distributor);
    let importer = Arc::new(MockImporter::new());
    let handler = Arc::new(MockHandler::new());

    let mut plugins = PluginRegistry::new();
    plugins
        .register_distributor("mock-distributor", distributor.clone())
        .unwrap();
    plugins.register_importer("mock-importer", importer.clone()).unwrap();
    plugins.register_handler("rpm", handler.clone()).unwrap();
    let plugins = Arc::new(plugins);

    let repos = RepoManager::new(Arc::clone(&store));
    let distributors = DistributorManager::new(Arc::clone(&store), Arc::clone(&plugins), Arc::clone(&ids));
    for repo_id in ["zoo", "farm"] {
        repos.create_repo(Repo::new(repo_id)).await.unwrap();
        distributors
            .add_distributor(repo_id, "mock-distributor", Document::new(), true, Some("yum"))
            .await
            .unwrap();
    }
    ImporterManager::new(Arc::clone(&store), Arc::clone(&plugins))
        .set_importer("zoo", "mock-importer", Document::new())
        .await
        .unwrap();
    let agent = ConsumerAgent::new(Arc::clone(&store), Arc::clone(&plugins));
    agent
        .register_consumer("c1", doc(json!({"arch": "x86_64"})))
        .await
        .unwrap();

    let executor = OperationExecutor::new(
        PublishManager::new(Arc::clone(&store), Arc::clone(&plugins), clock.clone(), Arc::clone(&ids)),
        SyncManager::new(Arc::clone(&store), Arc::clone(&plugins), clock.clone(), Arc::clone(&ids)),
        agent,
    );

    Harness {
        coordinator: coordinator(Arc::clone(&store), clock.clone()),
        calls: CallReportStore::new(Arc::clone(&store)),
        store,
        clock,
        ids,
        executor,
        distributor,
        importer,
        handler,
    }
}

impl Harness {
    /// Dispatcher serving `worker-0 .. worker-{lanes-1}`.
    pub async fn dispatcher(&self, lanes: usize) -> Dispatcher {
        let names: Vec<String> = (0..lanes).map(|i| format!("worker-{i}")).collect();
        Dispatcher::start(
            &names,
            self.coordinator.clone(),
            self.executor.clone(),
            self.calls.clone(),
            self.clock.clone(),
            Arc::clone(&self.ids),
        )
        .await
        .unwrap()
    }
}
