//! ConsumerAgent - consumer 上のコンテンツ操作を content handler に振り分ける
//!
//! # フロー
//! 1. consumer の存在確認
//! 2. 対象を type_id ごとにまとめ、全 type の handler を先に解決（欠けていれば何も実行しない）
//! 3. type_id の昇順に handler を 1 つずつ呼ぶ
//! 4. type ごとの report を `{type_id: report.dict()}` にまとめて返す
//!
//! handler の失敗はその type の失敗として記録し、残りの type は続行する。
//! キャンセルされた場合は残りを実行せずにエラーを返す。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::dispatch::PluginRegistry;
use crate::domain::{Consumer, PluginReport, Repo};
use crate::error::{Result, WardenError};
use crate::impls::{CancelFlag, ScopedConduit};
use crate::ports::plugin::{Binding, ContentHandler, ContentUnit, PluginError};
use crate::ports::store::{Document, DocumentStore, Filter, from_document, to_document};
use crate::ports::Conduit;
use crate::repo::run_plugin;

/// The items handed to one handler in one call.
enum Batch {
    Bind(Vec<Binding>),
    Unbind(Vec<Binding>),
    Install(Vec<ContentUnit>),
    Update(Vec<ContentUnit>),
    Uninstall(Vec<ContentUnit>),
    Clean,
}

impl Batch {
    async fn invoke(
        self,
        handler: Arc<dyn ContentHandler>,
        conduit: Arc<dyn Conduit>,
        options: Document,
    ) -> Result<PluginReport, PluginError> {
        let conduit = conduit.as_ref();
        match self {
            Batch::Bind(items) => handler.bind(conduit, &items, &options).await,
            Batch::Unbind(items) => handler.unbind(conduit, &items, &options).await,
            Batch::Install(items) => handler.install(conduit, &items, &options).await,
            Batch::Update(items) => handler.update(conduit, &items, &options).await,
            Batch::Uninstall(items) => handler.uninstall(conduit, &items, &options).await,
            Batch::Clean => handler.clean(conduit).await,
        }
    }
}

fn group_by_type<T>(items: Vec<T>, type_of: fn(&T) -> &str) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(type_of(&item).to_string()).or_default().push(item);
    }
    groups
}

#[derive(Clone)]
pub struct ConsumerAgent {
    store: Arc<dyn DocumentStore>,
    plugins: Arc<PluginRegistry>,
}

impl ConsumerAgent {
    pub fn new(store: Arc<dyn DocumentStore>, plugins: Arc<PluginRegistry>) -> Self {
        Self { store, plugins }
    }

    /// Registers (or replaces) a consumer and its handler configuration.
    pub async fn register_consumer(&self, consumer_id: &str, config: Document) -> Result<Consumer> {
        if !Repo::is_valid_id(consumer_id) {
            return Err(WardenError::InvalidValue(vec!["consumer_id".to_string()]));
        }
        let consumer = Consumer::new(consumer_id, config);
        self.store
            .save(Consumer::COLLECTION, to_document(&consumer)?)
            .await?;
        info!(consumer_id, "consumer registered");
        Ok(consumer)
    }

    pub async fn get_consumer(&self, consumer_id: &str) -> Result<Consumer> {
        self.store
            .find_one(Consumer::COLLECTION, &Filter::by_id(consumer_id))
            .await?
            .map(from_document)
            .transpose()?
            .ok_or_else(|| WardenError::missing("consumer", consumer_id))
    }

    pub async fn consumer_config(&self, consumer_id: &str) -> Result<Document> {
        Ok(self.get_consumer(consumer_id).await?.config)
    }

    /// Conduit for one operation on the consumer, carrying its configuration.
    pub async fn conduit(&self, consumer_id: &str, cancel: CancelFlag) -> Result<Arc<ScopedConduit>> {
        let config = self.consumer_config(consumer_id).await?;
        Ok(Arc::new(ScopedConduit::new(cancel, config)))
    }

    pub async fn bind(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        bindings: Vec<Binding>,
        options: Document,
    ) -> Result<PluginReport> {
        let batches = group_by_type(bindings, |b| b.type_id.as_str())
            .into_iter()
            .map(|(type_id, items)| (type_id, Batch::Bind(items)))
            .collect();
        self.run(conduit, consumer_id, "bind", batches, options).await
    }

    pub async fn unbind(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        bindings: Vec<Binding>,
        options: Document,
    ) -> Result<PluginReport> {
        let batches = group_by_type(bindings, |b| b.type_id.as_str())
            .into_iter()
            .map(|(type_id, items)| (type_id, Batch::Unbind(items)))
            .collect();
        self.run(conduit, consumer_id, "unbind", batches, options).await
    }

    pub async fn install(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        units: Vec<ContentUnit>,
        options: Document,
    ) -> Result<PluginReport> {
        let batches = group_by_type(units, |u| u.type_id.as_str())
            .into_iter()
            .map(|(type_id, items)| (type_id, Batch::Install(items)))
            .collect();
        self.run(conduit, consumer_id, "install", batches, options).await
    }

    pub async fn update(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        units: Vec<ContentUnit>,
        options: Document,
    ) -> Result<PluginReport> {
        let batches = group_by_type(units, |u| u.type_id.as_str())
            .into_iter()
            .map(|(type_id, items)| (type_id, Batch::Update(items)))
            .collect();
        self.run(conduit, consumer_id, "update", batches, options).await
    }

    pub async fn uninstall(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        units: Vec<ContentUnit>,
        options: Document,
    ) -> Result<PluginReport> {
        let batches = group_by_type(units, |u| u.type_id.as_str())
            .into_iter()
            .map(|(type_id, items)| (type_id, Batch::Uninstall(items)))
            .collect();
        self.run(conduit, consumer_id, "uninstall", batches, options).await
    }

    /// Asks every registered handler to clean up after the consumer.
    /// Handlers without a clean step are skipped.
    pub async fn clean(&self, conduit: Arc<dyn Conduit>, consumer_id: &str) -> Result<PluginReport> {
        let batches = self
            .plugins
            .handler_types()
            .into_iter()
            .map(|type_id| (type_id, Batch::Clean))
            .collect();
        self.run(conduit, consumer_id, "clean", batches, Document::new())
            .await
    }

    #[instrument(skip(self, conduit, batches, options), fields(types = batches.len()))]
    async fn run(
        &self,
        conduit: Arc<dyn Conduit>,
        consumer_id: &str,
        operation: &'static str,
        batches: BTreeMap<String, Batch>,
        options: Document,
    ) -> Result<PluginReport> {
        self.get_consumer(consumer_id).await?;
        let mut resolved = Vec::with_capacity(batches.len());
        for (type_id, batch) in batches {
            let handler = self.plugins.require_handler(&type_id)?;
            resolved.push((type_id, handler, batch));
        }

        let mut details = Map::new();
        let mut failed = 0usize;
        for (type_id, handler, batch) in resolved {
            if conduit.cancelled() {
                return Err(WardenError::ConsumerOperationFailed {
                    consumer_id: consumer_id.to_string(),
                    operation,
                    source: PluginError::Canceled,
                });
            }
            let call = batch.invoke(handler, Arc::clone(&conduit), options.clone());
            match run_plugin(call).await {
                Ok(report) => {
                    if !report.succeeded {
                        failed += 1;
                    }
                    details.insert(type_id, report.dict());
                }
                Err(PluginError::Unimplemented(_)) if operation == "clean" => {}
                Err(PluginError::Unimplemented(op)) => {
                    return Err(WardenError::NotImplemented(format!("{op} of {type_id} content")));
                }
                Err(PluginError::Canceled) => {
                    return Err(WardenError::ConsumerOperationFailed {
                        consumer_id: consumer_id.to_string(),
                        operation,
                        source: PluginError::Canceled,
                    });
                }
                Err(PluginError::Failed(reason)) => {
                    warn!(type_id = %type_id, %reason, "content handler failed");
                    failed += 1;
                    details.insert(type_id, PluginReport::failure(reason).dict());
                }
            }
        }

        info!(failed, "consumer operation finished");
        let total = details.len();
        Ok(PluginReport {
            succeeded: failed == 0,
            summary: json!({"types": total, "failed": failed}),
            details: Value::Object(details),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behavior, MockHandler, doc, store};

    struct Fixture {
        agent: ConsumerAgent,
        rpm: Arc<MockHandler>,
        erratum: Arc<MockHandler>,
    }

    async fn fixture(erratum: MockHandler) -> Fixture {
        let rpm = Arc::new(MockHandler::new());
        let erratum = Arc::new(erratum);
        let mut plugins = PluginRegistry::new();
        plugins.register_handler("rpm", rpm.clone()).unwrap();
        plugins.register_handler("erratum", erratum.clone()).unwrap();
        let agent = ConsumerAgent::new(store(), Arc::new(plugins));
        agent
            .register_consumer("c1", doc(json!({"server": "warden.example.com"})))
            .await
            .unwrap();
        Fixture {
            agent,
            rpm,
            erratum,
        }
    }

    fn unit(type_id: &str, name: &str) -> ContentUnit {
        ContentUnit {
            type_id: type_id.to_string(),
            unit_key: json!({"name": name}),
        }
    }

    fn detached() -> Arc<dyn Conduit> {
        Arc::new(ScopedConduit::detached())
    }

    #[tokio::test]
    async fn install_groups_units_by_type() {
        let f = fixture(MockHandler::new()).await;
        let units = vec![unit("rpm", "zsh"), unit("erratum", "RHSA-1"), unit("rpm", "vim")];

        let report = f.agent.install(detached(), "c1", units, Document::new()).await.unwrap();

        assert!(report.succeeded);
        assert_eq!(f.rpm.seen(), vec![("install".to_string(), 2)]);
        assert_eq!(f.erratum.seen(), vec![("install".to_string(), 1)]);
        assert_eq!(report.details["rpm"]["succeeded"], json!(true));
        assert_eq!(report.details["erratum"]["succeeded"], json!(true));
    }

    #[tokio::test]
    async fn one_failing_type_does_not_stop_the_others() {
        let f = fixture(MockHandler::with_behavior(Behavior::Fail("gpg check".into()))).await;
        let units = vec![unit("erratum", "RHSA-1"), unit("rpm", "zsh")];

        let report = f.agent.update(detached(), "c1", units, Document::new()).await.unwrap();

        assert!(!report.succeeded);
        assert_eq!(report.summary, json!({"types": 2, "failed": 1}));
        assert_eq!(report.details["erratum"]["summary"], json!("gpg check"));
        assert_eq!(f.rpm.seen().len(), 1);
    }

    #[tokio::test]
    async fn unknown_type_fails_before_anything_runs() {
        let f = fixture(MockHandler::new()).await;
        let units = vec![unit("rpm", "zsh"), unit("puppet_module", "stdlib")];

        let err = f
            .agent
            .install(detached(), "c1", units, Document::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WardenError::MissingPlugin { type_id, .. } if type_id == "puppet_module"));
        assert!(f.rpm.seen().is_empty());
    }

    #[tokio::test]
    async fn unsupported_operation_is_not_implemented() {
        let f = fixture(MockHandler::new()).await;

        let err = f
            .agent
            .uninstall(detached(), "c1", vec![unit("rpm", "zsh")], Document::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WardenError::NotImplemented(_)));
        assert_eq!(err.http_status(), 501);
    }

    #[tokio::test]
    async fn bind_passes_consumer_config_through_the_conduit() {
        let f = fixture(MockHandler::new()).await;
        let conduit = f.agent.conduit("c1", CancelFlag::new()).await.unwrap();
        let binding = Binding {
            type_id: "rpm".to_string(),
            repo_id: "zoo".to_string(),
            details: Value::Null,
        };

        let report = f
            .agent
            .bind(conduit.clone(), "c1", vec![binding], Document::new())
            .await
            .unwrap();

        assert!(report.succeeded);
        assert_eq!(conduit.consumer_config(), doc(json!({"server": "warden.example.com"})));
        assert_eq!(conduit.last_progress(), Some(json!({"state": "started"})));
    }

    #[tokio::test]
    async fn clean_visits_every_handler() {
        let f = fixture(MockHandler::new()).await;

        let report = f.agent.clean(detached(), "c1").await.unwrap();

        assert!(report.succeeded);
        assert_eq!(f.rpm.seen(), vec![("clean".to_string(), 0)]);
        assert_eq!(f.erratum.seen(), vec![("clean".to_string(), 0)]);
    }

    #[tokio::test]
    async fn canceled_before_start_runs_nothing() {
        let f = fixture(MockHandler::new()).await;
        let cancel = CancelFlag::new();
        let conduit = f.agent.conduit("c1", cancel.clone()).await.unwrap();
        cancel.cancel();

        let err = f
            .agent
            .install(conduit, "c1", vec![unit("rpm", "zsh")], Document::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WardenError::ConsumerOperationFailed { operation: "install", .. }
        ));
        assert!(f.rpm.seen().is_empty());
    }

    #[tokio::test]
    async fn unknown_consumer_is_missing() {
        let f = fixture(MockHandler::new()).await;

        let err = f.agent.clean(detached(), "ghost").await.unwrap_err();

        assert!(matches!(err, WardenError::MissingResource(_)));
        assert!(f.agent.conduit("ghost", CancelFlag::new()).await.is_err());
    }
}
