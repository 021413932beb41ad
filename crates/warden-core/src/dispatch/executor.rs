//! OperationExecutor - Operation を各 manager に振り分けて実行する

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::instrument;

use crate::agent::ConsumerAgent;
use crate::dispatch::operation::Operation;
use crate::error::Result;
use crate::impls::{CancelFlag, ScopedConduit};
use crate::ports::store::Document;
use crate::repo::{PublishManager, SyncManager};

#[derive(Clone)]
pub struct OperationExecutor {
    publish: PublishManager,
    sync: SyncManager,
    agent: ConsumerAgent,
}

impl OperationExecutor {
    pub fn new(publish: PublishManager, sync: SyncManager, agent: ConsumerAgent) -> Self {
        Self {
            publish,
            sync,
            agent,
        }
    }

    /// Conduit for one run of `operation`. Consumer operations carry the
    /// consumer's configuration, which also checks the consumer exists.
    pub async fn conduit_for(
        &self,
        operation: &Operation,
        cancel: CancelFlag,
    ) -> Result<Arc<ScopedConduit>> {
        match operation.consumer_id() {
            Some(consumer_id) => self.agent.conduit(consumer_id, cancel).await,
            None => Ok(Arc::new(ScopedConduit::new(cancel, Document::new()))),
        }
    }

    /// Runs the operation and returns its report in plain mapping form.
    #[instrument(skip_all, fields(operation = operation.name()))]
    pub async fn execute(&self, operation: &Operation, conduit: Arc<ScopedConduit>) -> Result<Value> {
        let report = match operation {
            Operation::Sync { repo_id, overrides } => {
                self.sync
                    .sync_with(repo_id, overrides.clone(), conduit)
                    .await?
            }
            Operation::Publish {
                repo_id,
                distributor_id,
                overrides,
            } => {
                self.publish
                    .publish_with(repo_id, distributor_id, overrides.clone(), conduit)
                    .await?
            }
            Operation::AutoPublish { repo_id } => {
                let reports = self.publish.auto_publish_for_repo(repo_id).await?;
                let mut by_distributor = Map::new();
                for (distributor_id, report) in reports {
                    by_distributor.insert(distributor_id, report.dict());
                }
                return Ok(Value::Object(by_distributor));
            }
            Operation::Bind {
                consumer_id,
                bindings,
                options,
            } => {
                self.agent
                    .bind(conduit, consumer_id, bindings.clone(), options.clone())
                    .await?
            }
            Operation::Unbind {
                consumer_id,
                bindings,
                options,
            } => {
                self.agent
                    .unbind(conduit, consumer_id, bindings.clone(), options.clone())
                    .await?
            }
            Operation::Install {
                consumer_id,
                units,
                options,
            } => {
                self.agent
                    .install(conduit, consumer_id, units.clone(), options.clone())
                    .await?
            }
            Operation::Update {
                consumer_id,
                units,
                options,
            } => {
                self.agent
                    .update(conduit, consumer_id, units.clone(), options.clone())
                    .await?
            }
            Operation::Uninstall {
                consumer_id,
                units,
                options,
            } => {
                self.agent
                    .uninstall(conduit, consumer_id, units.clone(), options.clone())
                    .await?
            }
            Operation::Clean { consumer_id } => self.agent.clean(conduit, consumer_id).await?,
        };
        Ok(report.dict())
    }
}
