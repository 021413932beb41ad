use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Duration;
use tracing::info;

use warden_core::app::AppBuilder;
use warden_core::config::WardenConfig;
use warden_core::dispatch::Operation;
use warden_core::domain::{OperationOutcome, PluginReport, Repo};
use warden_core::observability::init_logging;
use warden_core::ports::store::Document;
use warden_core::ports::{Conduit, Distributor, PluginCallConfig, PluginError};

#[derive(Debug, Default, Deserialize)]
struct HelloConfig {
    #[serde(default)]
    relative_url: Option<String>,
}

/// 最初の n 回は失敗する distributor
struct HelloDistributor {
    remaining_failures: AtomicU32,
}

impl HelloDistributor {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Distributor for HelloDistributor {
    async fn publish_repo(
        &self,
        repo: &Repo,
        conduit: &dyn Conduit,
        config: &PluginCallConfig,
    ) -> Result<PluginReport, PluginError> {
        let cfg: HelloConfig = serde_json::from_value(config.flatten().into())
            .map_err(|e| PluginError::Failed(format!("config decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(PluginError::Failed(format!("intentional failure (left={left})")));
        }

        conduit.update_progress(json!({"step": "publishing"}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        if conduit.cancelled() {
            return Err(PluginError::Canceled);
        }

        let url = cfg.relative_url.unwrap_or_else(|| repo.id.clone());
        Ok(PluginReport::success().with_summary(json!({"published": url})))
    }
}

fn print_outcome(label: &str, outcome: &OperationOutcome) -> Result<(), Box<dyn Error>> {
    println!(
        "{label}: http={} {}",
        outcome.http_status(),
        serde_json::to_string_pretty(&outcome.to_json()?)?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // (A) 設定とログ
    let config = WardenConfig::from_json_str(r#"{"workers": {"count": 2}}"#)?;
    init_logging(config.logging.format);

    // (B) App を組み立てる（期待する plugin が無ければここで失敗）
    let app = AppBuilder::new(config)
        .register_distributor("hello", Arc::new(HelloDistributor::new(1)))?
        .expect_plugins(&["hello"])
        .build()?;

    // (C) repository と distributor
    app.repos
        .create_repo(Repo::new("zoo").with_display_name("Zoo"))
        .await?;
    let mut distributor_config = Document::new();
    distributor_config.insert("relative_url".to_string(), json!("pub/zoo"));
    app.distributors
        .add_distributor("zoo", "hello", distributor_config, true, Some("hello"))
        .await?;

    // (D) queue ごとの lane を起動
    let dispatcher = app.start_dispatcher().await?;
    info!(queues = ?dispatcher.queue_names(), "dispatcher ready");

    let publish = Operation::Publish {
        repo_id: "zoo".to_string(),
        distributor_id: "hello".to_string(),
        overrides: Document::new(),
    };

    // (E) 同期実行: 1 回目は plugin が失敗する
    let outcome = dispatcher.run(publish.clone()).await;
    print_outcome("run", &outcome)?;

    // (F) 非同期実行: waiting の call report が返り、完了を待つ
    let outcome = dispatcher.dispatch(publish).await;
    print_outcome("dispatch", &outcome)?;
    if let OperationOutcome::Postponed(report) = outcome {
        let done = dispatcher.wait(&report.call_id, Duration::from_secs(5)).await?;
        println!("final call report: {}", serde_json::to_string_pretty(&done)?);
    }

    for entry in app.publish.publish_history("zoo", "hello", None).await? {
        println!("history: {:?} {}", entry.result, entry.summary);
    }
    println!("queues: {}", serde_json::to_string(&dispatcher.load().await?)?);

    // (G) lane を止め、queue を missing にする
    dispatcher.shutdown().await?;
    Ok(())
}
