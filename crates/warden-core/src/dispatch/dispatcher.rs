//! Dispatcher - operation を resource の queue に載せて実行する
//!
//! # フロー
//! 1. `assign(resource)` で queue を決める（同じ resource は必ず同じ queue）
//! 2. `waiting` の CallReport を保存し、その queue の lane に job を送る
//! 3. lane が job を実行し、CallReport を終了状態にして `release(resource)`
//!
//! # 設計原則
//! - 排他は queue 単位の直列実行だけで実現する（ロックを持たない）
//! - キャンセルは協調的: 開始前なら実行せず、実行中なら conduit 経由で伝える

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::dispatch::calls::CallReportStore;
use crate::dispatch::executor::OperationExecutor;
use crate::dispatch::operation::Operation;
use crate::dispatch::worker::{CallHandle, InFlight, Job, LaneContext, WorkerPool};
use crate::domain::{CallId, CallReport, CallState, OperationOutcome};
use crate::error::{Result, WardenError};
use crate::observability::QueueLoad;
use crate::ports::{Clock, IdGenerator};
use crate::resources::ReservationCoordinator;

/// How often `wait` re-reads a call this dispatcher is not running.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Dispatcher {
    coordinator: ReservationCoordinator,
    calls: CallReportStore,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    lanes: HashMap<String, mpsc::UnboundedSender<Job>>,
    inflight: Arc<InFlight>,
    pool: Mutex<Option<WorkerPool>>,
}

impl Dispatcher {
    /// Registers every queue as healthy and spawns one lane per queue.
    #[instrument(skip_all, fields(lanes = queue_names.len()))]
    pub async fn start(
        queue_names: &[String],
        coordinator: ReservationCoordinator,
        executor: OperationExecutor,
        calls: CallReportStore,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        for name in queue_names {
            coordinator.queues().heartbeat(name).await?;
        }

        let inflight: Arc<InFlight> = Arc::new(Mutex::new(HashMap::new()));
        let mut lanes = HashMap::with_capacity(queue_names.len());
        let mut receivers = Vec::with_capacity(queue_names.len());
        for name in queue_names {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(name.clone(), tx);
            receivers.push((name.clone(), rx));
        }
        let ctx = Arc::new(LaneContext {
            executor,
            calls: calls.clone(),
            coordinator: coordinator.clone(),
            clock: Arc::clone(&clock),
            inflight: Arc::clone(&inflight),
        });
        let pool = WorkerPool::spawn(receivers, ctx);
        info!("dispatcher started");

        Ok(Self {
            coordinator,
            calls,
            clock,
            ids,
            lanes,
            inflight,
            pool: Mutex::new(Some(pool)),
        })
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues the operation and returns its `waiting` call report.
    pub async fn submit(&self, operation: Operation) -> Result<CallReport> {
        self.enqueue(operation, None).await
    }

    /// Queues the operation; the caller polls or waits on the call report.
    pub async fn dispatch(&self, operation: Operation) -> OperationOutcome {
        match self.submit(operation).await {
            Ok(report) => OperationOutcome::Postponed(report),
            Err(err) => OperationOutcome::Failed(err),
        }
    }

    /// Queues the operation and waits for it to run.
    pub async fn run(&self, operation: Operation) -> OperationOutcome {
        let (tx, rx) = oneshot::channel();
        let report = match self.enqueue(operation, Some(tx)).await {
            Ok(report) => report,
            Err(err) => return OperationOutcome::Failed(err),
        };
        match rx.await {
            Ok(Ok(value)) => OperationOutcome::Completed(value),
            Ok(Err(err)) => OperationOutcome::Failed(err),
            Err(_) => OperationOutcome::Failed(WardenError::LaneClosed { queue: report.queue }),
        }
    }

    #[instrument(skip_all, fields(operation = operation.name()))]
    async fn enqueue(
        &self,
        operation: Operation,
        reply: Option<oneshot::Sender<Result<Value>>>,
    ) -> Result<CallReport> {
        let resource = operation.resource();
        let queue = self.coordinator.assign(&resource).await?;
        let Some(lane) = self.lanes.get(&queue) else {
            self.abandon(&resource).await;
            return Err(WardenError::LaneClosed { queue });
        };

        let report = CallReport::waiting(
            self.ids.generate_call_id(),
            operation.name(),
            &resource,
            &queue,
            self.clock.now(),
        );
        if let Err(err) = self.calls.insert(&report).await {
            self.abandon(&resource).await;
            return Err(err);
        }

        let handle = Arc::new(CallHandle::new());
        self.inflight
            .lock()
            .await
            .insert(report.call_id, Arc::clone(&handle));
        let job = Job {
            call_id: report.call_id,
            resource: resource.clone(),
            operation,
            handle,
            reply,
        };
        if lane.send(job).is_err() {
            // lane は shutdown 済み
            self.inflight.lock().await.remove(&report.call_id);
            let closed = WardenError::LaneClosed {
                queue: queue.clone(),
            };
            self.calls
                .finish(&report.call_id, CallState::Error, &Err(closed), None, self.clock.now())
                .await?;
            self.abandon(&resource).await;
            return Err(WardenError::LaneClosed { queue });
        }

        info!(call_id = %report.call_id, %queue, %resource, "call queued");
        Ok(report)
    }

    async fn abandon(&self, resource: &str) {
        if let Err(err) = self.coordinator.release(resource).await {
            warn!(error = %err, resource, "failed to release reservation");
        }
    }

    pub async fn call_report(&self, call_id: &CallId) -> Result<CallReport> {
        self.calls.get(call_id).await
    }

    /// Latest progress the plugin reported, live while the call runs.
    pub async fn progress(&self, call_id: &CallId) -> Result<Option<Value>> {
        let handle = self.inflight.lock().await.get(call_id).cloned();
        if let Some(progress) = handle.and_then(|h| h.progress()) {
            return Ok(Some(progress));
        }
        Ok(self.calls.get(call_id).await?.progress)
    }

    /// Requests cancellation. A call that has not started yet is never
    /// started; a running one sees `cancelled()` on its conduit.
    #[instrument(skip(self))]
    pub async fn cancel(&self, call_id: &CallId) -> Result<()> {
        let report = self.calls.get(call_id).await?;
        if report.state.is_terminal() {
            return Ok(());
        }
        if let Some(handle) = self.inflight.lock().await.get(call_id) {
            handle.cancel.cancel();
            info!(state = ?report.state, "cancel requested");
        }
        Ok(())
    }

    /// Waits until the call reaches a terminal state.
    pub async fn wait(&self, call_id: &CallId, timeout: Duration) -> Result<CallReport> {
        match tokio::time::timeout(timeout, self.wait_terminal(call_id)).await {
            Ok(report) => report,
            Err(_) => Err(WardenError::OperationTimedOut(timeout)),
        }
    }

    async fn wait_terminal(&self, call_id: &CallId) -> Result<CallReport> {
        loop {
            let handle = self.inflight.lock().await.get(call_id).cloned();
            let report = self.calls.get(call_id).await?;
            if report.state.is_terminal() {
                return Ok(report);
            }
            match handle {
                Some(handle) => {
                    let mut done = handle.done.subscribe();
                    let _ = done.wait_for(|finished| *finished).await;
                }
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    pub async fn load(&self) -> Result<Vec<QueueLoad>> {
        self.coordinator.queues().load_snapshot().await
    }

    /// Stops every lane and marks its queue missing so no new resource is
    /// reserved on it.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let Some(pool) = self.pool.lock().await.take() else {
            return Ok(());
        };
        pool.shutdown_and_join().await;
        for name in self.queue_names() {
            self.coordinator.queues().mark_missing(&name).await?;
        }
        info!("dispatcher stopped");
        Ok(())
    }
}
