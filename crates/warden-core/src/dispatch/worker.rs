use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::dispatch::calls::CallReportStore;
use crate::dispatch::executor::OperationExecutor;
use crate::dispatch::operation::Operation;
use crate::domain::{CallId, CallState};
use crate::error::{Result, WardenError};
use crate::impls::{CancelFlag, ScopedConduit};
use crate::ports::Clock;
use crate::resources::ReservationCoordinator;

/// In-flight state of one call, shared by the dispatcher and the lane running it.
pub(crate) struct CallHandle {
    pub(crate) cancel: CancelFlag,
    /// Set once the lane has built the call's conduit.
    pub(crate) conduit: OnceLock<Arc<ScopedConduit>>,
    /// Flips to `true` after the call report reached a terminal state.
    pub(crate) done: watch::Sender<bool>,
}

impl CallHandle {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            cancel: CancelFlag::new(),
            conduit: OnceLock::new(),
            done,
        }
    }

    pub(crate) fn progress(&self) -> Option<Value> {
        self.conduit.get().and_then(|c| c.last_progress())
    }
}

pub(crate) type InFlight = Mutex<HashMap<CallId, Arc<CallHandle>>>;

pub(crate) struct Job {
    pub(crate) call_id: CallId,
    pub(crate) resource: String,
    pub(crate) operation: Operation,
    pub(crate) handle: Arc<CallHandle>,
    pub(crate) reply: Option<oneshot::Sender<Result<Value>>>,
}

/// Everything a lane needs to run a job to completion.
pub(crate) struct LaneContext {
    pub(crate) executor: OperationExecutor,
    pub(crate) calls: CallReportStore,
    pub(crate) coordinator: ReservationCoordinator,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) inflight: Arc<InFlight>,
}

/// Worker pool handle: one lane per queue.
/// - lane は自分の queue の job を 1 件ずつ実行する
/// - `shutdown_and_join()` で全 lane の終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        lanes: Vec<(String, mpsc::UnboundedReceiver<Job>)>,
        ctx: Arc<LaneContext>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(lanes.len());
        for (queue, jobs) in lanes {
            let ctx = Arc::clone(&ctx);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(lane_loop(queue, jobs, ctx, rx)));
        }

        Self { shutdown_tx, joins }
    }

    /// Stops every lane once its current job is done. Jobs still queued are
    /// not started; they end as canceled.
    pub fn request_shutdown(&self) {
        // ignore send error: lanes may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn lane_loop(
    queue: String,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    ctx: Arc<LaneContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            // 変更（または sender の drop）が入ったら次のループで判定
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            job = jobs.recv() => match job {
                Some(job) => run_job(&ctx, job).await,
                None => return,
            },
        }
    }

    jobs.close();
    let mut drained = 0usize;
    while let Some(job) = jobs.recv().await {
        job.handle.cancel.cancel();
        run_job(&ctx, job).await;
        drained += 1;
    }
    info!(queue = %queue, drained, "lane stopped");
}

#[instrument(skip_all, fields(call_id = %job.call_id, operation = job.operation.name()))]
async fn run_job(ctx: &LaneContext, job: Job) {
    let outcome = execute(ctx, &job).await;
    let state = match &outcome {
        Ok(_) => CallState::Finished,
        Err(_) if job.handle.cancel.is_cancelled() => CallState::Canceled,
        Err(_) => CallState::Error,
    };
    if let Err(err) = &outcome {
        warn!(error = %err, ?state, "call did not finish");
    }

    if let Err(err) = ctx
        .calls
        .finish(&job.call_id, state, &outcome, job.handle.progress(), ctx.clock.now())
        .await
    {
        warn!(error = %err, "failed to record call outcome");
    }
    if let Err(err) = ctx.coordinator.release(&job.resource).await {
        warn!(error = %err, resource = %job.resource, "failed to release reservation");
    }

    job.handle.done.send_replace(true);
    ctx.inflight.lock().await.remove(&job.call_id);
    if let Some(reply) = job.reply {
        // 呼び出し側が待つのをやめていても問題ない
        let _ = reply.send(outcome);
    }
}

async fn execute(ctx: &LaneContext, job: &Job) -> Result<Value> {
    if job.handle.cancel.is_cancelled() {
        return Err(WardenError::OperationCanceled {
            call_id: job.call_id.to_string(),
        });
    }
    ctx.calls.mark_running(&job.call_id, ctx.clock.now()).await?;
    let conduit = ctx
        .executor
        .conduit_for(&job.operation, job.handle.cancel.clone())
        .await?;
    let _ = job.handle.conduit.set(Arc::clone(&conduit));
    ctx.executor.execute(&job.operation, conduit).await
}
