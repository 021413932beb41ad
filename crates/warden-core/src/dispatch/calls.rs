//! CallReportStore - dispatch された operation の記録
//!
//! 状態遷移は条件付き update で行うので、終了済みの report が
//! 書き戻されることはない。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{CallId, CallReport, CallState, ErrorDocument};
use crate::error::{Result, WardenError};
use crate::ports::store::{Criteria, DocumentStore, Filter, Update, from_document, to_document};

#[derive(Clone)]
pub struct CallReportStore {
    store: Arc<dyn DocumentStore>,
}

impl CallReportStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, report: &CallReport) -> Result<()> {
        self.store
            .insert(CallReport::COLLECTION, to_document(report)?)
            .await
    }

    pub async fn find(&self, call_id: &CallId) -> Result<Option<CallReport>> {
        self.store
            .find_one(CallReport::COLLECTION, &Filter::by_id(call_id.key()))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn get(&self, call_id: &CallId) -> Result<CallReport> {
        self.find(call_id)
            .await?
            .ok_or_else(|| WardenError::missing("call", call_id.to_string()))
    }

    /// waiting → running. Returns `false` when the call already left `waiting`.
    pub async fn mark_running(&self, call_id: &CallId, at: DateTime<Utc>) -> Result<bool> {
        let modified = self
            .store
            .find_and_modify(
                CallReport::COLLECTION,
                &Filter::by_id(call_id.key()).eq("state", state_value(CallState::Waiting)?),
                &Update::new()
                    .set("state", state_value(CallState::Running)?)
                    .set("started_at", serde_json::to_value(at)?),
            )
            .await?;
        Ok(modified.is_some())
    }

    /// Records the terminal state of a call that has not finished yet.
    pub async fn finish(
        &self,
        call_id: &CallId,
        state: CallState,
        outcome: &Result<Value>,
        progress: Option<Value>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut update = Update::new()
            .set("state", state_value(state)?)
            .set("finished_at", serde_json::to_value(at)?);
        match outcome {
            Ok(result) => update = update.set("result", result.clone()),
            Err(err) => {
                let error: ErrorDocument = err.to_document();
                update = update.set("error", serde_json::to_value(error)?);
            }
        }
        if let Some(progress) = progress {
            update = update.set("progress", progress);
        }
        let open = vec![state_value(CallState::Waiting)?, state_value(CallState::Running)?];
        let filter = Filter::by_id(call_id.key()).is_in("state", open);
        self.store
            .update(CallReport::COLLECTION, &filter, &update)
            .await?;
        Ok(())
    }

    /// Calls in `state`, oldest submission first.
    pub async fn by_state(&self, state: CallState) -> Result<Vec<CallReport>> {
        let criteria = Criteria::new(Filter::all().eq("state", state_value(state)?));
        let mut reports: Vec<CallReport> = self
            .store
            .query(CallReport::COLLECTION, &criteria)
            .await?
            .map(from_document)
            .collect::<Result<_>>()?;
        reports.sort_by_key(|r| (r.submitted_at, r.call_id));
        Ok(reports)
    }
}

fn state_value(state: CallState) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{Clock, IdGenerator, UlidGenerator};
    use crate::testing::{fixed_clock, store};
    use serde_json::json;

    fn setup() -> (CallReportStore, CallReport) {
        let clock = fixed_clock();
        let ids = UlidGenerator::new(clock.clone());
        let report = CallReport::waiting(
            ids.generate_call_id(),
            "publish",
            "repository:zoo",
            "worker-0",
            clock.now(),
        );
        (CallReportStore::new(store()), report)
    }

    #[tokio::test]
    async fn lifecycle_waiting_running_finished() {
        let (calls, report) = setup();
        calls.insert(&report).await.unwrap();
        let at = report.submitted_at;

        assert!(calls.mark_running(&report.call_id, at).await.unwrap());
        assert!(!calls.mark_running(&report.call_id, at).await.unwrap());
        calls
            .finish(
                &report.call_id,
                CallState::Finished,
                &Ok(json!({"succeeded": true})),
                Some(json!({"step": 3})),
                at,
            )
            .await
            .unwrap();

        let stored = calls.get(&report.call_id).await.unwrap();
        assert_eq!(stored.state, CallState::Finished);
        assert_eq!(stored.started_at, Some(at));
        assert_eq!(stored.result, Some(json!({"succeeded": true})));
        assert_eq!(stored.progress, Some(json!({"step": 3})));
    }

    #[tokio::test]
    async fn error_outcome_is_stored_as_document() {
        let (calls, report) = setup();
        calls.insert(&report).await.unwrap();

        calls
            .finish(
                &report.call_id,
                CallState::Error,
                &Err(WardenError::NoAvailableQueues),
                None,
                report.submitted_at,
            )
            .await
            .unwrap();

        let stored = calls.get(&report.call_id).await.unwrap();
        assert_eq!(stored.state, CallState::Error);
        assert_eq!(stored.error.map(|e| e.code), Some("WRD0020".to_string()));
    }

    #[tokio::test]
    async fn terminal_state_is_never_overwritten() {
        let (calls, report) = setup();
        calls.insert(&report).await.unwrap();
        let at = report.submitted_at;

        calls
            .finish(&report.call_id, CallState::Canceled, &Ok(Value::Null), None, at)
            .await
            .unwrap();
        calls
            .finish(&report.call_id, CallState::Finished, &Ok(json!(1)), None, at)
            .await
            .unwrap();

        assert_eq!(calls.get(&report.call_id).await.unwrap().state, CallState::Canceled);
        assert_eq!(calls.by_state(CallState::Canceled).await.unwrap().len(), 1);
        assert!(calls.by_state(CallState::Waiting).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_call_is_missing() {
        let (calls, report) = setup();

        assert!(matches!(
            calls.get(&report.call_id).await,
            Err(WardenError::MissingResource(_))
        ));
    }
}
