//! QueueRegistry - worker queue の登録と負荷カウンタ
//!
//! Counters are only ever changed with single-document atomic updates; the
//! registry never reads, modifies and writes back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{Queue, ResourceReservation};
use crate::error::{Result, WardenError};
use crate::observability::QueueLoad;
use crate::ports::store::{
    Criteria, Cursor, DocumentStore, Filter, SortOrder, Update, from_document, to_document,
};
use crate::ports::Clock;

const COUNT: &str = "num_reservations";
const MISSING_SINCE: &str = "missing_since";

/// Queues lazily decoded from a store cursor.
///
/// Finite and single-pass: iterate again by calling `list_available` again.
pub struct QueueCursor {
    inner: Cursor,
}

impl Iterator for QueueCursor {
    type Item = Result<Queue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(from_document)
    }
}

#[derive(Clone)]
pub struct QueueRegistry {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn does_not_exist(name: &str) -> WardenError {
        WardenError::DoesNotExist {
            collection: Queue::COLLECTION,
            name: name.to_string(),
        }
    }

    /// Returns the queue, creating it empty and healthy when absent.
    pub async fn get_or_create(&self, name: &str) -> Result<Queue> {
        let upserted = self
            .store
            .insert_if_absent(Queue::COLLECTION, to_document(&Queue::new(name))?)
            .await?;
        if upserted.inserted {
            info!(queue = name, "queue registered");
        }
        from_document(upserted.document)
    }

    pub async fn get(&self, name: &str) -> Result<Queue> {
        let doc = self
            .store
            .find_one(Queue::COLLECTION, &Filter::by_id(name))
            .await?
            .ok_or_else(|| Self::does_not_exist(name))?;
        from_document(doc)
    }

    /// Queues matching `criteria`, in the criteria's order.
    pub async fn list_available(&self, criteria: &Criteria) -> Result<QueueCursor> {
        let inner = self.store.query(Queue::COLLECTION, criteria).await?;
        Ok(QueueCursor { inner })
    }

    /// Healthy queues, least loaded first. Ties keep the store's natural order.
    pub fn healthy_by_load() -> Criteria {
        Criteria::new(Filter::all().eq(MISSING_SINCE, Value::Null)).sort_by(COUNT, SortOrder::Ascending)
    }

    pub async fn increment(&self, name: &str) -> Result<Queue> {
        let doc = self
            .store
            .find_and_modify(Queue::COLLECTION, &Filter::by_id(name), &Update::new().inc(COUNT, 1))
            .await?
            .ok_or_else(|| Self::does_not_exist(name))?;
        let queue: Queue = from_document(doc)?;
        debug!(queue = name, load = queue.num_reservations, "queue load incremented");
        Ok(queue)
    }

    /// Decrements the load, flooring at zero.
    pub async fn decrement(&self, name: &str) -> Result<Queue> {
        let positive = Filter::by_id(name).gt(COUNT, 0);
        if let Some(doc) = self
            .store
            .find_and_modify(Queue::COLLECTION, &positive, &Update::new().inc(COUNT, -1))
            .await?
        {
            let queue: Queue = from_document(doc)?;
            debug!(queue = name, load = queue.num_reservations, "queue load decremented");
            return Ok(queue);
        }
        // 0 のまま：存在確認だけ行う
        self.get(name).await
    }

    /// Removes the queue and every reservation it owns.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let removed = self
            .store
            .remove(Queue::COLLECTION, &Filter::by_id(name))
            .await?;
        let orphans = self
            .store
            .remove(
                ResourceReservation::COLLECTION,
                &Filter::all().eq("assigned_queue", name),
            )
            .await?;
        info!(queue = name, removed, orphans, "queue deleted");
        Ok(())
    }

    /// Marks the queue healthy, registering it first when needed.
    pub async fn heartbeat(&self, name: &str) -> Result<Queue> {
        self.get_or_create(name).await?;
        let doc = self
            .store
            .find_and_modify(
                Queue::COLLECTION,
                &Filter::by_id(name),
                &Update::new().set(MISSING_SINCE, Value::Null),
            )
            .await?
            .ok_or_else(|| Self::does_not_exist(name))?;
        from_document(doc)
    }

    /// Stamps `missing_since` unless the queue is already missing.
    pub async fn mark_missing(&self, name: &str) -> Result<()> {
        let now = self.clock.now();
        let stamped = self
            .store
            .find_and_modify(
                Queue::COLLECTION,
                &Filter::by_id(name).eq(MISSING_SINCE, Value::Null),
                &Update::new().set(MISSING_SINCE, serde_json::to_value(now)?),
            )
            .await?;
        match stamped {
            Some(_) => info!(queue = name, "queue marked missing"),
            None => {
                self.get(name).await?;
            }
        }
        Ok(())
    }

    /// Queues that have been missing since before `cutoff`.
    pub async fn missing_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Queue>> {
        let criteria = Criteria::new(Filter::all().ne(MISSING_SINCE, Value::Null));
        let cursor = self.list_available(&criteria).await?;
        let mut stale = Vec::new();
        for queue in cursor {
            let queue = queue?;
            if queue.missing_since.is_some_and(|since| since < cutoff) {
                stale.push(queue);
            }
        }
        Ok(stale)
    }

    /// Current load of every queue, by name.
    pub async fn load_snapshot(&self) -> Result<Vec<QueueLoad>> {
        let criteria = Criteria::new(Filter::all());
        self.list_available(&criteria)
            .await?
            .map(|queue| queue.map(|q| QueueLoad::from(&q)))
            .collect()
    }
}
