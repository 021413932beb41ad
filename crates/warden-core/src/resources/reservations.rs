//! ReservationTable - resource → queue の対応表と参照カウント

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::ResourceReservation;
use crate::error::{Result, WardenError};
use crate::ports::store::{Criteria, DocumentStore, Filter, Update, from_document, to_document};

const COUNT: &str = "num_reservations";
const QUEUE: &str = "assigned_queue";

/// Result of a decrement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrement {
    /// Other holders remain; the record is still stored.
    Remaining(ResourceReservation),
    /// The count reached zero and this call deleted the record. Carries its
    /// last state; the caller owns giving back the queue slot.
    Released(ResourceReservation),
    /// The count reached zero but a concurrent decrement deleted the record
    /// and already gave back the queue slot.
    AlreadyReleased,
}

#[derive(Clone)]
pub struct ReservationTable {
    store: Arc<dyn DocumentStore>,
}

impl ReservationTable {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn does_not_exist(name: &str) -> WardenError {
        WardenError::DoesNotExist {
            collection: ResourceReservation::COLLECTION,
            name: name.to_string(),
        }
    }

    /// Returns the reservation, creating an unassigned one with count 1 when
    /// absent. An existing record is returned unchanged.
    pub async fn get_or_create(&self, name: &str) -> Result<ResourceReservation> {
        let upserted = self
            .store
            .insert_if_absent(
                ResourceReservation::COLLECTION,
                to_document(&ResourceReservation::new(name))?,
            )
            .await?;
        from_document(upserted.document)
    }

    pub async fn find(&self, name: &str) -> Result<Option<ResourceReservation>> {
        self.store
            .find_one(ResourceReservation::COLLECTION, &Filter::by_id(name))
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn get(&self, name: &str) -> Result<ResourceReservation> {
        self.find(name).await?.ok_or_else(|| Self::does_not_exist(name))
    }

    pub async fn increment(&self, name: &str) -> Result<ResourceReservation> {
        let doc = self
            .store
            .find_and_modify(
                ResourceReservation::COLLECTION,
                &Filter::by_id(name),
                &Update::new().inc(COUNT, 1),
            )
            .await?
            .ok_or_else(|| Self::does_not_exist(name))?;
        from_document(doc)
    }

    /// Decrements the count; at zero the record is deleted.
    ///
    /// The delete is conditional on the count still being zero, so a holder
    /// that incremented in between keeps the record alive. Only the call
    /// whose delete removed the record reports `Released`; a concurrent
    /// delete of the same record reports `AlreadyReleased`.
    pub async fn decrement(&self, name: &str) -> Result<Decrement> {
        let positive = Filter::by_id(name).gt(COUNT, 0);
        let updated = self
            .store
            .find_and_modify(
                ResourceReservation::COLLECTION,
                &positive,
                &Update::new().inc(COUNT, -1),
            )
            .await?;

        let last = match updated {
            Some(doc) => from_document::<ResourceReservation>(doc)?,
            // 既に 0（本来は保存されない状態）: floor して削除へ進む
            None => self.get(name).await?,
        };
        if last.num_reservations > 0 {
            debug!(resource = name, count = last.num_reservations, "reservation decremented");
            return Ok(Decrement::Remaining(last));
        }

        let removed = self
            .store
            .remove(
                ResourceReservation::COLLECTION,
                &Filter::by_id(name).lte(COUNT, 0),
            )
            .await?;
        if removed == 0 {
            return match self.find(name).await? {
                Some(revived) => Ok(Decrement::Remaining(revived)),
                None => {
                    debug!(resource = name, "reservation released by a concurrent holder");
                    Ok(Decrement::AlreadyReleased)
                }
            };
        }
        debug!(resource = name, "reservation released");
        Ok(Decrement::Released(last))
    }

    /// Unconditional removal. Returns whether a record was removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self
            .store
            .remove(ResourceReservation::COLLECTION, &Filter::by_id(name))
            .await?;
        Ok(removed > 0)
    }

    /// Increments the count of a reservation that already has a queue.
    pub async fn increment_assigned(&self, name: &str) -> Result<Option<ResourceReservation>> {
        self.store
            .find_and_modify(
                ResourceReservation::COLLECTION,
                &Filter::by_id(name).ne(QUEUE, Value::Null),
                &Update::new().inc(COUNT, 1),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    /// Creates the reservation already pinned to `queue`.
    ///
    /// Returns the stored record and whether this call created it.
    pub async fn insert_assigned(
        &self,
        name: &str,
        queue: &str,
    ) -> Result<(ResourceReservation, bool)> {
        let upserted = self
            .store
            .insert_if_absent(
                ResourceReservation::COLLECTION,
                to_document(&ResourceReservation::assigned(name, queue))?,
            )
            .await?;
        Ok((from_document(upserted.document)?, upserted.inserted))
    }

    /// Pins an unassigned reservation to `queue` and counts the caller as a holder.
    pub async fn assign_queue(&self, name: &str, queue: &str) -> Result<Option<ResourceReservation>> {
        self.store
            .find_and_modify(
                ResourceReservation::COLLECTION,
                &Filter::by_id(name).eq(QUEUE, Value::Null),
                &Update::new().set(QUEUE, queue).inc(COUNT, 1),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn by_queue(&self, queue: &str) -> Result<Vec<ResourceReservation>> {
        self.store
            .query(
                ResourceReservation::COLLECTION,
                &Criteria::new(Filter::all().eq(QUEUE, queue)),
            )
            .await?
            .map(from_document)
            .collect()
    }
}
