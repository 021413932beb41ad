//! ReservationCoordinator - assign / release
//!
//! 同じ resource に対する操作は必ず同じ queue に載る。queue 側は 1 件ずつ
//! 直列に実行するので、これで resource 単位の排他が成立する。
//!
//! # assign
//! 1. 既に queue を持つ reservation があれば count を +1 してその queue を返す
//! 2. なければ最も空いている healthy queue を選び、queue の count を +1
//! 3. reservation を insert-if-absent で作成（競合に負けたら queue を戻してやり直す）

use tracing::{debug, instrument, warn};

use crate::domain::Queue;
use crate::error::{Result, WardenError};
use crate::resources::queues::QueueRegistry;
use crate::resources::reservations::{Decrement, ReservationTable};

/// Bound on insert races lost in a row before giving up.
const MAX_ASSIGN_ATTEMPTS: usize = 16;

#[derive(Clone)]
pub struct ReservationCoordinator {
    queues: QueueRegistry,
    reservations: ReservationTable,
}

impl ReservationCoordinator {
    pub fn new(queues: QueueRegistry, reservations: ReservationTable) -> Self {
        Self {
            queues,
            reservations,
        }
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn reservations(&self) -> &ReservationTable {
        &self.reservations
    }

    /// Healthy queue with the fewest reservations.
    pub async fn get_least_busy_available_queue(&self) -> Result<Queue> {
        let criteria = QueueRegistry::healthy_by_load().limit(1);
        self.queues
            .list_available(&criteria)
            .await?
            .next()
            .transpose()?
            .ok_or(WardenError::NoAvailableQueues)
    }

    /// Returns the queue that owns `resource`, reserving one if needed.
    #[instrument(skip(self))]
    pub async fn assign(&self, resource: &str) -> Result<String> {
        for _ in 0..MAX_ASSIGN_ATTEMPTS {
            if let Some(existing) = self.reservations.increment_assigned(resource).await?
                && let Some(queue) = existing.assigned_queue
            {
                debug!(%queue, count = existing.num_reservations, "joined existing reservation");
                return Ok(queue);
            }

            let candidate = self.get_least_busy_available_queue().await?;
            match self.queues.increment(&candidate.name).await {
                Ok(_) => {}
                // 選んだ直後に decommission された
                Err(WardenError::DoesNotExist { .. }) => continue,
                Err(err) => return Err(err),
            }

            let (stored, inserted) = self
                .reservations
                .insert_assigned(resource, &candidate.name)
                .await?;
            if inserted {
                debug!(queue = %candidate.name, "reserved least busy queue");
                return Ok(candidate.name);
            }

            if stored.assigned_queue.is_none()
                && self
                    .reservations
                    .assign_queue(resource, &candidate.name)
                    .await?
                    .is_some()
            {
                debug!(queue = %candidate.name, "claimed unassigned reservation");
                return Ok(candidate.name);
            }

            // 競合に負けた: queue の count を戻して既存の reservation に合流する
            self.give_back(&candidate.name).await?;
        }

        Err(WardenError::Store(format!(
            "could not settle a reservation for {resource} after {MAX_ASSIGN_ATTEMPTS} attempts"
        )))
    }

    /// Drops one hold on `resource`; the last hold frees the queue slot.
    ///
    /// Unknown resources are ignored so retried cleanup is harmless.
    #[instrument(skip(self))]
    pub async fn release(&self, resource: &str) -> Result<()> {
        let outcome = match self.reservations.decrement(resource).await {
            Ok(outcome) => outcome,
            Err(WardenError::DoesNotExist { .. }) => {
                debug!("release of unknown resource ignored");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if let Decrement::Released(last) = outcome
            && let Some(queue) = last.assigned_queue
        {
            self.give_back(&queue).await?;
        }
        Ok(())
    }

    async fn give_back(&self, queue: &str) -> Result<()> {
        match self.queues.decrement(queue).await {
            Ok(_) => Ok(()),
            Err(WardenError::DoesNotExist { .. }) => {
                warn!(queue, "queue vanished before its load could be returned");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
