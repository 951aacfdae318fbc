//! # OutcomeQueue
//! A per-user FIFO view over the store's `sync_queue` table.
//!
//! Outcomes are independent of one another, so a drain never stops at the first rejected outcome:
//! it leaves that one in place for the next drain and moves on. An outcome only leaves the queue
//! after the remote authority has acknowledged it.

use serde::{Deserialize, Serialize};

use crate::data_model::{NewOutcome, PendingOutcome};
use crate::error::{RemoteCallError, StorageError};
use crate::store::LocalStore;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// A drain stopped on a storage failure. `report` counts the outcomes handled before it stopped;
/// the ones it counts as succeeded have left the queue.
#[derive(Debug, thiserror::Error)]
#[error("sync stopped after {} applied outcome(s): {source}", .report.succeeded)]
pub struct DrainError {
    pub report: DrainReport,
    #[source]
    pub source: StorageError,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0
    }
}

#[derive(Clone, Debug)]
pub struct OutcomeQueue {
    store: LocalStore,
}

impl OutcomeQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Persist an answer, stamped with the current time. Returns once it is durable.
    pub async fn enqueue(
        &self,
        user_id: &str,
        item_id: &str,
        is_correct: bool,
    ) -> Result<i64, StorageError> {
        let id = self
            .store
            .enqueue_outcome(NewOutcome::now(user_id, item_id, is_correct))
            .await?;
        log::debug!("Queued outcome {id} for item {item_id}");
        Ok(id)
    }

    pub async fn pending(&self, user_id: &str) -> Result<Vec<PendingOutcome>, StorageError> {
        self.store.list_pending_outcomes(user_id).await
    }

    pub async fn len(&self, user_id: &str) -> Result<usize, StorageError> {
        self.store.pending_outcome_count(user_id).await
    }

    /// Apply every pending outcome of `user_id`, oldest first, removing the ones `apply` accepts.
    ///
    /// Only one drain per user runs at a time across every queue built on the same store; a
    /// concurrent call returns an empty report straight away. A storage failure ends the drain,
    /// and the error carries what had been applied up to that point.
    pub async fn drain<F, Fut>(&self, user_id: &str, apply: F) -> Result<DrainReport, DrainError>
    where
        F: FnMut(PendingOutcome) -> Fut,
        Fut: Future<Output = Result<(), RemoteCallError>>,
    {
        let gate = self.store.drain_gate();
        match gate.run(user_id.to_string(), self.drain_pending(user_id, apply)).await {
            Some(result) => result,
            None => {
                log::debug!("Drain already running for {user_id}; skipping");
                Ok(DrainReport::default())
            }
        }
    }

    async fn drain_pending<F, Fut>(
        &self,
        user_id: &str,
        mut apply: F,
    ) -> Result<DrainReport, DrainError>
    where
        F: FnMut(PendingOutcome) -> Fut,
        Fut: Future<Output = Result<(), RemoteCallError>>,
    {
        let mut report = DrainReport::default();
        let pending = self
            .store
            .list_pending_outcomes(user_id)
            .await
            .map_err(|source| DrainError { report, source })?;

        for outcome in pending {
            let id = outcome.id;
            let item_id = outcome.item_id.clone();

            match apply(outcome).await {
                Ok(()) => {
                    if let Err(source) = self.store.remove_pending_outcome(id).await {
                        log::error!("Outcome {id} was applied but could not be dequeued: {source}");
                        return Err(DrainError { report, source });
                    }
                    report.succeeded += 1;
                }
                Err(e) => {
                    log::warn!("Outcome {id} for item {item_id} was not applied: {e}");
                    report.failed += 1;
                }
            }
        }

        if !report.is_empty() {
            log::info!(
                "Drained outcomes for {user_id}: {} applied, {} left for later",
                report.succeeded,
                report.failed
            );
        }
        Ok(report)
    }
}
