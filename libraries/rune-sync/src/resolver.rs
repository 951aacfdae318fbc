//! # DueItemResolver
//! Decides which runes are due and keeps the offline review cache honest about it.
//!
//! The cache follows the remote authority's answer, not the local snapshot: the snapshot only tells
//! us whether it is worth asking. When the authority says nothing is due, the cache is cleared so
//! that an old backlog cannot resurface as an offline session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::watch;

use crate::connectivity::NetworkStatus;
use crate::data_model::MasteryRecord;
use crate::error::StorageError;
use crate::remote::ReviewRemote;
use crate::store::LocalStore;

pub fn due_items(
    records: &[MasteryRecord],
    now: DateTime<Utc>,
) -> impl Iterator<Item = &MasteryRecord> {
    records.iter().filter(move |record| record.is_due_at(now))
}

pub fn due_count_at(records: &[MasteryRecord], now: DateTime<Utc>) -> usize {
    due_items(records, now).count()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionSource {
    /// Fetched from the remote authority just now.
    Live,
    /// Read from the local cache, possibly stale.
    Cached,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionStart {
    Ready {
        items: Vec<MasteryRecord>,
        source: SessionSource,
    },
    /// The remote authority says there is nothing to review.
    NothingDue,
    /// Offline (or the remote is unreachable) and there is nothing cached to fall back on.
    NothingAvailable,
}

/// What a snapshot did to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheRefresh {
    Refreshed { items: usize },
    Cleared,
    Untouched,
}

pub struct DueItemResolver {
    store: LocalStore,
    remote: Arc<dyn ReviewRemote>,
    network: NetworkStatus,
    due_count: watch::Sender<usize>,
}

impl DueItemResolver {
    pub fn new(store: LocalStore, remote: Arc<dyn ReviewRemote>, network: NetworkStatus) -> Self {
        let (due_count, _) = watch::channel(0);
        Self {
            store,
            remote,
            network,
            due_count,
        }
    }

    /// Due count from the most recent snapshot.
    pub fn due_count(&self) -> usize {
        *self.due_count.borrow()
    }

    pub fn subscribe_due_count(&self) -> watch::Receiver<usize> {
        self.due_count.subscribe()
    }

    pub async fn on_snapshot(
        &self,
        user_id: &str,
        records: &[MasteryRecord],
    ) -> Result<CacheRefresh, StorageError> {
        self.on_snapshot_at(user_id, records, Utc::now()).await
    }

    pub async fn on_snapshot_at(
        &self,
        user_id: &str,
        records: &[MasteryRecord],
        now: DateTime<Utc>,
    ) -> Result<CacheRefresh, StorageError> {
        let due = due_count_at(records, now);
        self.due_count.send_replace(due);

        if !self.network.is_online() {
            return Ok(CacheRefresh::Untouched);
        }

        if due == 0 {
            self.store.clear_cached_review_set().await?;
            return Ok(CacheRefresh::Cleared);
        }

        match self.remote.get_due_review_items(user_id).await {
            Ok(items) if items.is_empty() => {
                self.store.clear_cached_review_set().await?;
                Ok(CacheRefresh::Cleared)
            }
            Ok(items) => {
                self.store.replace_cached_review_set(user_id, &items).await?;
                Ok(CacheRefresh::Refreshed { items: items.len() })
            }
            Err(e) => {
                log::warn!("Could not refresh review cache, keeping the previous one: {e}");
                Ok(CacheRefresh::Untouched)
            }
        }
    }

    /// Apply every snapshot the stream yields until it ends. Storage errors are logged, not
    /// returned, so one bad refresh does not end the subscription.
    pub async fn follow<S>(&self, user_id: &str, snapshots: S)
    where
        S: Stream<Item = Vec<MasteryRecord>>,
    {
        let mut snapshots = std::pin::pin!(snapshots);
        while let Some(records) = snapshots.next().await {
            if let Err(e) = self.on_snapshot(user_id, &records).await {
                log::error!("Failed to update review cache from snapshot: {e}");
            }
        }
        log::debug!("Mastery snapshot stream for {user_id} ended");
    }

    pub async fn start_review_session(&self, user_id: &str) -> Result<SessionStart, StorageError> {
        if self.network.is_online() {
            match self.remote.get_due_review_items(user_id).await {
                Ok(items) if items.is_empty() => {
                    if let Err(e) = self.store.clear_cached_review_set().await {
                        log::error!("Could not clear the review cache: {e}");
                    }
                    return Ok(SessionStart::NothingDue);
                }
                Ok(items) => {
                    if let Err(e) = self.store.replace_cached_review_set(user_id, &items).await {
                        log::error!("Could not cache due items for offline use: {e}");
                    }
                    return Ok(SessionStart::Ready {
                        items,
                        source: SessionSource::Live,
                    });
                }
                Err(e) => {
                    log::warn!("Fetching due items failed, falling back to the cache: {e}");
                }
            }
        }

        let items = self.store.get_cached_review_set(user_id).await?;
        if items.is_empty() {
            return Ok(SessionStart::NothingAvailable);
        }
        Ok(SessionStart::Ready {
            items,
            source: SessionSource::Cached,
        })
    }
}
