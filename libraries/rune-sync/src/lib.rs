//! Offline-capable review syncing for rune mastery.
//!
//! The remote authority owns every learner's mastery records. This crate lets a client keep
//! reviewing while it is offline without ever losing or double-applying an answer.
//!
//! Strategy:
//! 1. A live snapshot of the learner's mastery records tells the [`DueItemResolver`] how many runes
//!    are due. While online it asks the authority for the canonical due set and stores it in the
//!    local review cache, or clears the cache when nothing is due.
//! 2. A review session reads the live due set, or the cached one when the authority is out of reach.
//! 3. Each answer is sent to the authority directly. If that fails, or we are offline, it goes into a
//!    durable per-user queue instead.
//! 4. The [`SyncCoordinator`] drains the queue on login and a few seconds after the network comes
//!    back, one drain at a time. An answer leaves the queue only once the authority has accepted it.

pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod data_model;
pub mod error;
pub mod notify;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod store;

use std::sync::Arc;

pub use config::SyncConfig;
pub use connectivity::{Connectivity, NetworkStatus};
pub use coordinator::{AuthUser, SkipReason, Submission, SyncCoordinator, SyncRun, SyncState};
pub use data_model::{MasteryLevel, MasteryRecord, NewOutcome, PendingOutcome};
pub use error::{ConfigError, RemoteCallError, StorageError};
pub use notify::{LogNotifier, Notification, Notifier, Severity};
pub use queue::{DrainError, DrainReport, OutcomeQueue};
pub use remote::ReviewRemote;
pub use resolver::{CacheRefresh, DueItemResolver, SessionSource, SessionStart};
pub use store::{LocalStore, StoreLocation};

/// Everything a client needs, wired together around one local store.
pub struct ReviewSync {
    store: LocalStore,
    resolver: DueItemResolver,
    coordinator: Arc<SyncCoordinator>,
}

impl ReviewSync {
    /// Open the store described by `config` and build the resolver and coordinator on top of it.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn ReviewRemote>,
        notifier: Arc<dyn Notifier>,
        connectivity: Connectivity,
    ) -> Result<Self, StorageError> {
        let store = LocalStore::new(StoreLocation::from(config.store_path.clone()));
        store.initialize().await?;

        let network = NetworkStatus::new(connectivity);
        let resolver = DueItemResolver::new(store.clone(), Arc::clone(&remote), network.clone());
        let coordinator = SyncCoordinator::new(
            OutcomeQueue::new(store.clone()),
            remote,
            notifier,
            network,
            config,
        );

        Ok(Self {
            store,
            resolver,
            coordinator,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn resolver(&self) -> &DueItemResolver {
        &self.resolver
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn network(&self) -> &NetworkStatus {
        self.coordinator.network()
    }
}
