#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rune_sync::{
    Connectivity, DueItemResolver, LocalStore, MasteryRecord, NetworkStatus, Notification,
    Notifier, OutcomeQueue, RemoteCallError, ReviewRemote, Severity, SyncConfig, SyncCoordinator,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-process stand-in for the remote authority.
#[derive(Default)]
pub struct FakeRemote {
    attempts: AtomicUsize,
    applied: Mutex<Vec<(String, String, bool)>>,
    rejected_items: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
    due_items: Mutex<Vec<MasteryRecord>>,
    due_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `apply_review_outcome`, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `(item_id, is_correct)` of every accepted outcome, in the order they were accepted.
    pub fn applied(&self) -> Vec<(String, bool)> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item_id, is_correct)| (item_id.clone(), *is_correct))
            .collect()
    }

    pub fn reject_item(&self, item_id: &str) {
        self.rejected_items
            .lock()
            .unwrap()
            .insert(item_id.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected_items.lock().unwrap().clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_due_items(&self, items: Vec<MasteryRecord>) {
        *self.due_items.lock().unwrap() = items;
    }

    pub fn due_fetches(&self) -> usize {
        self.due_fetches.load(Ordering::SeqCst)
    }
}

impl ReviewRemote for FakeRemote {
    fn apply_review_outcome<'a>(
        &'a self,
        user_id: &'a str,
        item_id: &'a str,
        is_correct: bool,
    ) -> BoxFuture<'a, Result<(), RemoteCallError>> {
        async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;

            if self.unreachable.load(Ordering::SeqCst) {
                return Err(RemoteCallError::Network("connection refused".to_string()));
            }
            if self.rejected_items.lock().unwrap().contains(item_id) {
                return Err(RemoteCallError::Rejected(format!("{item_id} rejected")));
            }
            self.applied.lock().unwrap().push((
                user_id.to_string(),
                item_id.to_string(),
                is_correct,
            ));
            Ok(())
        }
        .boxed()
    }

    fn get_due_review_items<'a>(
        &'a self,
        _user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MasteryRecord>, RemoteCallError>> {
        async move {
            self.due_fetches.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;

            if self.unreachable.load(Ordering::SeqCst) {
                return Err(RemoteCallError::Network("connection refused".to_string()));
            }
            Ok(self.due_items.lock().unwrap().clone())
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|n| n.severity == severity)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

pub struct Harness {
    pub store: LocalStore,
    pub remote: Arc<FakeRemote>,
    pub notifier: Arc<RecordingNotifier>,
    pub network: NetworkStatus,
    pub queue: OutcomeQueue,
    pub resolver: DueItemResolver,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub async fn new(connectivity: Connectivity) -> Self {
        Self::with_config(connectivity, SyncConfig::default()).await
    }

    pub async fn with_config(connectivity: Connectivity, config: SyncConfig) -> Self {
        let store = LocalStore::in_memory();
        store.initialize().await.unwrap();
        Self::with_store(connectivity, config, store)
    }

    /// Build around `store` as given; it is not initialized first.
    pub fn with_store(connectivity: Connectivity, config: SyncConfig, store: LocalStore) -> Self {
        init_logging();

        let remote = FakeRemote::new();
        let notifier = RecordingNotifier::new();
        let network = NetworkStatus::new(connectivity);
        let queue = OutcomeQueue::new(store.clone());
        let resolver = DueItemResolver::new(store.clone(), remote.clone(), network.clone());
        let coordinator = SyncCoordinator::new(
            queue.clone(),
            remote.clone(),
            notifier.clone(),
            network.clone(),
            config,
        );

        Self {
            store,
            remote,
            notifier,
            network,
            queue,
            resolver,
            coordinator,
        }
    }
}

/// Run `batch` against the store file through a separate connection.
pub fn run_sql(path: &Path, batch: &str) {
    let connection = rusqlite::Connection::open(path).unwrap();
    connection.busy_timeout(Duration::from_secs(5)).unwrap();
    connection.execute_batch(batch).unwrap();
}

/// Poll `condition` every 100ms (of tokio time) until it holds, giving up after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while !condition() {
        if waited >= limit {
            return false;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    true
}
