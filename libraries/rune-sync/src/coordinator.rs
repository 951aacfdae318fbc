//! # SyncCoordinator
//! Decides when queued outcomes get drained, and makes sure only one drain runs at a time.
//!
//! Drains are triggered by a non-anonymous login and by the network coming back. Reconnects are
//! debounced: flaky connections tend to emit bursts of `online` events, and only the last one
//! should sync, after the connection has stayed up for the debounce window. Going offline cancels
//! a pending reconnect sync.
//!
//! The lock is never waited on. A trigger that finds a drain in flight simply does nothing; the
//! outcomes it would have applied are still queued and the next trigger picks them up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chokepoint::Latch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::connectivity::{Connectivity, NetworkStatus};
use crate::error::StorageError;
use crate::notify::{Notification, Notifier, Severity, plural};
use crate::queue::{DrainError, DrainReport, OutcomeQueue};
use crate::remote::ReviewRemote;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub is_anonymous: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InProgress,
    Anonymous,
    SignedOut,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncRun {
    Completed(DrainReport),
    Skipped(SkipReason),
    /// The drain stopped on a storage failure after handling `report`.
    Failed { report: DrainReport, error: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The remote authority accepted the outcome directly.
    Applied,
    /// The outcome is waiting in the local queue.
    Queued { id: i64 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<DrainReport>,
}

impl SyncState {
    pub fn in_progress(&self) -> bool {
        match (self.last_started_at, self.last_finished_at) {
            (Some(started), Some(finished)) => started > finished,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

pub struct SyncCoordinator {
    queue: OutcomeQueue,
    remote: Arc<dyn ReviewRemote>,
    notifier: Arc<dyn Notifier>,
    network: NetworkStatus,
    config: SyncConfig,
    sync_lock: Latch,
    last_sync_was_empty: AtomicBool,
    current_user: Mutex<Option<String>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<SyncState>,
}

impl SyncCoordinator {
    pub fn new(
        queue: OutcomeQueue,
        remote: Arc<dyn ReviewRemote>,
        notifier: Arc<dyn Notifier>,
        network: NetworkStatus,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            remote,
            notifier,
            network,
            config,
            sync_lock: Latch::new(),
            last_sync_was_empty: AtomicBool::new(false),
            current_user: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            state: Mutex::new(SyncState::default()),
        })
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    pub fn current_user(&self) -> Option<String> {
        self.current_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sync_state(&self) -> SyncState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn pending_count(&self, user_id: &str) -> Result<usize, StorageError> {
        self.queue.len(user_id).await
    }

    /// Drain the user's queue unless we are offline or a drain is already running.
    pub async fn process_sync_queue(&self, user_id: &str) -> SyncRun {
        if !self.network.is_online() {
            log::debug!("Offline, not draining queued outcomes");
            return SyncRun::Skipped(SkipReason::Offline);
        }

        // No await before this point: two calls in the same tick must not both get past it.
        let Some(_pass) = self.sync_lock.try_enter(()) else {
            log::debug!("Sync already in progress, skipping");
            return SyncRun::Skipped(SkipReason::InProgress);
        };

        self.mark_sync_started();

        let remote = Arc::clone(&self.remote);
        let result = self
            .queue
            .drain(user_id, move |outcome| {
                let remote = Arc::clone(&remote);
                async move {
                    remote
                        .apply_review_outcome(
                            &outcome.user_id,
                            &outcome.item_id,
                            outcome.is_correct,
                        )
                        .await
                }
            })
            .await;

        match result {
            Ok(report) => {
                self.mark_sync_finished(Some(report), None);
                self.announce(report);
                SyncRun::Completed(report)
            }
            Err(DrainError { report, source }) => {
                log::error!("Draining queued outcomes failed: {source}");
                self.mark_sync_finished(Some(report), Some(source.to_string()));
                if !report.is_empty() {
                    self.announce(report);
                }
                self.notifier.notify(Notification::new(
                    format!("Could not sync the rest of your offline reviews: {source}"),
                    Severity::Error,
                ));
                SyncRun::Failed {
                    report,
                    error: source.to_string(),
                }
            }
        }
    }

    /// Record an answer: straight to the remote authority when we can, into the queue otherwise.
    pub async fn submit_outcome(
        &self,
        user_id: &str,
        item_id: &str,
        is_correct: bool,
    ) -> Result<Submission, StorageError> {
        if self.network.is_online() {
            match self
                .remote
                .apply_review_outcome(user_id, item_id, is_correct)
                .await
            {
                Ok(()) => return Ok(Submission::Applied),
                Err(e) => log::warn!("Could not apply outcome for {item_id}, queueing it: {e}"),
            }
        }

        match self.queue.enqueue(user_id, item_id, is_correct).await {
            Ok(id) => Ok(Submission::Queued { id }),
            Err(e) => {
                log::error!("Failed to queue outcome for {item_id}: {e}");
                self.notifier.notify(Notification::new(
                    format!("Your answer could not be saved offline: {e}"),
                    Severity::Error,
                ));
                Err(e)
            }
        }
    }

    pub async fn on_login(&self, user: &AuthUser) -> SyncRun {
        if user.is_anonymous {
            self.set_current_user(None);
            return SyncRun::Skipped(SkipReason::Anonymous);
        }
        self.set_current_user(Some(user.user_id.clone()));
        self.process_sync_queue(&user.user_id).await
    }

    pub fn on_logout(&self) {
        self.set_current_user(None);
        self.cancel_reconnect_sync();
    }

    /// Feed a connectivity edge from the environment. Must be called from within a tokio runtime.
    pub fn on_connectivity(self: &Arc<Self>, connectivity: Connectivity) {
        self.network.set(connectivity);
        match connectivity {
            Connectivity::Online => self.schedule_reconnect_sync(),
            Connectivity::Offline => self.cancel_reconnect_sync(),
        }
    }

    pub fn reconnect_sync_scheduled(&self) -> bool {
        self.reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    fn schedule_reconnect_sync(self: &Arc<Self>) {
        let coordinator = Arc::downgrade(self);
        let delay = self.config.reconnect_debounce();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(coordinator) = coordinator.upgrade() else {
                return;
            };
            // Detached so that restarting or cancelling the timer can never interrupt a drain
            // between a remote apply and the matching dequeue.
            tokio::spawn(async move { coordinator.sync_after_reconnect().await });
        });

        let previous = self
            .reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_reconnect_sync(&self) {
        let timer = self
            .reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    async fn sync_after_reconnect(&self) {
        let Some(user_id) = self.current_user() else {
            log::debug!("Reconnected while signed out, nothing to sync");
            return;
        };
        if self.sync_lock.is_held(&()) {
            log::debug!("Reconnect sync fired while a sync was running, skipping");
            return;
        }
        self.process_sync_queue(&user_id).await;
    }

    fn set_current_user(&self, user_id: Option<String>) {
        *self
            .current_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = user_id;
    }

    fn announce(&self, report: DrainReport) {
        if report.is_empty() {
            // Only the first empty drain in a row gets a notification.
            if !self.last_sync_was_empty.swap(true, Ordering::SeqCst) {
                self.notifier.notify(
                    Notification::new("All your reviews are synced", Severity::Info)
                        .dismiss_after(self.config.empty_notice()),
                );
            }
            return;
        }
        self.last_sync_was_empty.store(false, Ordering::SeqCst);

        if report.succeeded > 0 {
            self.notifier.notify(
                Notification::new(
                    format!(
                        "Synced {} offline review{}",
                        report.succeeded,
                        plural(report.succeeded)
                    ),
                    Severity::Success,
                )
                .dismiss_after(self.config.success_notice()),
            );
        }
        if report.failed > 0 {
            self.notifier.notify(Notification::new(
                format!(
                    "{} review{} could not be synced yet and will be retried",
                    report.failed,
                    plural(report.failed)
                ),
                Severity::Warning,
            ));
        }
    }

    fn mark_sync_started(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_started_at = Some(Utc::now());
    }

    fn mark_sync_finished(&self, report: Option<DrainReport>, error: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_finished_at = Some(Utc::now());
        state.last_error = error;
        if report.is_some() {
            state.last_report = report;
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.cancel_reconnect_sync();
    }
}
