//! # LocalStore
//! The durable half of the offline review flow. Two tables live in one SQLite file per profile:
//!
//! - `review_cache`: the last due set fetched from the remote authority. It is a snapshot, not a
//!   merge target: every refresh deletes the previous rows and writes the new ones in one
//!   transaction, so a reader sees either the old set or the new one.
//! - `sync_queue`: review outcomes that still have to be applied remotely. Rows get an
//!   autoincrement id and are read back per user ordered by `(timestamp, id)`.
//!
//! SQLite calls are synchronous, so every operation hops onto tokio's blocking pool and the
//! connection sits behind a mutex. The connection itself is opened lazily, exactly once, no matter
//! how many tasks race to [`LocalStore::initialize`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chokepoint::ChokePoint;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, params};
use tokio::sync::OnceCell;

use crate::data_model::{MasteryRecord, NewOutcome, PendingOutcome};
use crate::error::StorageError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    fn label(&self) -> String {
        match self {
            StoreLocation::File(path) => path.display().to_string(),
            StoreLocation::InMemory => ":memory:".to_string(),
        }
    }
}

impl From<Option<PathBuf>> for StoreLocation {
    fn from(path: Option<PathBuf>) -> Self {
        path.map(StoreLocation::File)
            .unwrap_or(StoreLocation::InMemory)
    }
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

struct Inner {
    location: StoreLocation,
    label: String,
    read_only: bool,
    connection: OnceCell<Arc<Mutex<Connection>>>,
    draining: ChokePoint<String>,
    opens: AtomicUsize,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("location", &self.inner.location)
            .field("read_only", &self.inner.read_only)
            .field("initialized", &self.inner.connection.initialized())
            .finish()
    }
}

impl LocalStore {
    /// Describe a store without touching the disk. Nothing is opened until the first operation or
    /// an explicit [`LocalStore::initialize`].
    pub fn new(location: StoreLocation) -> Self {
        Self::with_access(location, false)
    }

    /// Open an existing store file for inspection. The schema is never created or migrated, and
    /// every write fails. A file without the review tables is rejected when it is opened.
    pub fn read_only(path: PathBuf) -> Self {
        Self::with_access(StoreLocation::File(path), true)
    }

    fn with_access(location: StoreLocation, read_only: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: location.label(),
                location,
                read_only,
                connection: OnceCell::new(),
                draining: ChokePoint::new(),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Users whose queue is being drained. Shared by every clone of this store, so any number of
    /// queues over it still drain a given user one at a time.
    pub(crate) fn drain_gate(&self) -> &ChokePoint<String> {
        &self.inner.draining
    }

    /// Open or create the store. Idempotent; concurrent callers all wait on the same open.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.connection().await.map(|_| ())
    }

    pub async fn replace_cached_review_set(
        &self,
        user_id: &str,
        items: &[MasteryRecord],
    ) -> Result<(), StorageError> {
        let rows = items
            .iter()
            .map(|item| Ok((item.item_id.clone(), serde_json::to_string(item)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        let user_id = user_id.to_string();
        let written_at = Utc::now().timestamp_millis();

        let written = self
            .with_connection(move |conn, label| {
                const ACTION: &str = "replace review cache";
                let tx = conn.transaction().during(ACTION, label)?;
                tx.execute("DELETE FROM review_cache", [])
                    .during(ACTION, label)?;
                {
                    let mut insert = tx
                        .prepare(
                            "INSERT OR REPLACE INTO review_cache (user_id, item_id, record_json, written_at)
                             VALUES (?1, ?2, ?3, ?4)",
                        )
                        .during(ACTION, label)?;
                    for (item_id, record_json) in &rows {
                        insert
                            .execute(params![user_id, item_id, record_json, written_at])
                            .during(ACTION, label)?;
                    }
                }
                tx.commit().during(ACTION, label)?;
                Ok(rows.len())
            })
            .await?;

        log::debug!("Replaced review cache with {written} items");
        Ok(())
    }

    pub async fn get_cached_review_set(
        &self,
        user_id: &str,
    ) -> Result<Vec<MasteryRecord>, StorageError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn, label| {
            const ACTION: &str = "read review cache";
            let mut stmt = conn
                .prepare("SELECT record_json FROM review_cache WHERE user_id = ?1 ORDER BY rowid")
                .during(ACTION, label)?;
            let rows = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))
                .during(ACTION, label)?;

            let mut items = Vec::new();
            for record_json in rows {
                let record_json = record_json.during(ACTION, label)?;
                items.push(serde_json::from_str(&record_json)?);
            }
            Ok(items)
        })
        .await
    }

    /// When the user's cached set was last written, if there is one.
    pub async fn cached_review_set_written_at(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn, label| {
            let written_at = conn
                .query_row(
                    "SELECT MAX(written_at) FROM review_cache WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .during("read review cache timestamp", label)?;
            written_at.map(from_millis).transpose()
        })
        .await
    }

    pub async fn clear_cached_review_set(&self) -> Result<(), StorageError> {
        self.with_connection(|conn, label| {
            conn.execute("DELETE FROM review_cache", [])
                .during("clear review cache", label)?;
            Ok(())
        })
        .await
    }

    /// Append an outcome to the queue, returning the id the store assigned to it.
    pub async fn enqueue_outcome(&self, outcome: NewOutcome) -> Result<i64, StorageError> {
        self.with_connection(move |conn, label| {
            conn.execute(
                "INSERT INTO sync_queue (user_id, item_id, is_correct, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    outcome.user_id,
                    outcome.item_id,
                    outcome.is_correct,
                    outcome.timestamp.timestamp_millis()
                ],
            )
            .during("enqueue outcome", label)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// The user's pending outcomes, oldest first.
    pub async fn list_pending_outcomes(
        &self,
        user_id: &str,
    ) -> Result<Vec<PendingOutcome>, StorageError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn, label| {
            const ACTION: &str = "list pending outcomes";
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, item_id, is_correct, timestamp FROM sync_queue
                     WHERE user_id = ?1
                     ORDER BY timestamp ASC, id ASC",
                )
                .during(ACTION, label)?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .during(ACTION, label)?;

            let mut outcomes = Vec::new();
            for row in rows {
                let (id, user_id, item_id, is_correct, timestamp) = row.during(ACTION, label)?;
                outcomes.push(PendingOutcome {
                    id,
                    user_id,
                    item_id,
                    is_correct,
                    timestamp: from_millis(timestamp)?,
                });
            }
            Ok(outcomes)
        })
        .await
    }

    /// Delete an outcome. Returns whether a row was actually removed; removing an id twice is fine.
    pub async fn remove_pending_outcome(&self, id: i64) -> Result<bool, StorageError> {
        self.with_connection(move |conn, label| {
            let removed = conn
                .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])
                .during("remove pending outcome", label)?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn pending_outcome_count(&self, user_id: &str) -> Result<usize, StorageError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn, label| {
            let count = conn
                .query_row(
                    "SELECT COUNT(*) FROM sync_queue WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get::<_, i64>(0),
                )
                .during("count pending outcomes", label)?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    pub async fn pending_counts_by_user(&self) -> Result<BTreeMap<String, usize>, StorageError> {
        self.with_connection(|conn, label| {
            const ACTION: &str = "count pending outcomes per user";
            let mut stmt = conn
                .prepare("SELECT user_id, COUNT(*) FROM sync_queue GROUP BY user_id")
                .during(ACTION, label)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .during(ACTION, label)?;

            let mut counts = BTreeMap::new();
            for row in rows {
                let (user_id, count) = row.during(ACTION, label)?;
                counts.insert(user_id, count.max(0) as usize);
            }
            Ok(counts)
        })
        .await
    }

    async fn connection(&self) -> Result<Arc<Mutex<Connection>>, StorageError> {
        let connection = self
            .inner
            .connection
            .get_or_try_init(|| self.open())
            .await?;
        Ok(Arc::clone(connection))
    }

    async fn open(&self) -> Result<Arc<Mutex<Connection>>, StorageError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let location = self.inner.location.clone();
        let label = self.inner.label.clone();
        let read_only = self.inner.read_only;

        let connection = tokio::task::spawn_blocking(move || {
            if read_only {
                open_read_only_connection(&location, &label)
            } else {
                open_connection(&location, &label)
            }
        })
            .await
            .map_err(task_failed)?
            .inspect_err(|e| log::error!("Failed to open local review store: {e}"))?;

        log::info!("Opened local review store at {}", self.inner.label);
        Ok(Arc::new(Mutex::new(connection)))
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T, StorageError> + Send + 'static,
    {
        let connection = self.connection().await?;
        let label = self.inner.label.clone();

        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock().map_err(|_| {
                StorageError::Unavailable("connection lock poisoned by an earlier panic".into())
            })?;
            work(&mut connection, &label)
        })
        .await
        .map_err(task_failed)?
    }

    #[cfg(test)]
    pub(crate) fn times_opened(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }
}

fn open_connection(location: &StoreLocation, label: &str) -> Result<Connection, StorageError> {
    let connection = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StorageError::Unavailable(format!(
                        "failed to create directory '{}': {err}",
                        parent.display()
                    ))
                })?;
            }
            Connection::open(path)
        }
        StoreLocation::InMemory => Connection::open_in_memory(),
    }
    .during("open local store", label)?;

    connection
        .busy_timeout(Duration::from_secs(5))
        .during("open local store", label)?;
    initialize_schema(&connection, label)?;

    Ok(connection)
}

fn open_read_only_connection(
    location: &StoreLocation,
    label: &str,
) -> Result<Connection, StorageError> {
    const ACTION: &str = "open local store read-only";
    let StoreLocation::File(path) = location else {
        return Err(StorageError::Unavailable(
            "an in-memory store cannot be opened read-only".to_string(),
        ));
    };
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .during(ACTION, label)?;

    connection
        .busy_timeout(Duration::from_secs(5))
        .during(ACTION, label)?;

    for table in ["sync_queue", "review_cache"] {
        let exists = connection
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![table],
                |row| row.get::<_, bool>(0),
            )
            .during(ACTION, label)?;
        if !exists {
            return Err(StorageError::NotAReviewStore {
                location: label.to_string(),
                missing: table,
            });
        }
    }

    Ok(connection)
}

fn initialize_schema(connection: &Connection, label: &str) -> Result<(), StorageError> {
    connection
        .execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS review_cache (
                 user_id TEXT NOT NULL,
                 item_id TEXT NOT NULL,
                 record_json TEXT NOT NULL,
                 written_at INTEGER NOT NULL,
                 PRIMARY KEY (user_id, item_id)
             );
             CREATE TABLE IF NOT EXISTS sync_queue (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id TEXT NOT NULL,
                 item_id TEXT NOT NULL,
                 is_correct INTEGER NOT NULL,
                 timestamp INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS sync_queue_by_user_timestamp
                 ON sync_queue (user_id, timestamp);",
        )
        .during("initialize schema", label)
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or(StorageError::InvalidTimestamp(millis))
}

fn task_failed(err: tokio::task::JoinError) -> StorageError {
    StorageError::Unavailable(format!("store task failed: {err}"))
}

trait During<T> {
    fn during(self, action: &'static str, location: &str) -> Result<T, StorageError>;
}

impl<T> During<T> for rusqlite::Result<T> {
    fn during(self, action: &'static str, location: &str) -> Result<T, StorageError> {
        self.map_err(|err| StorageError::sqlite(action, location, err))
    }
}
