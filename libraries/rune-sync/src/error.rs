use rusqlite::{Error as SqlError, ErrorCode};

/// The local store could not complete an operation. Fatal to that operation, never to the process.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("local store at {location} is out of space while trying to {action}")]
    QuotaExceeded {
        action: &'static str,
        location: String,
    },
    #[error(
        "local store at {location} is corrupted ({detail}); remove it to rebuild the review cache"
    )]
    Corrupt { location: String, detail: String },
    #[error("failed to {action} using local store at {location}: {source}")]
    Sqlite {
        action: &'static str,
        location: String,
        #[source]
        source: SqlError,
    },
    #[error("failed to encode or decode a cached record: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
    #[error("{location} is not a review store (no `{missing}` table)")]
    NotAReviewStore {
        location: String,
        missing: &'static str,
    },
    #[error("local store is unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn sqlite(action: &'static str, location: &str, err: SqlError) -> Self {
        if let SqlError::SqliteFailure(code, message) = &err {
            match code.code {
                ErrorCode::DiskFull => {
                    return StorageError::QuotaExceeded {
                        action,
                        location: location.to_string(),
                    };
                }
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    return StorageError::Corrupt {
                        location: location.to_string(),
                        detail: message
                            .clone()
                            .unwrap_or_else(|| "sqlite reported corruption".to_string()),
                    };
                }
                _ => {}
            }
        }

        StorageError::Sqlite {
            action,
            location: location.to_string(),
            source: err,
        }
    }
}

/// The remote authority could not be reached or refused the request.
/// Always recovered locally: mutations fall back to the queue, fetches to the cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteCallError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("remote rejected the request: {0}")]
    Rejected(String),
    #[error("not signed in")]
    Unauthenticated,
    #[error("unexpected response from remote: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of milliseconds, got `{value}`")]
    InvalidDuration { key: &'static str, value: String },
}
