use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_RECONNECT_DEBOUNCE_MS: u64 = 5_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Where the local store lives. `None` keeps it in memory for the life of the process.
    pub store_path: Option<PathBuf>,
    /// How long connectivity has to stay up before a reconnect triggers a sync.
    pub reconnect_debounce_ms: u64,
    pub success_notice_ms: u64,
    pub empty_notice_ms: u64,
    /// Base URL of the callable functions, e.g. `https://us-central1-<project>.cloudfunctions.net`.
    pub functions_base_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            reconnect_debounce_ms: DEFAULT_RECONNECT_DEBOUNCE_MS,
            success_notice_ms: 3_000,
            empty_notice_ms: 2_000,
            functions_base_url: None,
        }
    }
}

impl SyncConfig {
    /// Read overrides from the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("RUNE_SYNC_STORE_PATH").filter(|path| !path.is_empty()) {
            config.store_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = millis(&lookup, "RUNE_SYNC_RECONNECT_DEBOUNCE_MS")? {
            config.reconnect_debounce_ms = ms;
        }
        if let Some(ms) = millis(&lookup, "RUNE_SYNC_SUCCESS_NOTICE_MS")? {
            config.success_notice_ms = ms;
        }
        if let Some(ms) = millis(&lookup, "RUNE_SYNC_EMPTY_NOTICE_MS")? {
            config.empty_notice_ms = ms;
        }
        if let Some(url) = lookup("RUNE_SYNC_FUNCTIONS_URL").filter(|url| !url.is_empty()) {
            config.functions_base_url = Some(url.trim_end_matches('/').to_string());
        }

        Ok(config)
    }

    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub fn success_notice(&self) -> Duration {
        Duration::from_millis(self.success_notice_ms)
    }

    pub fn empty_notice(&self) -> Duration {
        Duration::from_millis(self.empty_notice_ms)
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidDuration { key, value })
}
