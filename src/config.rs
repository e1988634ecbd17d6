use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::DEFAULT_CHANNEL_CAPACITY;
use crate::sync::{FirstSyncChoice, RECENT_WINDOW_MS};

const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("no data directory available; set VOCAB_DATA_DIR")]
    NoDataDir,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub remote_timeout: Duration,
    pub recent_window_ms: i64,
    pub event_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Set when `ENABLE_FILE_LOGS` is on.
    pub log_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub sync: SyncConfig,
    pub user_id: Option<String>,
    pub first_sync: Option<FirstSyncChoice>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let log_level = get("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let log_dir = get("ENABLE_FILE_LOGS")
            .filter(|v| v == "true" || v == "1")
            .map(|_| PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "./logs".to_string())));

        let data_dir = match get("VOCAB_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir().ok_or(ConfigError::NoDataDir)?.join("vocab-sync"),
        };

        let remote_timeout_ms = parse_or(get("VOCAB_REMOTE_TIMEOUT_MS"), "VOCAB_REMOTE_TIMEOUT_MS", DEFAULT_REMOTE_TIMEOUT_MS)?;
        let recent_window_ms = parse_or(get("VOCAB_RECENT_WINDOW_MS"), "VOCAB_RECENT_WINDOW_MS", RECENT_WINDOW_MS)?;
        let event_capacity = parse_or(get("VOCAB_EVENT_CAPACITY"), "VOCAB_EVENT_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?;
        if event_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "VOCAB_EVENT_CAPACITY",
                value: "0".to_string(),
            });
        }

        let first_sync = match get("VOCAB_FIRST_SYNC") {
            None => None,
            Some(value) => Some(match value.to_ascii_lowercase().as_str() {
                "adopt" => FirstSyncChoice::AdoptLocal,
                "discard" => FirstSyncChoice::DiscardLocal,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "VOCAB_FIRST_SYNC",
                        value,
                    })
                }
            }),
        };

        Ok(Self {
            log_level,
            log_dir,
            data_dir,
            sync: SyncConfig {
                remote_url: get("VOCAB_REMOTE_URL"),
                remote_token: get("VOCAB_REMOTE_TOKEN"),
                remote_timeout: Duration::from_millis(remote_timeout_ms),
                recent_window_ms,
                event_capacity,
            },
            user_id: get("VOCAB_USER_ID"),
            first_sync,
        })
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid { key, value }),
    }
}
