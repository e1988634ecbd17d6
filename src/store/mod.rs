mod local;
mod memory;
mod remote;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::models::{DailyStats, Settings, VocabList};

pub use local::LocalStore;
pub use memory::{FailureMode, MemoryStore, MemoryStoreFactory};
pub use remote::{HttpRemoteFactory, HttpRemoteStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed {kind} record: {reason}")]
    DataShape { kind: &'static str, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Worth retrying on the next mutation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_)
                | StoreError::Request(_)
                | StoreError::HttpStatus { .. }
                | StoreError::Io(_)
                | StoreError::Unavailable(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Remote,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Local => "local",
            StoreKind::Remote => "remote",
        }
    }
}

/// One replica of the collection. Every write is an idempotent upsert keyed
/// by record id, so pushing the full collection again is always safe.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    async fn load_lists(&self) -> StoreResult<Vec<VocabList>>;

    async fn save_lists(&self, lists: &[VocabList]) -> StoreResult<()>;

    async fn save_list(&self, list: &VocabList) -> StoreResult<()> {
        self.save_lists(std::slice::from_ref(list)).await
    }

    /// Makes the replica hold exactly `lists`.
    async fn replace_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        let keep: HashSet<&str> = lists.iter().map(|l| l.id.as_str()).collect();
        for existing in self.load_lists().await? {
            if !keep.contains(existing.id.as_str()) {
                self.delete_list(&existing.id).await?;
            }
        }
        self.save_lists(lists).await
    }

    async fn delete_list(&self, id: &str) -> StoreResult<()>;

    async fn load_settings(&self) -> StoreResult<Option<Settings>>;

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()>;

    /// Inclusive date range, UTC days.
    async fn load_daily_stats(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyStats>>;

    async fn save_daily_stats(&self, stats: &DailyStats) -> StoreResult<()>;

    async fn clear_all(&self) -> StoreResult<()>;
}

/// Opens the remote replica for a signed-in user.
pub trait RemoteStoreFactory: Send + Sync {
    fn for_user(&self, user_id: &str) -> Arc<dyn ReplicaStore>;
}

/// Decodes list documents one by one, skipping malformed records.
pub(crate) fn decode_lists(raw: Vec<Value>, source: StoreKind) -> Vec<VocabList> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<VocabList>(value) {
            Ok(list) => Some(list),
            Err(err) => {
                let err = StoreError::DataShape {
                    kind: "list",
                    reason: err.to_string(),
                };
                tracing::warn!(store = source.as_str(), error = %err, "dropping list record");
                None
            }
        })
        .collect()
}
