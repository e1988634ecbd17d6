use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{decode_lists, ReplicaStore, StoreKind, StoreResult};
use crate::models::{DailyStats, Settings, VocabList};
use crate::services::stats::date_key;

const VOCAB_KEY: &str = "flashcards-vocab";
const SETTINGS_KEY: &str = "flashcards-settings";
const DAILY_STATS_KEY: &str = "flashcards-daily-stats";
const FORMAT_VERSION: u32 = 0;

#[derive(Debug, Serialize, Deserialize)]
struct Persisted<T> {
    state: T,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VocabState {
    #[serde(default)]
    lists: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsState {
    settings: Settings,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyStatsState {
    #[serde(default)]
    daily_stats: BTreeMap<String, DailyStats>,
}

/// File-backed replica: one JSON document per namespace in `dir`.
pub struct LocalStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Missing or unreadable documents load as `None`.
    async fn read_state<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<Persisted<T>>(&bytes) {
            Ok(persisted) => Ok(Some(persisted.state)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt local document");
                Ok(None)
            }
        }
    }

    async fn write_state<T: Serialize>(&self, key: &str, state: T) -> StoreResult<()> {
        let body = serde_json::to_vec(&Persisted {
            state,
            version: FORMAT_VERSION,
        })?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = body.len(), "local document written");
        Ok(())
    }

    async fn read_lists(&self) -> StoreResult<Vec<VocabList>> {
        let state: Option<VocabState> = self.read_state(VOCAB_KEY).await?;
        Ok(decode_lists(state.unwrap_or_default().lists, StoreKind::Local))
    }

    async fn write_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        let lists = lists
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.write_state(VOCAB_KEY, VocabState { lists }).await
    }

    async fn read_daily_stats(&self) -> StoreResult<BTreeMap<String, DailyStats>> {
        let state: Option<DailyStatsState> = self.read_state(DAILY_STATS_KEY).await?;
        Ok(state.unwrap_or_default().daily_stats)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ReplicaStore for LocalStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    async fn load_lists(&self) -> StoreResult<Vec<VocabList>> {
        self.read_lists().await
    }

    async fn save_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.read_lists().await?;
        for list in lists {
            match current.iter_mut().find(|existing| existing.id == list.id) {
                Some(existing) => *existing = list.clone(),
                None => current.push(list.clone()),
            }
        }
        self.write_lists(&current).await
    }

    async fn replace_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_lists(lists).await
    }

    async fn delete_list(&self, id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.read_lists().await?;
        let before = current.len();
        current.retain(|list| list.id != id);
        if current.len() == before {
            return Ok(());
        }
        self.write_lists(&current).await
    }

    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        let state: Option<SettingsState> = self.read_state(SETTINGS_KEY).await?;
        Ok(state.map(|s| s.settings))
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_state(
            SETTINGS_KEY,
            SettingsState {
                settings: settings.clone(),
            },
        )
        .await
    }

    async fn load_daily_stats(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyStats>> {
        let all = self.read_daily_stats().await?;
        let (start, end) = (date_key(start), date_key(end));
        Ok(all.range(start..=end).map(|(_, day)| day.clone()).collect())
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_daily_stats().await?;
        all.insert(stats.date.clone(), stats.clone());
        self.write_state(DAILY_STATS_KEY, DailyStatsState { daily_stats: all })
            .await
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.remove(VOCAB_KEY).await?;
        self.remove(SETTINGS_KEY).await?;
        self.remove(DAILY_STATS_KEY).await
    }
}
