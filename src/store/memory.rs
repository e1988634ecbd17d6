use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use super::{RemoteStoreFactory, ReplicaStore, StoreError, StoreKind, StoreResult};
use crate::models::{DailyStats, Settings, VocabList};
use crate::services::stats::date_key;

/// Failure a test can inject into a `MemoryStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    NotFound,
    Transport,
    Unauthorized,
}

impl FailureMode {
    fn to_error(self, op: &str) -> StoreError {
        match self {
            FailureMode::NotFound => StoreError::NotFound(op.to_string()),
            FailureMode::Transport => StoreError::Unavailable(format!("{op}: injected transport failure")),
            FailureMode::Unauthorized => StoreError::Unauthorized(op.to_string()),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    lists: Vec<VocabList>,
    settings: Option<Settings>,
    daily_stats: BTreeMap<String, DailyStats>,
    fail_loads: Option<FailureMode>,
    fail_writes: Option<FailureMode>,
}

/// In-process replica. The remote flavor strips the settings secret the
/// same way the HTTP store does.
pub struct MemoryStore {
    kind: StoreKind,
    state: Mutex<MemoryState>,
    loads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            state: Mutex::new(MemoryState::default()),
            loads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn local() -> Self {
        Self::new(StoreKind::Local)
    }

    pub fn remote() -> Self {
        Self::new(StoreKind::Remote)
    }

    pub fn with_lists(self, lists: Vec<VocabList>) -> Self {
        self.state.lock().lists = lists;
        self
    }

    pub fn with_settings(self, settings: Settings) -> Self {
        self.state.lock().settings = Some(self.stored_settings(&settings));
        self
    }

    pub fn fail_loads(&self, mode: Option<FailureMode>) {
        self.state.lock().fail_loads = mode;
    }

    pub fn fail_writes(&self, mode: Option<FailureMode>) {
        self.state.lock().fail_writes = mode;
    }

    pub fn lists_snapshot(&self) -> Vec<VocabList> {
        self.state.lock().lists.clone()
    }

    pub fn settings_snapshot(&self) -> Option<Settings> {
        self.state.lock().settings.clone()
    }

    pub fn daily_stats_snapshot(&self) -> Vec<DailyStats> {
        self.state.lock().daily_stats.values().cloned().collect()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn stored_settings(&self, settings: &Settings) -> Settings {
        match self.kind {
            StoreKind::Local => settings.clone(),
            StoreKind::Remote => settings.without_secret(),
        }
    }

    fn begin_load(&self, op: &str) -> StoreResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().fail_loads {
            Some(mode) => Err(mode.to_error(op)),
            None => Ok(()),
        }
    }

    fn begin_write(&self, op: &str) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().fail_writes {
            Some(mode) => Err(mode.to_error(op)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReplicaStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn load_lists(&self) -> StoreResult<Vec<VocabList>> {
        self.begin_load("load_lists")?;
        Ok(self.state.lock().lists.clone())
    }

    async fn save_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        self.begin_write("save_lists")?;
        let mut state = self.state.lock();
        for list in lists {
            match state.lists.iter().position(|existing| existing.id == list.id) {
                Some(index) => state.lists[index] = list.clone(),
                None => state.lists.push(list.clone()),
            }
        }
        Ok(())
    }

    async fn replace_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        self.begin_write("replace_lists")?;
        self.state.lock().lists = lists.to_vec();
        Ok(())
    }

    async fn delete_list(&self, id: &str) -> StoreResult<()> {
        self.begin_write("delete_list")?;
        self.state.lock().lists.retain(|list| list.id != id);
        Ok(())
    }

    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        self.begin_load("load_settings")?;
        Ok(self.state.lock().settings.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.begin_write("save_settings")?;
        let stored = self.stored_settings(settings);
        self.state.lock().settings = Some(stored);
        Ok(())
    }

    async fn load_daily_stats(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyStats>> {
        self.begin_load("load_daily_stats")?;
        let (start, end) = (date_key(start), date_key(end));
        Ok(self
            .state
            .lock()
            .daily_stats
            .range(start..=end)
            .map(|(_, day)| day.clone())
            .collect())
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> StoreResult<()> {
        self.begin_write("save_daily_stats")?;
        self.state
            .lock()
            .daily_stats
            .insert(stats.date.clone(), stats.clone());
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.begin_write("clear_all")?;
        let mut state = self.state.lock();
        state.lists.clear();
        state.settings = None;
        state.daily_stats.clear();
        Ok(())
    }
}

/// Hands out one `MemoryStore` per user id, created on first use.
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or fetches the concrete store, for inspection.
    pub fn store(&self, user_id: &str) -> Arc<MemoryStore> {
        self.stores
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::remote()))
            .clone()
    }

    pub fn insert(&self, user_id: &str, store: MemoryStore) -> Arc<MemoryStore> {
        let store = Arc::new(store);
        self.stores
            .lock()
            .insert(user_id.to_string(), Arc::clone(&store));
        store
    }
}

impl RemoteStoreFactory for MemoryStoreFactory {
    fn for_user(&self, user_id: &str) -> Arc<dyn ReplicaStore> {
        self.store(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_flavor_strips_secret() {
        let store = MemoryStore::remote();
        let settings = Settings {
            api_key: "secret".into(),
            ..Settings::default()
        };
        store.save_settings(&settings).await.unwrap();
        assert_eq!(store.settings_snapshot().unwrap().api_key, "");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::local();
        store.fail_loads(Some(FailureMode::NotFound));
        assert!(store.load_lists().await.unwrap_err().is_not_found());

        store.fail_loads(None);
        store.fail_writes(Some(FailureMode::Transport));
        let err = store.save_lists(&[]).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_factory_returns_same_store_per_user() {
        let factory = MemoryStoreFactory::new();
        let list = VocabList::new("Verbs", vec![], 1);
        factory.for_user("u1").save_list(&list).await.unwrap();

        assert_eq!(factory.store("u1").lists_snapshot().len(), 1);
        assert!(factory.store("u2").lists_snapshot().is_empty());
    }
}
