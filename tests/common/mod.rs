#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Notify;

use vocab_sync::core::ChangeBus;
use vocab_sync::models::{now_ms, DailyStats, NewFlashcard, Settings, VocabList};
use vocab_sync::state::AppState;
use vocab_sync::store::{
    MemoryStore, MemoryStoreFactory, RemoteStoreFactory, ReplicaStore, StoreKind, StoreResult,
};
use vocab_sync::sync::{ListMerger, ReconciliationEngine};

pub struct Harness {
    pub local: Arc<MemoryStore>,
    pub remotes: Arc<MemoryStoreFactory>,
    pub state: AppState,
    pub engine: ReconciliationEngine,
}

/// Hydrated state over an in-memory local replica.
pub async fn harness(local: MemoryStore) -> Harness {
    let local = Arc::new(local);
    let remotes = Arc::new(MemoryStoreFactory::new());
    let state = AppState::new(local.clone(), ChangeBus::default());
    state.hydrate_from_local().await;
    let engine = ReconciliationEngine::new(state.clone(), remotes.clone(), ListMerger::default());
    Harness {
        local,
        remotes,
        state,
        engine,
    }
}

pub fn list_at(id: &str, created_at: i64, last_modified: Option<i64>) -> VocabList {
    VocabList {
        id: id.to_string(),
        name: format!("list {id}"),
        created_at,
        last_modified,
        tags: Vec::new(),
        flashcards: vec![NewFlashcard::new(format!("{id}-src"), format!("{id}-dst")).into_flashcard()],
    }
}

/// A list created long enough ago to fall outside the merge window.
pub fn old_list(id: &str, last_modified: i64) -> VocabList {
    list_at(id, now_ms() - 3_600_000, Some(last_modified))
}

pub fn ids(lists: &[VocabList]) -> Vec<String> {
    lists.iter().map(|l| l.id.clone()).collect()
}

/// Polls until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Remote replica whose `load_lists` parks until [`GatedRemote::release`].
pub struct GatedRemote {
    pub inner: Arc<MemoryStore>,
    entered: Notify,
    gate: Notify,
}

impl GatedRemote {
    pub fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(inner),
            entered: Notify::new(),
            gate: Notify::new(),
        })
    }

    /// Resolves once a `load_lists` call is parked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl ReplicaStore for GatedRemote {
    fn kind(&self) -> StoreKind {
        StoreKind::Remote
    }

    async fn load_lists(&self) -> StoreResult<Vec<VocabList>> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.load_lists().await
    }

    async fn save_lists(&self, lists: &[VocabList]) -> StoreResult<()> {
        self.inner.save_lists(lists).await
    }

    async fn delete_list(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_list(id).await
    }

    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        self.inner.load_settings().await
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.inner.save_settings(settings).await
    }

    async fn load_daily_stats(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<DailyStats>> {
        self.inner.load_daily_stats(start, end).await
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> StoreResult<()> {
        self.inner.save_daily_stats(stats).await
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.inner.clear_all().await
    }
}

/// Hands the same gated replica to every user.
pub struct GatedFactory(pub Arc<GatedRemote>);

impl RemoteStoreFactory for GatedFactory {
    fn for_user(&self, _user_id: &str) -> Arc<dyn ReplicaStore> {
        self.0.clone()
    }
}

/// Hydrated state and engine whose remote loads wait on `remote`'s gate.
pub async fn gated_harness(local: MemoryStore, remote: Arc<GatedRemote>) -> (AppState, ReconciliationEngine) {
    let state = AppState::new(Arc::new(local), ChangeBus::default());
    state.hydrate_from_local().await;
    let engine = ReconciliationEngine::new(state.clone(), Arc::new(GatedFactory(remote)), ListMerger::default());
    (state, engine)
}
