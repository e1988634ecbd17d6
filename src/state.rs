use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::core::{ChangeBus, ChangeEvent, ChangeOrigin};
use crate::models::{
    now_ms, DailyStats, Flashcard, FlashcardPatch, ListPatch, NewFlashcard, RetentionState, Settings,
    SettingsPatch, StudyDirection, VocabList,
};
use crate::services::stats::{self, DailyStatsMap};
use crate::store::ReplicaStore;

const STATS_HYDRATE_DAYS: i64 = 365;

/// Replacement state computed by [`AppState::reconcile_with`].
#[derive(Debug)]
pub struct Reconciled<T> {
    pub lists: Vec<VocabList>,
    /// `None` keeps the current settings.
    pub settings: Option<Settings>,
    pub value: T,
}

fn removed_ids(previous: &[VocabList], next: &[VocabList]) -> Vec<String> {
    previous
        .iter()
        .filter(|old| !next.iter().any(|l| l.id == old.id))
        .map(|old| old.id.clone())
        .collect()
}

/// Owner of the in-memory collection.
///
/// Readers get immutable `Arc` snapshots. Every mutation swaps the snapshot
/// under the write lock, publishes a `ChangeEvent` while still holding it so
/// subscribers see changes in commit order, and then persists to the local
/// replica.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    local: Arc<dyn ReplicaStore>,
    bus: ChangeBus,
    lists: RwLock<Arc<Vec<VocabList>>>,
    settings: RwLock<Settings>,
    daily_stats: RwLock<DailyStatsMap>,
    ready: watch::Sender<bool>,
    persist_lock: Mutex<()>,
}

impl AppState {
    pub fn new(local: Arc<dyn ReplicaStore>, bus: ChangeBus) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(AppStateInner {
                local,
                bus,
                lists: RwLock::new(Arc::new(Vec::new())),
                settings: RwLock::new(Settings::default()),
                daily_stats: RwLock::new(DailyStatsMap::new()),
                ready,
                persist_lock: Mutex::new(()),
            }),
        }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.inner.bus
    }

    pub fn local_store(&self) -> Arc<dyn ReplicaStore> {
        Arc::clone(&self.inner.local)
    }

    // ========== Readiness ==========

    /// Startup load from the local replica. Always opens the readiness
    /// barrier, even when the load fails, so reconciliation is never stuck.
    pub async fn hydrate_from_local(&self) {
        let local = &self.inner.local;
        let today = stats::day_of(now_ms());
        let (lists, settings, daily) = tokio::join!(
            local.load_lists(),
            local.load_settings(),
            local.load_daily_stats(today - Duration::days(STATS_HYDRATE_DAYS), today),
        );

        match lists {
            Ok(lists) => {
                info!(count = lists.len(), "local lists hydrated");
                *self.inner.lists.write() = Arc::new(lists);
            }
            Err(err) => warn!(error = %err, "failed to hydrate local lists"),
        }
        match settings {
            Ok(settings) => *self.inner.settings.write() = settings.unwrap_or_default(),
            Err(err) => warn!(error = %err, "failed to hydrate local settings"),
        }
        match daily {
            Ok(days) => {
                *self.inner.daily_stats.write() =
                    days.into_iter().map(|day| (day.date.clone(), day)).collect();
            }
            Err(err) => warn!(error = %err, "failed to hydrate daily stats"),
        }

        self.inner.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub async fn wait_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        // the sender lives as long as self, so this only returns once ready
        let _ = ready.wait_for(|ready| *ready).await;
    }

    // ========== Reads ==========

    pub fn lists(&self) -> Arc<Vec<VocabList>> {
        Arc::clone(&self.inner.lists.read())
    }

    pub fn list(&self, id: &str) -> Option<VocabList> {
        self.inner.lists.read().iter().find(|l| l.id == id).cloned()
    }

    pub fn settings(&self) -> Settings {
        self.inner.settings.read().clone()
    }

    pub fn daily_stats(&self) -> DailyStatsMap {
        self.inner.daily_stats.read().clone()
    }

    pub fn all_tags(&self) -> Vec<String> {
        let lists = self.lists();
        let tags: BTreeSet<&String> = lists
            .iter()
            .flat_map(|l| l.tags.iter().chain(l.flashcards.iter().flat_map(|c| c.tags.iter())))
            .collect();
        tags.into_iter().cloned().collect()
    }

    pub fn list_tags(&self) -> Vec<String> {
        let lists = self.lists();
        let tags: BTreeSet<&String> = lists.iter().flat_map(|l| l.tags.iter()).collect();
        tags.into_iter().cloned().collect()
    }

    pub fn flashcard_tags(&self) -> Vec<String> {
        let lists = self.lists();
        let tags: BTreeSet<&String> = lists
            .iter()
            .flat_map(|l| l.flashcards.iter().flat_map(|c| c.tags.iter()))
            .collect();
        tags.into_iter().cloned().collect()
    }

    // ========== List mutations ==========

    /// Runs `mutate` on a copy of the collection and commits it when it
    /// returns `Some`. The second tuple element names removed list ids.
    async fn commit_lists<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<VocabList>) -> Option<(T, Vec<String>)>,
    ) -> Option<T> {
        let value = {
            let mut guard = self.inner.lists.write();
            let mut next = (**guard).clone();
            let (value, removed) = mutate(&mut next)?;
            let snapshot = Arc::new(next);
            *guard = Arc::clone(&snapshot);
            self.inner.bus.publish(ChangeEvent::ListsChanged {
                lists: snapshot,
                removed,
                origin: ChangeOrigin::Local,
            });
            value
        };
        self.persist_lists().await;
        Some(value)
    }

    async fn persist_lists(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = self.lists();
        if let Err(err) = self.inner.local.replace_lists(&snapshot).await {
            warn!(error = %err, count = snapshot.len(), "failed to persist lists locally");
        }
    }

    async fn persist_settings(&self) {
        let _guard = self.inner.persist_lock.lock().await;
        let settings = self.settings();
        if let Err(err) = self.inner.local.save_settings(&settings).await {
            warn!(error = %err, "failed to persist settings locally");
        }
    }

    pub async fn create_list(&self, name: impl Into<String>, tags: Vec<String>) -> VocabList {
        let list = VocabList::new(name, tags, now_ms());
        let created = list.clone();
        self.commit_lists(move |lists| {
            lists.push(list);
            Some(((), Vec::new()))
        })
        .await;
        debug!(list_id = %created.id, "list created");
        created
    }

    pub async fn update_list(&self, id: &str, patch: ListPatch) -> Option<VocabList> {
        let now = now_ms();
        self.commit_lists(|lists| {
            let list = lists.iter_mut().find(|l| l.id == id)?;
            if let Some(name) = patch.name {
                list.name = name;
            }
            if let Some(tags) = patch.tags {
                list.tags = tags;
            }
            list.touch(now);
            Some((list.clone(), Vec::new()))
        })
        .await
    }

    pub async fn delete_list(&self, id: &str) -> bool {
        self.commit_lists(|lists| {
            let index = lists.iter().position(|l| l.id == id)?;
            lists.remove(index);
            Some(((), vec![id.to_string()]))
        })
        .await
        .is_some()
    }

    pub async fn add_flashcard(&self, list_id: &str, card: NewFlashcard) -> Option<Flashcard> {
        self.add_flashcards(list_id, vec![card])
            .await
            .and_then(|mut added| added.pop())
    }

    pub async fn add_flashcards(&self, list_id: &str, cards: Vec<NewFlashcard>) -> Option<Vec<Flashcard>> {
        let now = now_ms();
        self.commit_lists(|lists| {
            let list = lists.iter_mut().find(|l| l.id == list_id)?;
            let added: Vec<Flashcard> = cards.into_iter().map(NewFlashcard::into_flashcard).collect();
            list.flashcards.extend(added.iter().cloned());
            list.touch(now);
            Some((added, Vec::new()))
        })
        .await
    }

    pub async fn update_flashcard(&self, list_id: &str, card_id: &str, patch: FlashcardPatch) -> Option<Flashcard> {
        let now = now_ms();
        self.commit_lists(|lists| {
            let list = lists.iter_mut().find(|l| l.id == list_id)?;
            let card = list.flashcard_mut(card_id)?;
            patch.apply_to(card);
            let updated = card.clone();
            list.touch(now);
            Some((updated, Vec::new()))
        })
        .await
    }

    pub async fn delete_flashcard(&self, list_id: &str, card_id: &str) -> bool {
        let now = now_ms();
        self.commit_lists(|lists| {
            let list = lists.iter_mut().find(|l| l.id == list_id)?;
            let index = list.flashcards.iter().position(|c| c.id == card_id)?;
            list.flashcards.remove(index);
            list.touch(now);
            Some(((), Vec::new()))
        })
        .await
        .is_some()
    }

    /// Upserts by id; an imported list replaces any list with the same id.
    pub async fn import_lists(&self, imported: Vec<VocabList>) -> usize {
        if imported.is_empty() {
            return 0;
        }
        let count = imported.len();
        self.commit_lists(move |lists| {
            for list in imported {
                match lists.iter().position(|l| l.id == list.id) {
                    Some(index) => lists[index] = list,
                    None => lists.push(list),
                }
            }
            Some(((), Vec::new()))
        })
        .await;
        info!(count, "lists imported");
        count
    }

    pub async fn clear_all(&self) {
        self.commit_lists(|lists| {
            let removed = lists.drain(..).map(|l| l.id).collect();
            Some(((), removed))
        })
        .await;
    }

    /// Stores a freshly scheduled retention state and bumps the owning list
    /// in the same commit.
    pub async fn apply_review(
        &self,
        list_id: &str,
        card_id: &str,
        direction: StudyDirection,
        state: RetentionState,
        now: i64,
    ) -> Option<Flashcard> {
        self.commit_lists(|lists| {
            let list = lists.iter_mut().find(|l| l.id == list_id)?;
            let card = list.flashcard_mut(card_id)?;
            card.set_retention(direction, state);
            let updated = card.clone();
            list.touch(now);
            Some((updated, Vec::new()))
        })
        .await
    }

    /// Installs a collection produced by reconciliation. `Merge` results are
    /// persisted locally; `Reload` came from the local replica already.
    pub async fn replace_lists(&self, lists: Vec<VocabList>, origin: ChangeOrigin) {
        {
            let mut guard = self.inner.lists.write();
            let snapshot = Arc::new(lists);
            let removed = removed_ids(&guard, &snapshot);
            self.inner.bus.publish(ChangeEvent::ListsChanged {
                lists: Arc::clone(&snapshot),
                removed,
                origin,
            });
            *guard = snapshot;
        }
        if origin == ChangeOrigin::Merge {
            self.persist_lists().await;
        }
    }

    /// Reads the live lists and settings, lets `reconcile` derive their
    /// replacements, and installs both in one write section so no local
    /// mutation can land between the read and the swap. Nothing changes when
    /// `reconcile` returns `None`.
    pub async fn reconcile_with<T>(
        &self,
        reconcile: impl FnOnce(&[VocabList], &Settings) -> Option<Reconciled<T>>,
    ) -> Option<T> {
        let (value, settings_changed) = {
            let mut lists = self.inner.lists.write();
            let mut settings = self.inner.settings.write();
            let reconciled = reconcile(&lists, &settings)?;

            let snapshot = Arc::new(reconciled.lists);
            let removed = removed_ids(&lists, &snapshot);
            *lists = Arc::clone(&snapshot);
            self.inner.bus.publish(ChangeEvent::ListsChanged {
                lists: snapshot,
                removed,
                origin: ChangeOrigin::Merge,
            });

            let settings_changed = reconciled.settings.is_some();
            if let Some(merged) = reconciled.settings {
                *settings = merged;
                self.inner.bus.publish(ChangeEvent::SettingsChanged {
                    settings: settings.clone(),
                    origin: ChangeOrigin::Merge,
                });
            }
            (reconciled.value, settings_changed)
        };

        self.persist_lists().await;
        if settings_changed {
            self.persist_settings().await;
        }
        Some(value)
    }

    // ========== Settings ==========

    pub async fn update_settings(&self, patch: SettingsPatch) -> Settings {
        let updated = {
            let mut guard = self.inner.settings.write();
            patch.apply_to(&mut guard);
            self.inner.bus.publish(ChangeEvent::SettingsChanged {
                settings: guard.clone(),
                origin: ChangeOrigin::Local,
            });
            guard.clone()
        };
        self.persist_settings().await;
        updated
    }

    pub async fn reset_settings(&self) -> Settings {
        self.replace_settings(Settings::default(), ChangeOrigin::Local)
            .await;
        Settings::default()
    }

    pub async fn replace_settings(&self, settings: Settings, origin: ChangeOrigin) {
        {
            let mut guard = self.inner.settings.write();
            *guard = settings;
            self.inner.bus.publish(ChangeEvent::SettingsChanged {
                settings: guard.clone(),
                origin,
            });
        }
        if origin != ChangeOrigin::Reload {
            self.persist_settings().await;
        }
    }

    // ========== Statistics ==========

    pub async fn record_review(&self, list_id: &str, is_correct: bool, date: NaiveDate) -> DailyStats {
        let day = {
            let mut guard = self.inner.daily_stats.write();
            let day = stats::record_review(&mut guard, date, list_id, is_correct);
            self.inner.bus.publish(ChangeEvent::StatsRecorded {
                stats: day.clone(),
                origin: ChangeOrigin::Local,
            });
            day
        };

        let _guard = self.inner.persist_lock.lock().await;
        if let Err(err) = self.inner.local.save_daily_stats(&day).await {
            warn!(error = %err, date = %day.date, "failed to persist daily stats locally");
        }
        day
    }
}
