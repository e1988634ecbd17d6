use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::core::{ChangeEnvelope, ChangeEvent, ChangeOrigin};
use crate::models::{DailyStats, Settings, VocabList};
use crate::state::AppState;
use crate::store::ReplicaStore;

/// Outbound writes that have not reached the remote yet.
#[derive(Debug, Default)]
struct PendingWrites {
    lists: BTreeMap<String, VocabList>,
    deletes: BTreeSet<String>,
    settings: Option<Settings>,
    stats: BTreeMap<String, DailyStats>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.deletes.is_empty() && self.settings.is_none() && self.stats.is_empty()
    }

    fn upsert(&mut self, list: VocabList) {
        self.deletes.remove(&list.id);
        self.lists.insert(list.id.clone(), list);
    }

    fn delete(&mut self, id: String) {
        self.lists.remove(&id);
        self.deletes.insert(id);
    }
}

struct Replicator {
    state: AppState,
    remote: Arc<dyn ReplicaStore>,
    user_id: String,
    gate: Arc<AtomicBool>,
    last_seen: Arc<Vec<VocabList>>,
    pending: PendingWrites,
}

impl Replicator {
    fn open(&self) -> bool {
        self.gate.load(Ordering::SeqCst)
    }

    fn queue_full_snapshot(&mut self) {
        let current = self.state.lists();
        let current_ids: BTreeSet<&str> = current.iter().map(|l| l.id.as_str()).collect();
        let vanished: Vec<String> = self
            .last_seen
            .iter()
            .filter(|l| !current_ids.contains(l.id.as_str()))
            .map(|l| l.id.clone())
            .collect();

        for id in vanished {
            self.pending.delete(id);
        }
        for list in current.iter() {
            self.pending.upsert(list.clone());
        }
        self.last_seen = current;
    }

    fn on_event(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::ListsChanged { lists, removed, origin } => {
                if origin == ChangeOrigin::Local {
                    let previous: HashMap<&str, &VocabList> =
                        self.last_seen.iter().map(|l| (l.id.as_str(), l)).collect();
                    let changed: Vec<VocabList> = lists
                        .iter()
                        .filter(|l| previous.get(l.id.as_str()).map_or(true, |p| **p != **l))
                        .cloned()
                        .collect();
                    for list in changed {
                        self.pending.upsert(list);
                    }
                    for id in removed {
                        self.pending.delete(id);
                    }
                }
                self.last_seen = lists;
            }
            ChangeEvent::SettingsChanged { settings, origin } if origin == ChangeOrigin::Local => {
                self.pending.settings = Some(settings);
            }
            ChangeEvent::StatsRecorded { stats, origin } if origin == ChangeOrigin::Local => {
                self.pending.stats.insert(stats.date.clone(), stats);
            }
            _ => {}
        }
    }

    /// Sends everything pending. Failures stay queued for the next event.
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let deletes: Vec<String> = self.pending.deletes.iter().cloned().collect();
        for id in deletes {
            if !self.open() {
                return;
            }
            match self.remote.delete_list(&id).await {
                Ok(()) => {
                    self.pending.deletes.remove(&id);
                }
                Err(err) => {
                    warn!(user_id = %self.user_id, list_id = %id, error = %err, "remote delete failed, will retry");
                }
            }
        }

        if !self.pending.lists.is_empty() {
            if !self.open() {
                return;
            }
            let batch: Vec<VocabList> = self.pending.lists.values().cloned().collect();
            match self.remote.save_lists(&batch).await {
                Ok(()) => {
                    debug!(user_id = %self.user_id, count = batch.len(), "lists replicated");
                    for list in &batch {
                        if self.pending.lists.get(&list.id) == Some(list) {
                            self.pending.lists.remove(&list.id);
                        }
                    }
                }
                Err(err) => {
                    warn!(user_id = %self.user_id, count = batch.len(), error = %err, "remote list save failed, will retry");
                }
            }
        }

        if let Some(settings) = self.pending.settings.clone() {
            if !self.open() {
                return;
            }
            match self.remote.save_settings(&settings).await {
                Ok(()) => self.pending.settings = None,
                Err(err) => warn!(user_id = %self.user_id, error = %err, "remote settings save failed, will retry"),
            }
        }

        let days: Vec<DailyStats> = self.pending.stats.values().cloned().collect();
        for day in days {
            if !self.open() {
                return;
            }
            match self.remote.save_daily_stats(&day).await {
                Ok(()) => {
                    self.pending.stats.remove(&day.date);
                }
                Err(err) => {
                    warn!(user_id = %self.user_id, date = %day.date, error = %err, "remote stats save failed, will retry");
                }
            }
        }
    }

    async fn run(
        mut self,
        mut events: BroadcastStream<ChangeEnvelope>,
        mut shutdown: oneshot::Receiver<()>,
        initial_push: bool,
    ) {
        if initial_push {
            let snapshot = self.state.lists();
            for list in snapshot.iter() {
                self.pending.upsert(list.clone());
            }
            self.flush().await;
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = events.next() => match next {
                    Some(Ok(envelope)) => {
                        self.on_event(envelope.event);
                        self.flush().await;
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(user_id = %self.user_id, skipped, "replicator lagged, resyncing full snapshot");
                        self.queue_full_snapshot();
                        self.pending.settings = Some(self.state.settings());
                        self.flush().await;
                    }
                    None => break,
                },
            }
        }

        debug!(user_id = %self.user_id, pending = !self.pending.is_empty(), "replicator stopped");
    }
}

/// Running outbound replication for one signed-in user.
pub struct ReplicationHandle {
    user_id: String,
    gate: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReplicationHandle {
    /// Subscribes before the task starts so no mutation between spawn and
    /// first poll is missed. With `initial_push` the current collection is
    /// written to the remote before any queued event.
    pub fn spawn(state: AppState, remote: Arc<dyn ReplicaStore>, user_id: &str, initial_push: bool) -> Self {
        let events = BroadcastStream::new(state.bus().subscribe());
        let gate = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let replicator = Replicator {
            last_seen: state.lists(),
            state,
            remote,
            user_id: user_id.to_string(),
            gate: Arc::clone(&gate),
            pending: PendingWrites::default(),
        };
        let task = tokio::spawn(replicator.run(events, shutdown_rx, initial_push));

        info!(user_id = %user_id, "replication started");
        Self {
            user_id: user_id.to_string(),
            gate,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_active(&self) -> bool {
        self.gate.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Closes the gate first, then stops the task. Nothing is dispatched
    /// to the remote after this returns.
    pub async fn teardown(mut self) {
        self.gate.store(false, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.abort();
        let _ = (&mut self.task).await;
        info!(user_id = %self.user_id, "replication stopped");
    }
}

impl Drop for ReplicationHandle {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}
