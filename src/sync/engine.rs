use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::merge::{is_first_sync, merge_settings, ListMerger, MergeReport};
use super::replicator::ReplicationHandle;
use super::state_machine::{AuthState, AuthStateMachine, AuthTransition, TransitionError};
use crate::core::ChangeOrigin;
use crate::models::{now_ms, Settings, VocabList};
use crate::state::{AppState, Reconciled};
use crate::store::{RemoteStoreFactory, ReplicaStore, StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient store failure: {0}")]
    TransientIo(StoreError),
    #[error("auth state error: {0}")]
    AuthState(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("no first-sync decision is pending")]
    NoPendingDecision,
}

impl SyncError {
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Unauthorized(reason) => SyncError::AuthState(reason),
            other => SyncError::TransientIo(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The requested identity is already active or awaiting a decision.
    Unchanged,
    Merged { user_id: String, report: MergeReport },
    /// Local has lists and the remote has none; call
    /// [`ReconciliationEngine::resolve_first_sync`].
    FirstSyncRequired { user_id: String, local_count: usize },
    FirstSyncResolved { user_id: String, choice: FirstSyncChoice },
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstSyncChoice {
    AdoptLocal,
    DiscardLocal,
}

impl FirstSyncChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirstSyncChoice::AdoptLocal => "adopt",
            FirstSyncChoice::DiscardLocal => "discard",
        }
    }
}

struct PendingFirstSync {
    remote: Arc<dyn ReplicaStore>,
    remote_settings: Option<Settings>,
}

struct EngineInner {
    machine: AuthStateMachine,
    active_user: Option<String>,
    replication: Option<ReplicationHandle>,
    pending_first_sync: Option<PendingFirstSync>,
}

/// Runs one reconciliation per authentication change.
pub struct ReconciliationEngine {
    state: AppState,
    remotes: Arc<dyn RemoteStoreFactory>,
    merger: ListMerger,
    inner: Mutex<EngineInner>,
}

impl ReconciliationEngine {
    pub fn new(state: AppState, remotes: Arc<dyn RemoteStoreFactory>, merger: ListMerger) -> Self {
        Self {
            state,
            remotes,
            merger,
            inner: Mutex::new(EngineInner {
                machine: AuthStateMachine::new(),
                active_user: None,
                replication: None,
                pending_first_sync: None,
            }),
        }
    }

    pub async fn auth_state(&self) -> AuthState {
        self.inner.lock().await.machine.state()
    }

    pub async fn current_user(&self) -> Option<String> {
        self.inner.lock().await.active_user.clone()
    }

    pub async fn history(&self) -> Vec<AuthTransition> {
        self.inner.lock().await.machine.history().cloned().collect()
    }

    pub async fn is_replicating(&self) -> bool {
        self.inner
            .lock()
            .await
            .replication
            .as_ref()
            .map_or(false, ReplicationHandle::is_active)
    }

    pub async fn awaiting_first_sync(&self) -> bool {
        self.inner.lock().await.pending_first_sync.is_some()
    }

    /// Entry point for every identity change. Transitions are serialized by
    /// the engine lock.
    pub async fn on_auth_changed(&self, user_id: Option<&str>) -> Result<ReconcileOutcome, SyncError> {
        let mut inner = self.inner.lock().await;

        if let Some(uid) = user_id {
            if uid.trim().is_empty() {
                return Err(SyncError::AuthState("empty user id".to_string()));
            }
        }
        if inner.active_user.as_deref() == user_id {
            return Ok(ReconcileOutcome::Unchanged);
        }

        if let Some(replication) = inner.replication.take() {
            replication.teardown().await;
        }
        if inner.pending_first_sync.take().is_some() {
            inner.machine.signed_out("first sync abandoned")?;
        }

        match user_id {
            Some(uid) => self.sign_in(&mut inner, uid).await,
            None => self.sign_out(&mut inner).await,
        }
    }

    async fn sign_in(&self, inner: &mut EngineInner, uid: &str) -> Result<ReconcileOutcome, SyncError> {
        inner.machine.begin(format!("sign in {uid}"))?;
        self.state.wait_ready().await;

        let remote = self.remotes.for_user(uid);
        let (remote_lists, remote_settings) = tokio::join!(remote.load_lists(), remote.load_settings());
        let loaded = empty_if_missing(remote_lists)
            .and_then(|lists| Ok((lists, empty_if_missing(remote_settings)?)))
            .map_err(SyncError::from_store);

        let (remote_lists, remote_settings) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(user_id = %uid, error = %err, "reconciliation aborted");
                self.abort(inner, "load failed")?;
                return Err(err);
            }
        };

        // the live collection is read after the remote load so edits made
        // while it was in flight take part in the merge
        let now = now_ms();
        let mut local_count = 0;
        let report = self
            .state
            .reconcile_with(|local, local_settings| {
                if is_first_sync(local, &remote_lists) {
                    local_count = local.len();
                    return None;
                }
                let merged = self.merger.merge(local, &remote_lists, now);
                Some(Reconciled {
                    lists: merged.lists,
                    settings: remote_settings
                        .clone()
                        .map(|remote| merge_settings(local_settings, Some(remote))),
                    value: merged.report,
                })
            })
            .await;

        let Some(report) = report else {
            info!(user_id = %uid, local_count, "first sync needs a decision");
            inner.active_user = Some(uid.to_string());
            inner.pending_first_sync = Some(PendingFirstSync {
                remote,
                remote_settings,
            });
            return Ok(ReconcileOutcome::FirstSyncRequired {
                user_id: uid.to_string(),
                local_count,
            });
        };

        info!(
            user_id = %uid,
            kept_local = report.kept_local,
            took_remote = report.took_remote,
            remote_only = report.remote_only,
            recent_local = report.recent_local,
            dropped_local = report.dropped_local.len(),
            "lists merged"
        );

        inner.replication = Some(ReplicationHandle::spawn(self.state.clone(), remote, uid, true));
        inner.active_user = Some(uid.to_string());
        inner.machine.signed_in("merged")?;

        Ok(ReconcileOutcome::Merged {
            user_id: uid.to_string(),
            report,
        })
    }

    async fn sign_out(&self, inner: &mut EngineInner) -> Result<ReconcileOutcome, SyncError> {
        let previous = inner.active_user.take();
        if inner.machine.state() == AuthState::SignedIn {
            inner.machine.begin("sign out")?;
        }

        let local = self.state.local_store();
        let (lists, settings) = tokio::join!(local.load_lists(), local.load_settings());
        match lists {
            Ok(lists) => self.state.replace_lists(lists, ChangeOrigin::Reload).await,
            Err(err) => warn!(error = %err, "failed to reload local lists after sign out"),
        }
        match settings {
            Ok(settings) => {
                self.state
                    .replace_settings(settings.unwrap_or_default(), ChangeOrigin::Reload)
                    .await
            }
            Err(err) => warn!(error = %err, "failed to reload local settings after sign out"),
        }

        if inner.machine.can_transition_to(AuthState::SignedOut) {
            inner.machine.signed_out("reloaded local")?;
        }
        info!(user_id = ?previous, "signed out");
        Ok(ReconcileOutcome::SignedOut)
    }

    fn abort(&self, inner: &mut EngineInner, reason: &str) -> Result<(), SyncError> {
        inner.active_user = None;
        inner.pending_first_sync = None;
        if inner.machine.can_transition_to(AuthState::SignedOut) {
            inner.machine.signed_out(reason)?;
        }
        Ok(())
    }

    /// Answers a pending first-sync decision. On failure the decision stays
    /// pending so the caller can retry.
    pub async fn resolve_first_sync(&self, choice: FirstSyncChoice) -> Result<ReconcileOutcome, SyncError> {
        let mut inner = self.inner.lock().await;
        let Some(uid) = inner.active_user.clone() else {
            return Err(SyncError::NoPendingDecision);
        };
        let pending = inner
            .pending_first_sync
            .take()
            .ok_or(SyncError::NoPendingDecision)?;

        match choice {
            FirstSyncChoice::AdoptLocal => {
                let lists = self.state.lists();
                let settings = self.state.settings();
                if let Err(err) = push_local(pending.remote.as_ref(), &lists, &settings).await {
                    warn!(user_id = %uid, error = %err, "adopting local data failed");
                    inner.pending_first_sync = Some(pending);
                    return Err(SyncError::from_store(err));
                }
                info!(user_id = %uid, count = lists.len(), "local lists adopted into remote");
            }
            FirstSyncChoice::DiscardLocal => {
                let remote_settings = pending.remote_settings.clone();
                let discarded = self
                    .state
                    .reconcile_with(|local, local_settings| {
                        Some(Reconciled {
                            lists: Vec::new(),
                            settings: remote_settings.map(|remote| merge_settings(local_settings, Some(remote))),
                            value: local.len(),
                        })
                    })
                    .await
                    .unwrap_or_default();
                info!(user_id = %uid, discarded, "local lists discarded");
            }
        }

        inner.replication = Some(ReplicationHandle::spawn(self.state.clone(), pending.remote, &uid, false));
        inner.machine.signed_in(format!("first sync {}", choice.as_str()))?;

        Ok(ReconcileOutcome::FirstSyncResolved { user_id: uid, choice })
    }

    /// Stops replication without touching state.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(replication) = inner.replication.take() {
            replication.teardown().await;
        }
    }
}

fn empty_if_missing<T: Default>(result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Err(err) if err.is_not_found() => Ok(T::default()),
        other => other,
    }
}

async fn push_local(remote: &dyn ReplicaStore, lists: &[VocabList], settings: &Settings) -> StoreResult<()> {
    remote.save_lists(lists).await?;
    remote.save_settings(settings).await
}
