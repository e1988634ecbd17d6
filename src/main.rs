use std::process::ExitCode;
use std::sync::Arc;

use vocab_sync::config::Config;
use vocab_sync::core::ChangeBus;
use vocab_sync::logging::init_tracing;
use vocab_sync::models::now_ms;
use vocab_sync::services::progress::compute_progress;
use vocab_sync::state::AppState;
use vocab_sync::store::{HttpRemoteFactory, LocalStore, MemoryStoreFactory, RemoteStoreFactory};
use vocab_sync::sync::{ListMerger, ReconcileOutcome, ReconciliationEngine};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_tracing(&config.log_level, config.log_dir.as_deref());

    let remotes: Arc<dyn RemoteStoreFactory> = match &config.sync.remote_url {
        Some(url) => match HttpRemoteFactory::new(url.clone(), config.sync.remote_token.clone(), config.sync.remote_timeout) {
            Ok(factory) => Arc::new(factory),
            Err(err) => {
                tracing::error!(error = %err, "failed to build remote client");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::warn!("VOCAB_REMOTE_URL not set, replicating to an in-memory store");
            Arc::new(MemoryStoreFactory::new())
        }
    };

    let local = Arc::new(LocalStore::new(&config.data_dir));
    let state = AppState::new(local, ChangeBus::new(config.sync.event_capacity));
    state.hydrate_from_local().await;
    tracing::info!(data_dir = %config.data_dir.display(), lists = state.lists().len(), "local state ready");

    let engine = ReconciliationEngine::new(
        state.clone(),
        remotes,
        ListMerger::new(config.sync.recent_window_ms),
    );

    if let Some(user_id) = config.user_id.as_deref() {
        sign_in(&engine, user_id, &config).await;
    }

    let progress = compute_progress(&state.lists(), &state.daily_stats(), now_ms());
    tracing::info!(
        total_due = progress.total_due,
        weekly_reviews = progress.weekly_reviews,
        current_streak = progress.current_streak,
        new = progress.learning_overview.new,
        learning = progress.learning_overview.learning,
        mature = progress.learning_overview.mature,
        "progress summary"
    );

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    if engine.current_user().await.is_some() {
        if let Err(err) = engine.on_auth_changed(None).await {
            tracing::warn!(error = %err, "sign out failed during shutdown");
        }
    }
    engine.shutdown().await;

    tracing::info!("Graceful shutdown complete");
    ExitCode::SUCCESS
}

async fn sign_in(engine: &ReconciliationEngine, user_id: &str, config: &Config) {
    match engine.on_auth_changed(Some(user_id)).await {
        Ok(ReconcileOutcome::FirstSyncRequired { local_count, .. }) => match config.first_sync {
            Some(choice) => match engine.resolve_first_sync(choice).await {
                Ok(_) => tracing::info!(user_id = %user_id, choice = choice.as_str(), "first sync resolved"),
                Err(err) => tracing::error!(user_id = %user_id, error = %err, "first sync failed"),
            },
            None => tracing::warn!(
                user_id = %user_id,
                local_count,
                "remote is empty; set VOCAB_FIRST_SYNC=adopt|discard to start replicating"
            ),
        },
        Ok(outcome) => tracing::info!(user_id = %user_id, outcome = ?outcome, "signed in"),
        Err(err) => tracing::error!(user_id = %user_id, error = %err, "sign in failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
