pub mod engine;
pub mod merge;
pub mod replicator;
pub mod state_machine;

pub use engine::{FirstSyncChoice, ReconcileOutcome, ReconciliationEngine, SyncError};
pub use merge::{ListMerger, MergeReport, MergeResult, RECENT_WINDOW_MS};
pub use replicator::ReplicationHandle;
pub use state_machine::{AuthState, AuthStateMachine, TransitionError};
