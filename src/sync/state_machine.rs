use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::models::now_ms;

/// Where the engine stands with respect to the signed-in identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    SignedOut,
    /// A reconciliation or teardown is running, or a first-sync decision is
    /// outstanding.
    Transitioning,
    SignedIn,
}

impl AuthState {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuthState::SignedOut => "signed_out",
            AuthState::Transitioning => "transitioning",
            AuthState::SignedIn => "signed_in",
        }
    }

    fn leads_to(self, next: AuthState) -> bool {
        match self {
            AuthState::SignedOut | AuthState::SignedIn => next == AuthState::Transitioning,
            AuthState::Transitioning => next != AuthState::Transitioning,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuthTransition {
    pub from: AuthState,
    pub to: AuthState,
    pub reason: String,
    pub at_ms: i64,
}

const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("auth state cannot move from {from} to {to}")]
    Rejected { from: AuthState, to: AuthState },
}

/// Every identity change passes through `Transitioning`; the last
/// `HISTORY_LIMIT` moves are retained for diagnostics.
#[derive(Debug, Default)]
pub struct AuthStateMachine {
    current: AuthState,
    history: VecDeque<AuthTransition>,
}

impl AuthStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.current
    }

    pub fn history(&self) -> impl Iterator<Item = &AuthTransition> + '_ {
        self.history.iter()
    }

    pub fn can_transition_to(&self, target: AuthState) -> bool {
        self.state().leads_to(target)
    }

    fn move_to(&mut self, target: AuthState, reason: String) -> Result<(), TransitionError> {
        let from = self.state();
        if !from.leads_to(target) {
            return Err(TransitionError::Rejected { from, to: target });
        }

        debug!(from = from.as_str(), to = target.as_str(), reason = %reason, "auth state changed");
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(AuthTransition {
            from,
            to: target,
            reason,
            at_ms: now_ms(),
        });
        self.current = target;
        Ok(())
    }

    pub fn begin(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.move_to(AuthState::Transitioning, reason.into())
    }

    pub fn signed_in(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.move_to(AuthState::SignedIn, reason.into())
    }

    pub fn signed_out(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.move_to(AuthState::SignedOut, reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(machine: &AuthStateMachine) -> Vec<&'static str> {
        machine.history().map(|t| t.to.as_str()).collect()
    }

    #[test]
    fn test_sign_in_and_out_cycle() {
        let mut machine = AuthStateMachine::new();
        machine.begin("sign in").unwrap();
        machine.signed_in("merged").unwrap();
        machine.begin("sign out").unwrap();
        machine.signed_out("reloaded").unwrap();

        assert_eq!(machine.state(), AuthState::SignedOut);
        assert_eq!(
            path(&machine),
            vec!["transitioning", "signed_in", "transitioning", "signed_out"]
        );
    }

    #[test]
    fn test_rejects_skipping_transitioning() {
        let mut machine = AuthStateMachine::new();
        let err = machine.signed_in("shortcut").unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Rejected {
                from: AuthState::SignedOut,
                to: AuthState::SignedIn
            }
        ));
        assert_eq!(err.to_string(), "auth state cannot move from signed_out to signed_in");
        assert_eq!(machine.state(), AuthState::SignedOut);
        assert_eq!(machine.history().count(), 0);

        machine.begin("sign in").unwrap();
        assert!(!machine.can_transition_to(AuthState::Transitioning));
    }

    #[test]
    fn test_history_keeps_latest_moves() {
        let mut machine = AuthStateMachine::new();
        for round in 0..120 {
            machine.begin(format!("attempt {round}")).unwrap();
            machine.signed_out("abort").unwrap();
        }
        assert_eq!(machine.history().count(), HISTORY_LIMIT);
        let first = machine.history().next().unwrap();
        assert_eq!(first.reason, "attempt 70");
    }
}
