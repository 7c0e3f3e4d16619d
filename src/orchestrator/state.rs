//! Application lifecycle states.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Initializing,
    Ready,
    ShuttingDown,
    Terminated,
}

/// Why the orchestration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Explicit quit request from a window or signal.
    Quit,
    /// Platform convention: the last window was closed.
    AllWindowsClosed,
}

#[derive(Debug, Error)]
#[error("invalid app state transition: {from:?} -> {to:?}")]
pub struct InvalidAppTransition {
    pub from: AppState,
    pub to: AppState,
}

pub struct AppStateMachine {
    state: AppState,
}

impl Default for AppStateMachine {
    fn default() -> Self {
        Self {
            state: AppState::Initializing,
        }
    }
}

impl AppStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> AppState {
        self.state
    }

    pub fn can_transition(&self, to: AppState) -> bool {
        use AppState::*;
        matches!(
            (self.state, to),
            (Initializing, Ready)
                | (Initializing, ShuttingDown)
                | (Ready, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }

    pub fn transition(&mut self, to: AppState) -> Result<(), InvalidAppTransition> {
        if self.can_transition(to) {
            tracing::debug!("app state: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(InvalidAppTransition {
                from: self.state,
                to,
            })
        }
    }
}
