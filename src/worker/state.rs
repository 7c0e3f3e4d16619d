//! Worker process lifecycle states.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Crashed,
    Stopped,
}

#[derive(Debug, Error)]
#[error("invalid worker state transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: WorkerState,
    pub to: WorkerState,
}

/// Guards the Starting → Running → Crashed/Stopped progression of a single
/// worker lifetime. A new machine is created per spawn.
pub struct WorkerStateMachine {
    state: WorkerState,
}

impl Default for WorkerStateMachine {
    fn default() -> Self {
        Self {
            state: WorkerState::Starting,
        }
    }
}

impl WorkerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> WorkerState {
        self.state
    }

    pub fn can_transition(&self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self.state, to),
            (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopped)
                | (Running, Crashed)
                | (Running, Stopped)
        )
    }

    pub fn transition(&mut self, to: WorkerState) -> Result<(), InvalidTransition> {
        if self.can_transition(to) {
            tracing::debug!("worker state: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to,
            })
        }
    }
}
