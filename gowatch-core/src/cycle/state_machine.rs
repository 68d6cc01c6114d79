//! State machine for the watch/build/run cycle

use crate::error::{Result, WatchError};
use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;
use tracing::debug;

/// Number of transitions kept in the history.
pub const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    /// Waiting for a change, no application running.
    Idle,
    Tidying,
    PreBuild,
    Cleaning,
    Building,
    /// Waiting for a change while the application runs.
    Running,
    Closed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Tidying => write!(f, "Tidying Module"),
            Self::PreBuild => write!(f, "Running Prebuild"),
            Self::Cleaning => write!(f, "Cleaning Cache"),
            Self::Building => write!(f, "Building"),
            Self::Running => write!(f, "Running"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CycleState,
    pub to: CycleState,
    pub timestamp: SystemTime,
}

#[derive(Debug)]
pub struct CycleStateMachine {
    current_state: CycleState,
    previous_state: Option<CycleState>,
    history: VecDeque<StateTransition>,
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: CycleState::Idle,
            previous_state: None,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    pub fn current_state(&self) -> CycleState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<CycleState> {
        self.previous_state
    }

    pub fn transition_to(&mut self, new_state: CycleState) -> Result<()> {
        if !Self::is_valid_transition(self.current_state, new_state) {
            return Err(WatchError::StateTransition(format!(
                "Invalid transition from {} to {}",
                self.current_state, new_state
            )));
        }

        debug!("Transitioning from {} to {}", self.current_state, new_state);

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: self.current_state,
            to: new_state,
            timestamp: SystemTime::now(),
        });
        self.previous_state = Some(self.current_state);
        self.current_state = new_state;
        Ok(())
    }

    fn is_valid_transition(from: CycleState, to: CycleState) -> bool {
        use CycleState::*;

        match (from, to) {
            (Idle | Running, Tidying | PreBuild | Cleaning | Building) => true,
            (Idle | Running, Closed | Failed) => true,

            (Tidying, PreBuild | Cleaning | Building) => true,
            // Manifest vanished while tidying.
            (Tidying, Idle | Running) => true,

            (PreBuild, Cleaning | Building) => true,

            (Cleaning, Building) => true,

            (Building, Running | Idle) => true,

            _ => false,
        }
    }

    pub fn get_transition_history(&self) -> Vec<(CycleState, CycleState)> {
        self.history.iter().map(|t| (t.from, t.to)).collect()
    }

    /// When the current state was entered, if it was entered by a transition.
    pub fn entered_at(&self) -> Option<SystemTime> {
        self.history.back().map(|t| t.timestamp)
    }
}
