//! Execution unit lifecycle.
//!
//! Each unit walks INIT → RUNNING → TERMINATING → EXIT. RUNNING loops back
//! onto itself once per admitted round; EXIT is the only terminal state.

use crate::error::{OcError, OcResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Identifies one of the two execution units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// The caller's thread.
    Primary,
    /// The spawned companion thread.
    Secondary,
}

impl Unit {
    /// Numeric id printed in telemetry.
    #[must_use]
    pub fn id(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Lifecycle states of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    /// Unit created; the termination latch is being taken.
    #[default]
    Init,
    /// Executing stress rounds.
    Running,
    /// Round limit exceeded or a round failed; no new rounds start.
    Terminating,
    /// Latch released; the unit has ended.
    Exit,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Running => write!(f, "RUNNING"),
            Self::Terminating => write!(f, "TERMINATING"),
            Self::Exit => write!(f, "EXIT"),
        }
    }
}

impl UnitState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: UnitState) -> bool {
        use UnitState::{Exit, Init, Running, Terminating};

        matches!(
            (self, target),
            (Init, Running)
                | (Running, Running)
                | (Running, Terminating)
                // Limit already exceeded when the unit first checks
                | (Init, Terminating)
                | (Terminating, Exit)
        )
    }

    /// Returns true once the unit can no longer start rounds.
    #[must_use]
    pub fn is_winding_down(&self) -> bool {
        matches!(self, Self::Terminating | Self::Exit)
    }
}

/// State machine wrapper that tracks how many rounds were entered.
#[derive(Debug, Clone)]
pub struct UnitStateMachine {
    unit: Unit,
    current: UnitState,
    transition_count: u64,
    rounds_entered: u64,
}

impl UnitStateMachine {
    /// Create a state machine for `unit`, starting in INIT.
    #[must_use]
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            current: UnitState::Init,
            transition_count: 0,
            rounds_entered: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.current
    }

    /// Get the unit this machine belongs to.
    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Number of times RUNNING was entered.
    #[must_use]
    pub fn rounds_entered(&self) -> u64 {
        self.rounds_entered
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: UnitState) -> OcResult<()> {
        if !self.current.can_transition_to(target) {
            return Err(OcError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        trace!(unit = %self.unit, from = %self.current, to = %target, "Unit transition");
        if target == UnitState::Running {
            self.rounds_entered += 1;
        }
        self.current = target;
        self.transition_count += 1;
        Ok(())
    }

    /// Move to TERMINATING from wherever the unit currently is.
    ///
    /// No-op if the unit is already winding down.
    pub fn wind_down(&mut self) {
        if !self.current.is_winding_down() {
            self.current = UnitState::Terminating;
            self.transition_count += 1;
        }
    }
}
