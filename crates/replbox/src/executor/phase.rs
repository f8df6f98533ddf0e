//! Execution lifecycle state machine
//!
//! Phases advance monotonically except for the bidirectional pair
//! SCRIPT_RUNNING ⇄ WAITING_INPUT. Once COMPLETE, nothing moves.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle phase of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The child has not been spawned yet
    Starting,

    /// The user's script is running
    ScriptRunning,

    /// The script is blocked reading stdin
    WaitingInput,

    /// The script finished cleanly; the interactive loop owns the child
    ReplActive,

    /// Termination has been initiated; the child is being reaped
    Terminating,

    /// The terminal message has been emitted; nothing follows
    Complete,
}

impl Phase {
    /// Whether the execution is in the script phase (output caps and the
    /// wall clock apply here)
    pub fn in_script(self) -> bool {
        matches!(self, Phase::ScriptRunning | Phase::WaitingInput)
    }

    /// Whether no further messages may be emitted
    pub fn is_complete(self) -> bool {
        self == Phase::Complete
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Starting, ScriptRunning)
                | (Starting, Terminating)
                | (ScriptRunning, WaitingInput)
                | (ScriptRunning, ReplActive)
                | (ScriptRunning, Terminating)
                | (WaitingInput, ScriptRunning)
                | (WaitingInput, ReplActive)
                | (WaitingInput, Terminating)
                | (ReplActive, Terminating)
                | (Terminating, Complete)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::ScriptRunning => "script_running",
            Phase::WaitingInput => "waiting_input",
            Phase::ReplActive => "repl_active",
            Phase::Terminating => "terminating",
            Phase::Complete => "complete",
        }
    }
}

/// Tracks the current phase and rejects illegal transitions
#[derive(Debug)]
pub struct PhaseTracker {
    current: Phase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: Phase::Starting,
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Advance to `next` if the transition is legal. Returns whether the
    /// phase changed; illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.current == next {
            return false;
        }
        if !self.current.can_advance_to(next) {
            warn!(
                from = self.current.as_str(),
                to = next.as_str(),
                "ignoring illegal phase transition"
            );
            return false;
        }
        self.current = next;
        true
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
