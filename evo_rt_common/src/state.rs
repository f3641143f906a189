//! Worker lifecycle states.
//!
//! ```text
//! Undefined → Initializing → Running → CleaningUp → Done
//!                  │
//!                  └──────→ Error (terminal)
//! ```
//!
//! Transitions only move forward. `Error` is reachable from `Initializing`
//! alone. Moving a state cell back to `Undefined` is a controller reset, not
//! a transition, and is not covered by [`WorkerState::can_transition_to`].

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of the real-time worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum WorkerState {
    /// Worker thread has not run yet.
    #[default]
    Undefined = 0,
    /// Worker is registering with the real-time kernel.
    Initializing = 1,
    /// Promotion complete, periodic loop active.
    Running = 2,
    /// Loop left, demoting back to non-real-time.
    CleaningUp = 3,
    /// Initialization failed; terminal.
    Error = 4,
    /// Worker has released its task and is returning.
    Done = 5,
}

assert_eq_size!(WorkerState, u8);

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid worker state transition {from} -> {to}")]
pub struct TransitionError {
    /// State the cell was in.
    pub from: WorkerState,
    /// Requested state.
    pub to: WorkerState,
}

impl WorkerState {
    /// All states in declaration order.
    pub const ALL: [WorkerState; 6] = [
        Self::Undefined,
        Self::Initializing,
        Self::Running,
        Self::CleaningUp,
        Self::Error,
        Self::Done,
    ];

    /// Raw discriminant for atomic storage.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a raw discriminant.
    #[inline]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Undefined),
            1 => Some(Self::Initializing),
            2 => Some(Self::Running),
            3 => Some(Self::CleaningUp),
            4 => Some(Self::Error),
            5 => Some(Self::Done),
            _ => None,
        }
    }

    /// Whether `self → next` is a legal forward transition.
    pub const fn can_transition_to(self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (Self::Undefined, Self::Initializing)
                | (Self::Initializing, Self::Running)
                | (Self::Initializing, Self::Error)
                | (Self::Running, Self::CleaningUp)
                | (Self::CleaningUp, Self::Done)
        )
    }

    /// Checked transition.
    pub const fn transition(self, next: WorkerState) -> Result<WorkerState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// No transition leaves this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Done)
    }

    /// Handshake polling stops on this state.
    pub const fn ends_handshake(self) -> bool {
        matches!(self, Self::Running | Self::Error)
    }

    /// Name as printed in reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::CleaningUp => "CleaningUp",
            Self::Error => "Error",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
