//! Lifecycle state machines.
//!
//! Two independent machines live here:
//!
//! ```text
//! Bridge:   Idle ─▶ Connecting ─▶ Running ─▶ Stopping ─▶ Stopped
//!                        │                      ▲
//!                        └──────────────────────┘   (connect/bind failure)
//!
//! Upstream session:  Connecting ─▶ Open ─▶ Closed
//! ```
//!
//! `Stopping` may be entered from any non-terminal state; entering it twice
//! is rejected so exactly one caller runs the shutdown sequence.

use std::fmt;

use thiserror::Error;

/// Rejected bridge state transition.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid bridge state transition {from} -> {to}")]
pub struct StateError {
    pub from: BridgeState,
    pub to: BridgeState,
}

/// Bridge-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// Constructed, nothing started.
    Idle,
    /// Opening the upstream WebSocket session.
    Connecting,
    /// Listener and both forwarding directions are active.
    Running,
    /// Shutdown sequence in progress.
    Stopping,
    /// Everything released.
    Stopped,
}

impl BridgeState {
    /// Returns `true` when `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Running)
                | (Idle | Connecting | Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the transition is not allowed.
    pub fn transition(self, next: BridgeState) -> Result<BridgeState, StateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StateError {
                from: self,
                to: next,
            })
        }
    }

    /// `Stopping` or `Stopped`.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, BridgeState::Stopping | BridgeState::Stopped)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Upstream WebSocket session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
