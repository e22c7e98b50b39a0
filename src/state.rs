//! Device lifecycle state machine.
//!
//! ```text
//! Idle <--> Initialized <--> Running
//!            (any) --> Error
//! ```

use std::fmt;

use log::{debug, error};

use crate::error::{CameraError, Result};

/// Lifecycle state of a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Device closed, no buffers allocated.
    #[default]
    Idle,
    /// Device open, format negotiated, buffer pool allocated.
    Initialized,
    /// Buffers queued and streaming.
    Running,
    /// Stall recovery gave up. Only `uninit` leaves this state.
    Error,
}

impl State {
    /// States reachable from `self` through [`Lifecycle::transition`].
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Initialized],
            Self::Initialized => &[Self::Idle, Self::Running],
            Self::Running => &[Self::Initialized],
            Self::Error => &[],
        }
    }

    /// Whether the transition table lists `self -> target`.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Initialized => "Initialized",
            Self::Running => "Running",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Holds the current state; every change goes through [`Self::transition`].
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: State,
}

impl Lifecycle {
    /// Current state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Move to `target` if the transition table allows it.
    ///
    /// A transition to the current state is a no-op. Rejected transitions
    /// leave the state unchanged.
    pub fn transition(&mut self, target: State) -> Result<()> {
        debug!("state {} -> {}", self.state, target);

        if self.state == target {
            return Ok(());
        }

        if self.state == State::Error {
            error!("device in error state, {target} refused");
        }

        if !self.state.can_transition_to(target) {
            error!("invalid state transition {} -> {}", self.state, target);
            return Err(CameraError::InvalidStateTransition {
                from: self.state,
                to: target,
            });
        }

        self.state = target;
        Ok(())
    }

    /// Enter the error state from anywhere.
    pub fn fail(&mut self) {
        error!("state {} -> {}", self.state, State::Error);
        self.state = State::Error;
    }

    /// Return to idle from anywhere; used by teardown.
    pub fn reset(&mut self) {
        debug!("state {} -> {} (reset)", self.state, State::Idle);
        self.state = State::Idle;
    }

    /// Fail with `InvalidState` unless the current state is `expected`.
    pub fn require(&self, expected: State, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}
