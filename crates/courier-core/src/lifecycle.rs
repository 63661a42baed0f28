use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of the receive loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoopState {
    /// Polling the backend and dispatching events.
    Running,
    /// Shutdown requested; the loop exits after the current poll.
    Stopping,
    /// Loop thread joined; no handler runs any more.
    Stopped,
}

impl LoopState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Stopping => 1,
            Self::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot {action} while receive loop is {current:?}")]
pub struct LifecycleError {
    pub current: LoopState,
    pub action: &'static str,
}

/// Thread-safe `Running -> Stopping -> Stopped` state machine.
///
/// Shared between the loop thread, which polls [`LoopLifecycle::is_running`],
/// and the owner that drives shutdown.
#[derive(Debug)]
pub struct LoopLifecycle {
    state: AtomicU8,
}

impl Default for LoopLifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Running.as_u8()),
        }
    }
}

impl LoopLifecycle {
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// `Running -> Stopping`. Only one caller wins.
    pub fn begin_stop(&self) -> Result<(), LifecycleError> {
        self.transition(LoopState::Running, LoopState::Stopping, "begin_stop")
    }

    /// `Stopping -> Stopped`, after the loop thread has been joined.
    pub fn finish_stop(&self) -> Result<(), LifecycleError> {
        self.transition(LoopState::Stopping, LoopState::Stopped, "finish_stop")
    }

    fn transition(
        &self,
        expected: LoopState,
        next: LoopState,
        action: &'static str,
    ) -> Result<(), LifecycleError> {
        self.state
            .compare_exchange(
                expected.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| LifecycleError {
                current: LoopState::from_u8(current),
                action,
            })
    }
}
