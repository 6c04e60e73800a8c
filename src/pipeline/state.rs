//! Receiver lifecycle state

use std::time::Instant;

/// Receiver state machine
///
/// `Idle → Initializing → Running → Stopping → Stopped`; initialization may
/// be aborted straight to `Stopping`. A stopped receiver is not restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,

    /// Socket bound, stages being spawned
    Initializing,

    Running {
        /// When the receiver started running
        started_at: Instant,
    },

    /// Input closed, waiting for stages to drain
    Stopping,

    Stopped,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Initializing) => true,
            (Initializing, Running { .. }) => true,
            (Initializing, Stopping) => true,
            (Running { .. }, Stopping) => true,
            (Stopping, Stopped) => true,
            (Stopped, _) => false,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Initializing => "Initializing",
            PipelineState::Running { .. } => "Running",
            PipelineState::Stopping => "Stopping",
            PipelineState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PipelineState::Running { .. })
    }

    /// Check if the receiver is stopped or stopping
    pub fn is_stopped(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Stopping)
    }

    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
