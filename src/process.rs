//! Data structures for tracking process state.
//!
//! This module defines the specification for a process (`ProcessSpec`), its
//! lifecycle state (`ProcessState`), the output pump state (`Capture`), and the read-only view (`ProcessView`)
//! handed to the renderer.

use std::time::Instant;

/// Specification for a process to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Unique name, doubles as the tab label.
    pub shortname: String,
    /// Shell command line, run through `sh -c`.
    pub command: String,
    /// Free-form description shown above the output.
    pub description: String,
}

/// The lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Never started (initial state).
    Idle,
    /// Child spawned and output is being captured.
    Running,
    /// Termination requested, waiting for the child to exit.
    Stopping,
    /// Stopped by the operator. Only `restart` brings it back.
    Stopped,
}

impl ProcessState {
    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
        }
    }
}

/// State of the output pump for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// No pump has run yet.
    Pending,
    /// Reading the child's output.
    Capturing,
    /// The child closed its output streams.
    Closed,
    /// The pump observed the cancellation signal.
    Cancelled,
    /// A read failed; output capture ended early while the child may live on.
    Failed(String),
}

impl Capture {
    pub fn is_lost(&self) -> bool {
        matches!(self, Capture::Failed(_))
    }
}

/// Point-in-time copy of a process, safe to read without any lock.
#[derive(Debug, Clone)]
pub struct ProcessView {
    pub shortname: String,
    pub command: String,
    pub description: String,
    pub output: String,
    pub state: ProcessState,
    pub capture: Capture,
    pub started_at: Option<Instant>,
    pub last_activity: Option<Instant>,
}

impl ProcessView {
    /// Last line of output that is not blank.
    pub fn last_line(&self) -> &str {
        self.output
            .lines()
            .rev()
            .map(str::trim_end)
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }

    /// Whether output arrived within `window` of `now`.
    pub fn active_within(&self, window: std::time::Duration, now: Instant) -> bool {
        self.last_activity
            .map(|at| now.saturating_duration_since(at) < window)
            .unwrap_or(false)
    }
}
