//! Event definitions for the application event loop.
//!
//! This module defines the `Event` enum, the closed set of inputs that drive the
//! UI state machine: keystrokes, terminal resizes, process lifecycle reports,
//! the periodic tick and external shutdown signals.

use crossterm::event::KeyEvent;

/// Which supervised group an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A long-running process (has a tab).
    Process(usize),
    /// An on-demand shortcut command.
    Command(usize),
}

/// Represents an event in the application's main event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize { width: u16, height: u16 },
    /// A process was spawned and its output is being captured.
    ProcessStarted { target: Target },
    /// A process could not be started. Not fatal.
    ProcessStartFailed { target: Target, error: String },
    /// A process produced output or changed state.
    ProcessUpdated { target: Target },
    /// Periodic refresh.
    Tick,
    /// SIGINT or SIGTERM delivered to the dashboard itself.
    Shutdown,
}
