//! Task state flags
//!
//! Shared between the runner thread and the handle. `running` is cleared by
//! the runner once `task_terminated` is queued; `done` is set by the handle
//! when the consumer has pulled that event.

use std::sync::atomic::{AtomicBool, Ordering};

/// Observable phase of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still producing events
    Running,

    /// Interrupt requested, still winding down
    Interrupting,

    /// All events produced, not all consumed
    Finished,

    /// Terminal event consumed
    Done,
}

impl TaskStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }

    /// Check if the runner is still active
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Interrupting)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskStatus::Running => "Running",
            TaskStatus::Interrupting => "Interrupting",
            TaskStatus::Finished => "Finished",
            TaskStatus::Done => "Done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Running / done / interrupted flags
#[derive(Debug)]
pub struct TaskState {
    running: AtomicBool,
    done: AtomicBool,
    interrupted: AtomicBool,
}

impl TaskState {
    /// A task that has just been started
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            done: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_finished(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Returns false if an interrupt was already requested
    pub(crate) fn request_interrupt(&self) -> bool {
        !self.interrupted.swap(true, Ordering::SeqCst)
    }

    pub fn status(&self) -> TaskStatus {
        if self.is_done() {
            TaskStatus::Done
        } else if !self.is_running() {
            TaskStatus::Finished
        } else if self.is_interrupted() {
            TaskStatus::Interrupting
        } else {
            TaskStatus::Running
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let state = TaskState::new();
        assert_eq!(state.status(), TaskStatus::Running);

        assert!(state.request_interrupt());
        assert!(!state.request_interrupt());
        assert_eq!(state.status(), TaskStatus::Interrupting);
        assert!(state.status().is_running());

        state.set_finished();
        assert_eq!(state.status(), TaskStatus::Finished);

        state.set_done();
        assert!(state.status().is_terminal());
        assert_eq!(state.status().to_string(), "Done");
    }
}
