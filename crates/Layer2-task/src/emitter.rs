//! Event emission

use crate::task::TaskId;
use probe_foundation::{Event, EventQueue};
use std::sync::Arc;
use tracing::trace;

/// Pushes events into the task queue
#[derive(Debug, Clone)]
pub struct Emitter {
    task_id: TaskId,
    queue: Arc<EventQueue>,
}

impl Emitter {
    pub fn new(task_id: TaskId, queue: Arc<EventQueue>) -> Self {
        Self { task_id, queue }
    }

    /// Blocks while the queue is full
    pub fn emit(&self, event: Event) {
        trace!(task_id = %self.task_id, key = event.key(), "Emit");
        if !self.queue.push(event) {
            trace!(task_id = %self.task_id, "Queue closed, event dropped");
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}
