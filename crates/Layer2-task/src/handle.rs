//! Task handle
//!
//! `start_task` decodes the settings, spawns a dedicated thread with its own
//! single-threaded Tokio runtime and returns immediately. The host then pulls
//! events until it sees `task_terminated`.

use crate::emitter::Emitter;
use crate::runner::TaskRunner;
use crate::settings::Settings;
use crate::state::{TaskState, TaskStatus};
use crate::task::{TaskEnvironment, TaskId};
use probe_foundation::event::DEFAULT_CAPACITY;
use probe_foundation::{Event, EventQueue, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Start a task with in-process backends
///
/// Fails only when `settings` is not a valid settings document; every other
/// problem is reported through the event stream.
pub fn start_task(settings: &str) -> Result<TaskHandle> {
    start_task_with(settings, TaskEnvironment::default())
}

/// Start a task against the given backends
pub fn start_task_with(settings: &str, environment: TaskEnvironment) -> Result<TaskHandle> {
    let settings = Settings::decode(settings)?;

    let id = TaskId::new();
    let queue = Arc::new(EventQueue::with_capacity(DEFAULT_CAPACITY));
    let state = Arc::new(TaskState::new());
    let cancel = CancellationToken::new();
    let emitter = Emitter::new(id, Arc::clone(&queue));

    let runner = TaskRunner::new(
        settings,
        environment,
        emitter.clone(),
        Arc::clone(&state),
        cancel.clone(),
    );

    let thread_queue = Arc::clone(&queue);
    let thread_state = Arc::clone(&state);
    let spawned = std::thread::Builder::new()
        .name(format!("probe-task-{}", id))
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(runner.run()),
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Cannot create runtime");
                    TaskRunner::abort_before_start(
                        &emitter,
                        &format!("cannot create runtime: {}", e),
                    );
                }
            }
            thread_state.set_finished();
            thread_queue.close();
        });

    if let Err(e) = spawned {
        warn!(task_id = %id, error = %e, "Cannot spawn task thread");
        let emitter = Emitter::new(id, Arc::clone(&queue));
        TaskRunner::abort_before_start(&emitter, &format!("cannot spawn task thread: {}", e));
        state.set_finished();
        queue.close();
    }

    debug!(task_id = %id, "Task spawned");
    Ok(TaskHandle {
        id,
        queue,
        state,
        cancel,
    })
}

/// Host-side handle of a running task
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    queue: Arc<EventQueue>,
    state: Arc<TaskState>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the runner is still producing events
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Whether `task_terminated` has been pulled
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Block until the next event
    ///
    /// Returns `None` once the stream is exhausted, i.e. after
    /// `task_terminated` has been returned.
    pub fn wait_for_next_event(&self) -> Option<Event> {
        let event = self.queue.pop()?;
        self.observe(&event);
        Some(event)
    }

    /// Like `wait_for_next_event`, giving up after `timeout`
    pub fn wait_for_next_event_timeout(&self, timeout: Duration) -> Option<Event> {
        let event = self.queue.pop_timeout(timeout)?;
        self.observe(&event);
        Some(event)
    }

    /// Next event in its `{key, value}` JSON form
    pub fn wait_for_next_event_json(&self) -> Option<String> {
        self.wait_for_next_event().map(|event| event.to_json())
    }

    /// Ask the task to stop
    ///
    /// The measurement in flight completes (or returns early, if the
    /// experiment supports it); no further input is measured. Repeated calls
    /// and calls after termination do nothing.
    pub fn interrupt(&self) {
        if self.state.request_interrupt() {
            debug!(task_id = %self.id, "Interrupt requested");
            self.cancel.cancel();
        }
    }

    fn observe(&self, event: &Event) {
        if event.is_terminal() {
            self.state.set_done();
        }
    }
}

/// Dropping the handle stops the task; events no longer have a reader, so the
/// queue is closed and the runner stops blocking on it.
impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.state.is_running() {
            self.interrupt();
        }
        self.queue.close();
    }
}
