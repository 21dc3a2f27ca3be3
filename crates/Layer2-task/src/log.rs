//! Task logger
//!
//! Every message goes to `tracing` tagged with the task id and the time since
//! the task started. Messages at or above the configured level are also
//! emitted as `log` events.

use crate::emitter::Emitter;
use probe_foundation::{Event, LogLevel, Logger};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct TaskLogger {
    level: LogLevel,
    emitter: Emitter,
    started: Instant,
}

impl TaskLogger {
    pub fn new(level: LogLevel, emitter: Emitter, started: Instant) -> Self {
        Self {
            level,
            emitter,
            started,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

impl Logger for TaskLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let task_id = self.emitter.task_id();
        let elapsed = self.started.elapsed().as_secs_f64();
        match level {
            LogLevel::Debug => debug!(%task_id, elapsed, "{}", message),
            LogLevel::Info => info!(%task_id, elapsed, "{}", message),
            LogLevel::Warning => warn!(%task_id, elapsed, "{}", message),
            LogLevel::Err => error!(%task_id, elapsed, "{}", message),
        }
        if self.level.allows(level) {
            self.emitter.emit(Event::log(level, message));
        }
    }
}
