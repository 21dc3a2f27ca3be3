//! # probe-task
//!
//! Runs one measurement experiment as an asynchronous task and exposes its
//! progress as a pull-based stream of events.
//!
//! ```no_run
//! let handle = probe_task::start_task(r#"{
//!     "name": "Example",
//!     "assets_dir": "/tmp/probe/assets",
//!     "state_dir": "/tmp/probe/state",
//!     "options": {"software_name": "probe-cli", "software_version": "0.1.0"}
//! }"#)?;
//! while let Some(event) = handle.wait_for_next_event_json() {
//!     println!("{}", event);
//! }
//! # Ok::<(), probe_task::Error>(())
//! ```

pub mod emitter;
pub mod handle;
pub mod log;
mod runner;
pub mod settings;
pub mod state;
pub mod task;

pub use emitter::Emitter;
pub use handle::{start_task, start_task_with, TaskHandle};
pub use log::TaskLogger;
pub use settings::{validate, Config, Settings, SettingsOptions};
pub use state::{TaskState, TaskStatus};
pub use task::{TaskEnvironment, TaskId};

pub use probe_foundation::{Error, Event, Result};
