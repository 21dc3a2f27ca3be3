//! Event System - task events and the queue that carries them
//!
//! ```text
//! ┌──────────────┐   push (blocks when full)   ┌────────────┐   pop (blocks when empty)   ┌──────┐
//! │  TaskRunner  │ ───────────────────────────▶│ EventQueue │ ───────────────────────────▶│ Host │
//! └──────────────┘                             └────────────┘                             └──────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use probe_foundation::event::{Event, EventQueue};
//!
//! let queue = EventQueue::new();
//! queue.push(Event::queued());
//! queue.close();
//!
//! while let Some(event) = queue.pop() {
//!     println!("{}", event.to_json());
//! }
//! ```

pub mod queue;
pub mod types;

pub use queue::{EventQueue, DEFAULT_CAPACITY};

pub use types::{
    Empty, End, Event, Failure, GeoipLookup, LogRecord, MeasurementPayload, MeasurementStatus,
    Progress, ReportCreate, ResolverLookup,
};
