//! # probe-foundation
//!
//! Foundation layer shared by the probe engine and the task runner:
//! - Error: the crate-wide `Error` / `Result`
//! - Log: verbosity levels, the explicitly passed `Logger`, tracing setup
//! - Config: `OptionValue`, the typed form of experiment options
//! - Event: the task event vocabulary and the bounded `EventQueue`
//! - Storage: key/value stores for durable state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  probe-task (Layer2)                                     │
//! │  start_task ─▶ TaskRunner ──events──▶ TaskHandle         │
//! │                     │                                    │
//! │                     ▼                                    │
//! │  probe-engine (Layer2)                                   │
//! │  Session ─▶ ExperimentBuilder ─▶ Experiment              │
//! │                     │                                    │
//! │                     ▼                                    │
//! │  probe-foundation (Layer1)                               │
//! │  Error · Logger · OptionValue · EventQueue · KvStore     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod log;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::OptionValue;

// ============================================================================
// Log
// ============================================================================
pub use log::{try_init_tracing, LogLevel, Logger, TracingLogger};

// ============================================================================
// Event
// ============================================================================
pub use event::{Event, EventQueue};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{FileSystemKvStore, KvStore, MemoryKvStore};
