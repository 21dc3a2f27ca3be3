//! Storage module
//!
//! - `kvstore`: key/value stores for durable session state (file system, memory)

mod kvstore;

pub use kvstore::{get_json, set_json, FileSystemKvStore, KvStore, MemoryKvStore};
