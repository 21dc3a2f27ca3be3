//! Byte accounting
//!
//! Counters only ever grow. An experiment counter is created as a child of the
//! session counter, so every byte charged to the experiment is also charged to
//! the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Received/sent byte totals
#[derive(Debug, Default)]
pub struct ByteCounter {
    received: AtomicU64,
    sent: AtomicU64,
    parent: Option<Arc<ByteCounter>>,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter that also charges `parent`
    pub fn child_of(parent: Arc<ByteCounter>) -> Self {
        Self {
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            parent: Some(parent),
        }
    }

    pub fn count_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.count_received(bytes);
        }
    }

    pub fn count_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.count_sent(bytes);
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn kibibytes_received(&self) -> f64 {
        self.bytes_received() as f64 / 1024.0
    }

    pub fn kibibytes_sent(&self) -> f64 {
        self.bytes_sent() as f64 / 1024.0
    }
}
