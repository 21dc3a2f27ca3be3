//! Event Queue - bounded, ordered hand-off between a task and its host
//!
//! One producer (the task runner) pushes, one consumer (the host polling loop)
//! pops. Both sides block: the consumer until an event is available, the
//! producer while the queue is full. Events are never dropped, merged or
//! reordered, so a consumer that stops polling eventually stalls the producer.

use super::types::Event;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Default queue capacity
///
/// Comfortably above the event count of a single-input run.
pub const DEFAULT_CAPACITY: usize = 128;

struct Inner {
    events: VecDeque<Event>,
    closed: bool,
}

/// Bounded blocking FIFO of task events
pub struct EventQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl EventQueue {
    /// Queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Queue with a custom capacity (at least one slot)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an event, blocking while the queue is full
    ///
    /// Returns `false` if the queue was closed; the event is not enqueued.
    pub fn push(&self, event: Event) -> bool {
        let mut inner = self.inner.lock();
        while inner.events.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return false;
        }
        inner.events.push_back(event);
        self.not_empty.notify_one();
        true
    }

    /// Mark the producer side as finished
    ///
    /// Already queued events stay available; blocked consumers wake up once the
    /// queue drains.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Remove the oldest event, blocking until one is available
    ///
    /// Returns `None` only once the queue is closed and empty.
    pub fn pop(&self) -> Option<Event> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.events.pop_front() {
                self.not_full.notify_one();
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Like `pop`, giving up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Event> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.events.pop_front() {
                self.not_full.notify_one();
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            if self.not_empty.wait_for(&mut inner, timeout).timed_out() {
                let event = inner.events.pop_front();
                if event.is_some() {
                    self.not_full.notify_one();
                }
                return event;
            }
        }
    }

    /// Remove the oldest event without blocking
    pub fn try_pop(&self) -> Option<Event> {
        let mut inner = self.inner.lock();
        let event = inner.events.pop_front();
        if event.is_some() {
            self.not_full.notify_one();
        }
        event
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventQueue")
            .field("len", &inner.events.len())
            .field("closed", &inner.closed)
            .field("capacity", &self.capacity)
            .finish()
    }
}
