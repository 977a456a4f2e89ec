//! Task and session identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing identifier assigned to each [`Task`](crate) at
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next_counter() -> &'static AtomicU64 {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        &COUNTER
    }

    /// Allocate the next monotonic task id.
    pub fn next() -> Self {
        Self(Self::next_counter().fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging and metrics only.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque identifier for a [`Session`](crate), stable for the session's
/// lifetime and never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next_counter() -> &'static AtomicU64 {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        &COUNTER
    }

    /// Allocate a fresh, process-unique session id.
    pub fn next() -> Self {
        Self(Self::next_counter().fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logging and metrics only.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
