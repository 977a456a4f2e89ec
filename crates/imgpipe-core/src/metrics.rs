//! Passive, timestamped per-task and per-session metrics records.
//!
//! These structs are write-only from the orchestrator's point of view: it
//! stamps fields as phases complete and never reads them back to make
//! decisions. Presentation (aggregation, export) is explicitly out of
//! scope for the core.

use std::time::Instant;

/// Metrics stamped onto one [`Task`](crate).
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    /// When the task was created (submission time).
    pub time_created: Instant,
    /// Set once the completion callback has been scheduled.
    pub time_completed: Option<Instant>,
    /// Set once `cancel()` has taken effect for this task.
    pub time_cancelled: Option<Instant>,
    /// `true` iff this task was satisfied directly from the memory cache,
    /// without ever joining a session.
    pub is_memory_cache_hit: bool,
    /// `true` iff this task attached to an already-existing session rather
    /// than causing a new one to be created.
    pub was_subscribed_to_existing_task: bool,
}

impl TaskMetrics {
    /// Start a fresh record at task creation time.
    pub fn new(time_created: Instant) -> Self {
        Self {
            time_created,
            time_completed: None,
            time_cancelled: None,
            is_memory_cache_hit: false,
            was_subscribed_to_existing_task: false,
        }
    }
}

/// Metrics stamped onto one [`Session`](crate).
#[derive(Debug, Clone)]
pub struct SessionMetrics {
    /// When the session was created (first subscriber attached).
    pub time_created: Instant,
    /// Stamped at fetch submission time, not at actual dequeue/start —
    /// a documented approximation.
    pub time_data_loading_started: Option<Instant>,
    /// Stamped when the data loader's completion callback fires.
    pub time_data_loading_finished: Option<Instant>,
    /// Total bytes observed across all chunk callbacks.
    pub downloaded_byte_count: u64,
}

impl SessionMetrics {
    /// Start a fresh record at session creation time.
    pub fn new(time_created: Instant) -> Self {
        Self {
            time_created,
            time_data_loading_started: None,
            time_data_loading_finished: None,
            downloaded_byte_count: 0,
        }
    }
}
