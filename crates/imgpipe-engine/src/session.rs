//! The per-`LoadKey` `Session` and its per-subscriber `TaskRecord`. A
//! `Session` is only ever read or mutated from the serial orchestrator
//! context; nothing here is `Sync`-shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use imgpipe_core::{CancellationSource, PipelineResult, Priority, SessionId, SessionMetrics, TaskId, TaskMetrics};

use crate::queue::QueueItemHandle;
use crate::request::Request;
use crate::types::{Image, ProgressUpdate};

/// The sinks one caller supplied for one `load_image` submission.
///
/// `on_progress` and `on_partial_image` may fire any number of times and
/// so must be cheaply clonable into the delivery context; `on_completion`
/// fires exactly once and is moved out when it does.
pub struct TaskSinks {
    /// Invoked with each byte-count update for this task's session.
    pub on_progress: Option<Arc<dyn Fn(ProgressUpdate) + Send + Sync>>,
    /// Invoked with each partial (progressive) image, if any arrive.
    pub on_partial_image: Option<Arc<dyn Fn(Image, Option<u32>) + Send + Sync>>,
    /// Invoked exactly once with the final outcome.
    pub on_completion: Box<dyn FnOnce(PipelineResult<Image>) + Send>,
}

impl Default for TaskSinks {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_partial_image: None,
            on_completion: Box::new(|_| {}),
        }
    }
}

/// One subscriber's bookkeeping inside a [`Session`].
pub(crate) struct TaskRecord {
    pub priority: Priority,
    pub on_progress: Option<Arc<dyn Fn(ProgressUpdate) + Send + Sync>>,
    pub on_partial_image: Option<Arc<dyn Fn(Image, Option<u32>) + Send + Sync>>,
    pub on_completion: Option<Box<dyn FnOnce(PipelineResult<Image>) + Send>>,
    pub metrics: TaskMetrics,
}

impl TaskRecord {
    pub fn new(priority: Priority, sinks: TaskSinks) -> Self {
        Self {
            priority,
            on_progress: sinks.on_progress,
            on_partial_image: sinks.on_partial_image,
            on_completion: Some(sinks.on_completion),
            metrics: TaskMetrics::new(Instant::now()),
        }
    }
}

/// The shared, per-`LoadKey` state one or more subscribed tasks ride along
/// with. Lives only inside `OrchestratorState`'s session table.
pub(crate) struct Session {
    pub id: SessionId,
    /// The request that created this session. A later deduplicated
    /// subscriber's own `Request` is discarded once attached — every
    /// subscriber rides the originating request's cache/processor choice.
    pub request: Request,
    pub subscribers: HashMap<TaskId, TaskRecord>,
    pub cancellation: CancellationSource,
    pub fetch_queue_item: Option<QueueItemHandle>,
    /// Guards against releasing the fetch queue's concurrency slot twice:
    /// once from the data loader's own completion callback, once from a
    /// cancellation firing while the fetch is still in flight.
    pub fetch_release_guard: Arc<AtomicBool>,
    pub final_processing_queue_item: Option<QueueItemHandle>,
    pub decoding_started: bool,
    pub partial_processing_in_flight: bool,
    pub completed: bool,
    pub metrics: SessionMetrics,
}

impl Session {
    pub fn new(id: SessionId, request: Request) -> Self {
        Self {
            id,
            request,
            subscribers: HashMap::new(),
            cancellation: CancellationSource::new(),
            fetch_queue_item: None,
            fetch_release_guard: Arc::new(AtomicBool::new(false)),
            final_processing_queue_item: None,
            decoding_started: false,
            partial_processing_in_flight: false,
            completed: false,
            metrics: SessionMetrics::new(Instant::now()),
        }
    }

    /// The priority this session's fetch/processing work should run at:
    /// the maximum across all still-subscribed tasks.
    pub fn derived_priority(&self) -> Priority {
        Priority::max_or_normal(self.subscribers.values().map(|t| t.priority))
    }
}
