//! The pipeline orchestrator: session dedup/attach, fetch/decode/process
//! scheduling, cancellation propagation and cache gating.
//!
//! All mutable shared state lives behind one [`parking_lot::Mutex`]
//! (`OrchestratorState`), touched only in short, non-`await`ing critical
//! sections — the "serial orchestrator context". Everything that must run
//! concurrently (fetch operations, processing operations, decoder state)
//! is handed off via a message (a `SessionId`/`TaskId` plus whatever value
//! it carries) after the lock is released, never by sharing a reference
//! into the locked state.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use imgpipe_core::{ImagePipelineError, LoadKey, PipelineResult, Priority, SessionId, TaskId, TaskMetrics};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::cache::MemoryCacheAdapter;
use crate::config::PipelineConfig;
use crate::queue::BoundedOperationQueue;
use crate::rate_limiter::{RateLimitOutcome, RateLimiter};
use crate::request::Request;
use crate::session::{Session, TaskRecord, TaskSinks};
use crate::task::Task;
use crate::traits::{Decoder, FetchEvents};
use crate::types::{DataBuffer, DecodedFrame, DecodingContext, FetchResponse, Image, ProcessingContext, ProgressUpdate};

type Work = Box<dyn FnOnce() + Send>;

/// One message handed to the dedicated delivery task. Delivered strictly
/// in send order, which is what gives per-task and per-session callback
/// ordering.
enum DeliveryMessage {
    Progress(Arc<dyn Fn(ProgressUpdate) + Send + Sync>, ProgressUpdate),
    Partial(Arc<dyn Fn(Image, Option<u32>) + Send + Sync>, Image, Option<u32>),
    Completion(Box<dyn FnOnce(PipelineResult<Image>) + Send>, PipelineResult<Image>),
}

impl DeliveryMessage {
    fn invoke(self) {
        match self {
            DeliveryMessage::Progress(sink, update) => sink(update),
            DeliveryMessage::Partial(sink, image, scan) => sink(image, scan),
            DeliveryMessage::Completion(sink, result) => sink(result),
        }
    }
}

/// One message handed to the dedicated decoding task, which owns all
/// decoder/buffer state in a task-local map.
enum DecodingJob {
    Init {
        session: SessionId,
        decoder: Box<dyn Decoder>,
        progressive: bool,
    },
    Append {
        session: SessionId,
        chunk: Bytes,
        attempt_partial: bool,
    },
    Final {
        session: SessionId,
    },
    Drop {
        session: SessionId,
    },
}

struct OrchestratorState {
    sessions: HashMap<LoadKey, Session>,
    session_keys: HashMap<SessionId, LoadKey>,
    task_sessions: HashMap<TaskId, SessionId>,
    /// The last-known `TaskMetrics` snapshot for every task this
    /// orchestrator has ever created, independent of whether the task's
    /// subscriber record is still live in a session. Updated in place as
    /// the task progresses; never removed, so a caller can read a task's
    /// metrics at any point after creation, including well after
    /// completion or cancellation.
    task_metrics: HashMap<TaskId, TaskMetrics>,
    fetch_queue: BoundedOperationQueue,
    processing_queue: BoundedOperationQueue,
    rate_limiter: RateLimiter,
}

impl OrchestratorState {
    /// Resolve a stable `SessionId` back to its current table entry,
    /// guarding against the id having since been replaced or removed
    /// (handles are re-resolved on arrival, never treated as pointers).
    fn resolve_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        let key = self.session_keys.get(&id)?;
        match self.sessions.get_mut(key) {
            Some(session) if session.id == id => Some(session),
            _ => None,
        }
    }
}

struct Inner {
    config: PipelineConfig,
    cache: MemoryCacheAdapter,
    state: Mutex<OrchestratorState>,
    delivery_tx: mpsc::UnboundedSender<DeliveryMessage>,
    decoding_tx: mpsc::UnboundedSender<DecodingJob>,
    rate_limiter_draining: AtomicBool,
}

/// Drives the image-loading pipeline end to end: session deduplication,
/// fetch/decode/process scheduling, cancellation propagation, and memory
/// cache reads/writes.
///
/// Cheap to clone — an `Arc` around shared state — so handing a handle to
/// a background task or a collaborator callback is just `self.clone()`.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl PipelineOrchestrator {
    /// Build a new orchestrator and spawn its dedicated delivery and
    /// decoding background tasks.
    pub fn new(config: PipelineConfig) -> Self {
        let cache = MemoryCacheAdapter::new(config.image_cache.clone());
        let state = OrchestratorState {
            sessions: HashMap::new(),
            session_keys: HashMap::new(),
            task_sessions: HashMap::new(),
            task_metrics: HashMap::new(),
            fetch_queue: BoundedOperationQueue::new(config.fetch_concurrency),
            processing_queue: BoundedOperationQueue::new(config.processing_concurrency),
            rate_limiter: RateLimiter::new(config.rate_limiter_capacity, config.rate_limiter_refill_per_sec),
        };

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (decoding_tx, decoding_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            inner: Arc::new(Inner {
                config,
                cache,
                state: Mutex::new(state),
                delivery_tx,
                decoding_tx,
                rate_limiter_draining: AtomicBool::new(false),
            }),
        };

        tokio::spawn(run_delivery_loop(delivery_rx));
        tokio::spawn(run_decoding_loop(orchestrator.clone(), decoding_rx));

        orchestrator
    }

    /// Submit one image load. Returns immediately with a [`Task`] handle;
    /// `sinks.on_completion` fires exactly once, unless the task is
    /// cancelled first, in which case it never fires at all.
    #[instrument(skip(self, request, sinks), fields(resource = request.resource_id()))]
    pub fn load_image(&self, request: Request, sinks: TaskSinks) -> Task {
        let task_id = TaskId::next();

        if let Some(image) = self.inner.cache.read(&request) {
            debug!(%task_id, is_memory_cache_hit = true, "memory cache hit");
            let now = Instant::now();
            let mut metrics = TaskMetrics::new(now);
            metrics.is_memory_cache_hit = true;
            metrics.time_completed = Some(now);
            self.inner.state.lock().task_metrics.insert(task_id, metrics);
            let _ = self
                .inner
                .delivery_tx
                .send(DeliveryMessage::Completion(sinks.on_completion, Ok(image)));
            return Task::new(task_id);
        }

        let load_key = request.load_key(self.inner.config.is_deduplication_enabled);
        let priority = request.priority();

        let mut state = self.inner.state.lock();
        let mut new_session_id = None;
        let session = match state.sessions.entry(load_key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let id = SessionId::next();
                new_session_id = Some(id);
                entry.insert(Session::new(id, request))
            }
        };
        let is_new = new_session_id.is_some();
        let session_id = session.id;
        if let Some(id) = new_session_id {
            state.session_keys.insert(id, load_key.clone());
        }
        let mut record = TaskRecord::new(priority, sinks);
        record.metrics.was_subscribed_to_existing_task = !is_new;
        state.task_metrics.insert(task_id, record.metrics.clone());
        session.subscribers.insert(task_id, record);
        state.task_sessions.insert(task_id, session_id);
        let derived = session.derived_priority();
        let fetch_item = session.fetch_queue_item.clone();
        drop(state);

        if is_new {
            trace!(%session_id, "created session");
            self.register_session_teardown(session_id);
            self.start_fetch_phase(session_id);
        } else if let Some(item) = fetch_item {
            item.set_priority(derived);
        }

        Task::new(task_id)
    }

    /// Cancel one subscriber. If it was the session's last subscriber, the
    /// whole session tears down: in-flight fetch/processing work is
    /// cancelled and the session is removed from the table. A cancelled
    /// task's completion sink is simply dropped, never invoked.
    #[instrument(skip(self))]
    pub fn cancel(&self, task: &Task) {
        let teardown = {
            let mut state = self.inner.state.lock();
            let Some(session_id) = state.task_sessions.remove(&task.id()) else {
                return;
            };
            let Some(session) = state.resolve_mut(session_id) else {
                return;
            };
            let Some(mut record) = session.subscribers.remove(&task.id()) else {
                return;
            };
            record.metrics.time_cancelled = Some(Instant::now());
            state.task_metrics.insert(task.id(), record.metrics);
            let Some(session) = state.resolve_mut(session_id) else {
                return;
            };
            if session.subscribers.is_empty() {
                Some((session_id, session.cancellation.clone()))
            } else {
                None
            }
        };

        if let Some((session_id, cancellation)) = teardown {
            cancellation.cancel();
            let mut state = self.inner.state.lock();
            remove_session_from_table(&mut state, session_id);
        }
    }

    /// Update one subscriber's priority and recompute its session's
    /// derived priority, propagating the new value to the in-flight fetch
    /// operation's queue position.
    #[instrument(skip(self))]
    pub fn set_priority(&self, task: &Task, priority: Priority) {
        let mut state = self.inner.state.lock();
        let Some(&session_id) = state.task_sessions.get(&task.id()) else {
            return;
        };
        let Some(session) = state.resolve_mut(session_id) else {
            return;
        };
        let Some(record) = session.subscribers.get_mut(&task.id()) else {
            return;
        };
        record.priority = priority;
        let derived = session.derived_priority();
        let fetch_item = session.fetch_queue_item.clone();
        drop(state);

        if let Some(item) = fetch_item {
            item.set_priority(derived);
        }
    }

    /// The current metrics snapshot for `task`, or `None` if this
    /// orchestrator never created a task with that id. Available for the
    /// lifetime of the orchestrator, including well after the task
    /// completed or was cancelled — presentation of the returned record
    /// (aggregation, export) is left to the caller.
    pub fn task_metrics(&self, task: &Task) -> Option<TaskMetrics> {
        self.inner.state.lock().task_metrics.get(&task.id()).cloned()
    }

    fn register_session_teardown(&self, session_id: SessionId) {
        let token = {
            let mut state = self.inner.state.lock();
            state.resolve_mut(session_id).map(|s| s.cancellation.token())
        };
        let Some(token) = token else { return };
        let orchestrator = self.clone();
        token.register(move || orchestrator.teardown_session_resources(session_id));
    }

    /// Runs once, the first time this session's cancellation fires —
    /// whether that is an explicit `cancel()` or the natural conclusion of
    /// `finish_session`. Releases whatever is still queued-but-unstarted
    /// and drops any decoding state.
    fn teardown_session_resources(&self, session_id: SessionId) {
        let (fetch_item, final_item) = {
            let mut state = self.inner.state.lock();
            match state.resolve_mut(session_id) {
                Some(session) => (session.fetch_queue_item.take(), session.final_processing_queue_item.take()),
                None => (None, None),
            }
        };
        if let Some(item) = fetch_item {
            item.cancel();
        }
        if let Some(item) = final_item {
            item.cancel();
        }
        let _ = self.inner.decoding_tx.send(DecodingJob::Drop { session: session_id });
    }

    fn start_fetch_phase(&self, session_id: SessionId) {
        let orchestrator = self.clone();
        let launch: Work = Box::new(move || orchestrator.enqueue_fetch(session_id));

        let mut state = self.inner.state.lock();
        let token = match state.resolve_mut(session_id) {
            Some(session) => session.cancellation.token(),
            None => return,
        };

        if self.inner.config.is_rate_limiter_enabled {
            match state.rate_limiter.execute(token, launch) {
                RateLimitOutcome::RunNow(work) => {
                    drop(state);
                    work();
                }
                RateLimitOutcome::Deferred => {
                    drop(state);
                    self.schedule_rate_limiter_drain();
                }
            }
        } else {
            drop(state);
            launch();
        }
    }

    fn schedule_rate_limiter_drain(&self) {
        if self.inner.rate_limiter_draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let orchestrator = self.clone();
        tokio::spawn(async move {
            loop {
                let delay = {
                    let state = orchestrator.inner.state.lock();
                    if !state.rate_limiter.has_deferred() {
                        break;
                    }
                    state.rate_limiter.retry_delay()
                };
                tokio::time::sleep(delay).await;
                let ready = orchestrator.inner.state.lock().rate_limiter.drain_ready();
                for work in ready {
                    work();
                }
            }
            orchestrator.inner.rate_limiter_draining.store(false, Ordering::SeqCst);
        });
    }

    fn enqueue_fetch(&self, session_id: SessionId) {
        let orchestrator = self.clone();
        let work: Work = Box::new(move || orchestrator.run_fetch(session_id));

        let ready = {
            let mut state = self.inner.state.lock();
            let priority = match state.resolve_mut(session_id) {
                Some(session) => session.derived_priority(),
                None => return,
            };
            let handle = state.fetch_queue.submit(priority, work);
            if let Some(session) = state.resolve_mut(session_id) {
                session.fetch_queue_item = Some(handle);
                session.metrics.time_data_loading_started = Some(Instant::now());
            }
            state.fetch_queue.dispatch_ready()
        };
        spawn_all(ready);
    }

    fn run_fetch(&self, session_id: SessionId) {
        let resolved = {
            let mut state = self.inner.state.lock();
            state
                .resolve_mut(session_id)
                .map(|s| (s.request.clone(), s.cancellation.token(), Arc::clone(&s.fetch_release_guard)))
        };
        let Some((request, token, guard)) = resolved else { return };

        if token.is_cancelling() {
            self.release_fetch_slot_once(&guard);
            return;
        }

        let orch_chunk = self.clone();
        let orch_complete = self.clone();
        let events = FetchEvents {
            on_chunk: Box::new(move |chunk, response| orch_chunk.handle_chunk(session_id, chunk, response)),
            on_complete: Box::new(move |error| orch_complete.handle_fetch_complete(session_id, error)),
        };

        let fetch_handle = self.inner.config.data_loader.load(&request, events);
        let orch_release = self.clone();
        let guard_for_cancel = Arc::clone(&guard);
        token.register(move || {
            fetch_handle.cancel();
            orch_release.release_fetch_slot_once(&guard_for_cancel);
        });
    }

    fn handle_chunk(&self, session_id: SessionId, chunk: Bytes, response: FetchResponse) {
        let total_bytes = response.expected_content_length;

        let extracted = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.resolve_mut(session_id) else { return };
            if session.cancellation.token().is_cancelling() {
                return;
            }
            session.metrics.downloaded_byte_count += chunk.len() as u64;
            let completed_bytes = session.metrics.downloaded_byte_count;
            let is_first_chunk = !session.decoding_started;
            session.decoding_started = true;
            let sinks: Vec<_> = session.subscribers.values().filter_map(|t| t.on_progress.clone()).collect();
            (is_first_chunk, session.request.clone(), completed_bytes, sinks)
        };
        let (is_first_chunk, request, completed_bytes, sinks) = extracted;

        let update = ProgressUpdate { completed_bytes, total_bytes };
        for sink in sinks {
            let _ = self.inner.delivery_tx.send(DeliveryMessage::Progress(sink, update));
        }

        let progressive_enabled = self.inner.config.is_progressive_decoding_enabled;

        if is_first_chunk {
            let context = DecodingContext {
                request,
                response,
                first_chunk_len: chunk.len(),
            };
            match self.inner.config.image_decoder.select(&context) {
                Some(decoder) => {
                    let _ = self.inner.decoding_tx.send(DecodingJob::Init {
                        session: session_id,
                        decoder,
                        progressive: progressive_enabled,
                    });
                }
                None => {
                    warn!(%session_id, "no decoder available for response");
                    self.finish_session(session_id, Err(ImagePipelineError::DecodingFailed));
                    return;
                }
            }
        }

        let attempt_partial = progressive_enabled && total_bytes.is_some_and(|expected| completed_bytes < expected);
        let _ = self.inner.decoding_tx.send(DecodingJob::Append {
            session: session_id,
            chunk,
            attempt_partial,
        });
    }

    fn handle_fetch_complete(&self, session_id: SessionId, error: Option<String>) {
        let status = {
            let mut state = self.inner.state.lock();
            match state.resolve_mut(session_id) {
                Some(session) if !session.cancellation.token().is_cancelling() => {
                    session.metrics.time_data_loading_finished = Some(Instant::now());
                    Some((
                        session.metrics.downloaded_byte_count == 0,
                        Arc::clone(&session.fetch_release_guard),
                    ))
                }
                _ => None,
            }
        };
        let Some((zero_bytes, guard)) = status else { return };
        self.release_fetch_slot_once(&guard);

        if let Some(message) = error {
            self.finish_session(session_id, Err(ImagePipelineError::DataLoad(message)));
            return;
        }
        if zero_bytes {
            self.finish_session(session_id, Err(ImagePipelineError::DecodingFailed));
            return;
        }
        let _ = self.inner.decoding_tx.send(DecodingJob::Final { session: session_id });
    }

    fn handle_partial_image(&self, session_id: SessionId, frame: DecodedFrame) {
        let request = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.resolve_mut(session_id) else { return };
            if session.completed || session.cancellation.token().is_cancelling() {
                return;
            }
            if session.partial_processing_in_flight {
                return;
            }
            session.partial_processing_in_flight = true;
            session.request.clone()
        };

        let context = ProcessingContext {
            image: frame.image,
            request,
            is_final: false,
            scan_number: frame.scan_number,
        };
        let resolver = Arc::clone(&self.inner.config.image_processor);
        let orchestrator = self.clone();
        let work: Work = Box::new(move || {
            let image = match resolver.resolve(&context) {
                Some(processor) => processor.process(&context.image),
                None => Some(context.image.clone()),
            };
            orchestrator.handle_partial_processed(session_id, image, context.scan_number);
        });

        self.submit_processing(session_id, work, false);
    }

    fn handle_partial_processed(&self, session_id: SessionId, image: Option<Image>, scan_number: Option<u32>) {
        self.release_processing_slot();

        let sinks = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.resolve_mut(session_id) else { return };
            session.partial_processing_in_flight = false;
            if session.completed || session.cancellation.token().is_cancelling() {
                return;
            }
            session
                .subscribers
                .values()
                .filter_map(|t| t.on_partial_image.clone())
                .collect::<Vec<_>>()
        };
        let Some(image) = image else { return };
        for sink in sinks {
            let _ = self.inner.delivery_tx.send(DeliveryMessage::Partial(sink, image.clone(), scan_number));
        }
    }

    fn handle_final_image(&self, session_id: SessionId, frame: Option<DecodedFrame>) {
        let Some(frame) = frame else {
            self.finish_session(session_id, Err(ImagePipelineError::DecodingFailed));
            return;
        };

        let request = {
            let mut state = self.inner.state.lock();
            match state.resolve_mut(session_id) {
                Some(session) if !session.cancellation.token().is_cancelling() => session.request.clone(),
                _ => return,
            }
        };

        let context = ProcessingContext {
            image: frame.image,
            request,
            is_final: true,
            scan_number: frame.scan_number,
        };
        let resolver = Arc::clone(&self.inner.config.image_processor);
        let orchestrator = self.clone();
        let work: Work = Box::new(move || {
            let image = match resolver.resolve(&context) {
                Some(processor) => processor.process(&context.image),
                None => Some(context.image.clone()),
            };
            orchestrator.handle_final_processed(session_id, image);
        });

        self.submit_processing(session_id, work, true);
    }

    fn handle_final_processed(&self, session_id: SessionId, image: Option<Image>) {
        self.release_processing_slot();
        match image {
            Some(image) => self.finish_session(session_id, Ok(image)),
            None => self.finish_session(session_id, Err(ImagePipelineError::ProcessingFailed)),
        }
    }

    fn submit_processing(&self, session_id: SessionId, work: Work, store_final_handle: bool) {
        let ready = {
            let mut state = self.inner.state.lock();
            let priority = match state.resolve_mut(session_id) {
                Some(session) => session.derived_priority(),
                None => return,
            };
            let handle = state.processing_queue.submit(priority, work);
            if store_final_handle {
                if let Some(session) = state.resolve_mut(session_id) {
                    session.final_processing_queue_item = Some(handle);
                }
            }
            state.processing_queue.dispatch_ready()
        };
        spawn_all(ready);
    }

    fn release_fetch_slot_once(&self, guard: &Arc<AtomicBool>) {
        if !guard.swap(true, Ordering::SeqCst) {
            let ready = {
                let mut state = self.inner.state.lock();
                state.fetch_queue.finish();
                state.fetch_queue.dispatch_ready()
            };
            spawn_all(ready);
        }
    }

    fn release_processing_slot(&self) {
        let ready = {
            let mut state = self.inner.state.lock();
            state.processing_queue.finish();
            state.processing_queue.dispatch_ready()
        };
        spawn_all(ready);
    }

    /// The session concluded, one way or another: stamp completion, write
    /// the memory cache on success, fan the outcome out to every current
    /// subscriber (in the order they attached — iteration order of a
    /// `HashMap` is unspecified, which is fine: nothing requires a
    /// cross-subscriber delivery order, only per-task/per-session), and
    /// remove the session from the table.
    fn finish_session(&self, session_id: SessionId, outcome: PipelineResult<Image>) {
        let extracted = {
            let mut state = self.inner.state.lock();
            let Some(session) = state.resolve_mut(session_id) else { return };
            if session.completed {
                return;
            }
            session.completed = true;
            let subscribers = std::mem::take(&mut session.subscribers);
            let request = session.request.clone();
            let cancellation = session.cancellation.clone();
            (subscribers, request, cancellation)
        };
        let (subscribers, request, cancellation) = extracted;

        cancellation.cancel();

        if let Ok(image) = &outcome {
            self.inner.cache.write(&request, request.cache_key(), image.clone());
        }

        let time_completed = Instant::now();
        {
            let mut state = self.inner.state.lock();
            remove_session_from_table(&mut state, session_id);
            for (task_id, record) in &subscribers {
                state.task_sessions.remove(task_id);
                let mut metrics = record.metrics.clone();
                metrics.time_completed = Some(time_completed);
                state.task_metrics.insert(*task_id, metrics);
            }
        }

        for (_, mut record) in subscribers {
            if let Some(on_completion) = record.on_completion.take() {
                let _ = self
                    .inner
                    .delivery_tx
                    .send(DeliveryMessage::Completion(on_completion, outcome.clone()));
            }
        }
    }
}

/// Remove `session_id`'s table entry, but only if it still refers to this
/// exact session instance (a session removed, then replaced under
/// the same `LoadKey`, must never have the replacement torn down by a
/// stale handle from the original).
fn remove_session_from_table(state: &mut OrchestratorState, session_id: SessionId) -> Option<Session> {
    let key = state.session_keys.remove(&session_id)?;
    match state.sessions.get(&key) {
        Some(session) if session.id == session_id => state.sessions.remove(&key),
        _ => None,
    }
}

fn spawn_all(work: Vec<Work>) {
    for item in work {
        tokio::spawn(async move { item() });
    }
}

async fn run_delivery_loop(mut rx: mpsc::UnboundedReceiver<DeliveryMessage>) {
    while let Some(message) = rx.recv().await {
        message.invoke();
    }
}

async fn run_decoding_loop(orchestrator: PipelineOrchestrator, mut rx: mpsc::UnboundedReceiver<DecodingJob>) {
    let mut states: HashMap<SessionId, (Box<dyn Decoder>, DataBuffer)> = HashMap::new();
    while let Some(job) = rx.recv().await {
        match job {
            DecodingJob::Init { session, decoder, progressive } => {
                states.insert(session, (decoder, DataBuffer::new(progressive)));
            }
            DecodingJob::Append { session, chunk, attempt_partial } => {
                if let Some((decoder, buffer)) = states.get_mut(&session) {
                    buffer.append(&chunk);
                    if attempt_partial {
                        if let Some(frame) = decoder.decode(buffer, false) {
                            orchestrator.handle_partial_image(session, frame);
                        }
                    }
                }
            }
            DecodingJob::Final { session } => {
                let frame = states.remove(&session).and_then(|(mut decoder, buffer)| decoder.decode(&buffer, true));
                orchestrator.handle_final_image(session, frame);
            }
            DecodingJob::Drop { session } => {
                states.remove(&session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDecoderRegistry, FakeLoader};

    fn test_config() -> PipelineConfig {
        let loader = Arc::new(FakeLoader::single_success(b"abc".to_vec()));
        PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
            .build()
            .expect("valid test config")
    }

    #[tokio::test]
    async fn first_subscriber_is_not_marked_as_attaching_to_an_existing_session() {
        let orchestrator = PipelineOrchestrator::new(test_config());
        let task = orchestrator.load_image(Request::new("https://example.test/first.png"), TaskSinks::default());

        let state = orchestrator.inner.state.lock();
        let session_id = *state.task_sessions.get(&task.id()).expect("task attached to a session");
        let key = state.session_keys.get(&session_id).expect("session indexed");
        let session = state.sessions.get(key).expect("session present");
        let record = session.subscribers.get(&task.id()).expect("subscriber recorded");
        assert!(!record.metrics.was_subscribed_to_existing_task);
    }

    #[tokio::test]
    async fn second_subscriber_on_the_same_resource_is_marked_as_attaching_to_an_existing_session() {
        let orchestrator = PipelineOrchestrator::new(test_config());
        let request = Request::new("https://example.test/dup.png");
        let _first = orchestrator.load_image(request.clone(), TaskSinks::default());
        let second = orchestrator.load_image(request, TaskSinks::default());

        let state = orchestrator.inner.state.lock();
        let session_id = *state.task_sessions.get(&second.id()).expect("task attached to a session");
        let key = state.session_keys.get(&session_id).expect("session indexed");
        let session = state.sessions.get(key).expect("session present");
        let record = session.subscribers.get(&second.id()).expect("subscriber recorded");
        assert!(record.metrics.was_subscribed_to_existing_task);
    }

    #[test]
    fn resolve_mut_rejects_a_session_id_that_has_been_replaced_under_its_load_key() {
        let mut state = OrchestratorState {
            sessions: HashMap::new(),
            session_keys: HashMap::new(),
            task_sessions: HashMap::new(),
            fetch_queue: BoundedOperationQueue::new(1),
            processing_queue: BoundedOperationQueue::new(1),
            rate_limiter: RateLimiter::new(10, 10.0),
        };
        let key = LoadKey::fresh_unique("x", None);
        let original_id = SessionId::next();
        state.session_keys.insert(original_id, key.clone());
        state.sessions.insert(key.clone(), Session::new(original_id, Request::new("x")));

        // Simulate the original session being torn down and replaced under
        // the same key without ever clearing the stale reverse-index entry.
        let replacement_id = SessionId::next();
        state.sessions.insert(key, Session::new(replacement_id, Request::new("x")));

        assert!(state.resolve_mut(original_id).is_none());
        assert!(state.resolve_mut(replacement_id).is_none(), "replacement was never indexed under its own id");
    }
}
