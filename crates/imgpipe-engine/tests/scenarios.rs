//! Black-box scenario and invariant coverage for `PipelineOrchestrator`,
//! driven entirely through its public API and the in-crate fakes exposed
//! by the `test-util` feature.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use imgpipe_engine::testing::{FakeCache, FakeDecoderRegistry, FakeLoader, FakeProcessor};
use imgpipe_engine::{
    DataLoader, FetchEvents, FetchHandle, Image, ImageCache, ImagePipelineError, PipelineConfig,
    PipelineOrchestrator, Priority, Processor, Request, TaskSinks,
};

fn init_logging() {
    let _: Result<_, _> = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn completion_sinks() -> (TaskSinks, oneshot::Receiver<Result<Image, ImagePipelineError>>) {
    init_logging();
    let (tx, rx) = oneshot::channel();
    let sinks = TaskSinks {
        on_completion: Box::new(move |result| {
            let _ = tx.send(result);
        }),
        ..Default::default()
    };
    (sinks, rx)
}

// Scenario 1: memory cache hit bypasses session creation and the data loader entirely.
#[tokio::test]
async fn cache_hit_bypasses_session_and_data_loader() {
    let cache = Arc::new(FakeCache::new());
    let request = Request::new("https://example.test/a.png");
    cache.set(request.cache_key(), Image::new(42u8));

    let loader = Arc::new(FakeLoader::failing("must not be called"));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default()))
        .image_cache(cache)
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let (sinks, rx) = completion_sinks();
    let task = orchestrator.load_image(request, sinks);

    let image = rx.await.expect("completion delivered").expect("cache hit succeeds");
    assert_eq!(*image.downcast_ref::<u8>().unwrap(), 42);
    assert_eq!(loader.call_count(), 0);
    let metrics = orchestrator.task_metrics(&task).expect("metrics recorded for a cache hit");
    assert!(metrics.is_memory_cache_hit);
    assert!(metrics.time_completed.is_some());
}

// Scenario 2: two concurrent requests for the same resource share one fetch.
#[tokio::test]
async fn dedup_shares_one_fetch_across_concurrent_requests() {
    let loader = Arc::new(FakeLoader::single_success(b"abc".to_vec()));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let request = Request::new("https://example.test/b.png");
    let (sinks_a, rx_a) = completion_sinks();
    let (sinks_b, rx_b) = completion_sinks();
    orchestrator.load_image(request.clone(), sinks_a);
    orchestrator.load_image(request, sinks_b);

    let image_a = rx_a.await.unwrap().unwrap();
    let image_b = rx_b.await.unwrap().unwrap();
    assert!(image_a.is_same_as(&image_b));
    assert_eq!(loader.call_count(), 1);
}

// Scenario 3: cancelling one of two subscribers lets the fetch run to
// completion for the other; the fetch handle is never cancelled.
#[tokio::test]
async fn cancel_one_of_two_lets_the_fetch_finish_for_the_other() {
    let loader = Arc::new(FakeLoader::single_success(b"xyz".to_vec()));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let request = Request::new("https://example.test/c.png");
    let (sinks_a, rx_a) = completion_sinks();
    let (sinks_b, rx_b) = completion_sinks();
    let task_a = orchestrator.load_image(request.clone(), sinks_a);
    orchestrator.load_image(request, sinks_b);

    orchestrator.cancel(&task_a);

    assert!(rx_b.await.unwrap().is_ok());
    assert!(rx_a.await.is_err(), "a cancelled task never receives a completion callback");
    assert_eq!(loader.cancel_count(), 0);
}

// Scenario 4: cancelling every subscriber tears the session down and
// cancels the underlying fetch exactly once.
#[tokio::test]
async fn cancel_all_cancels_the_fetch_exactly_once() {
    let loader = Arc::new(FakeLoader::single_success(b"xyz".to_vec()).with_step_delay(Duration::from_millis(40)));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let request = Request::new("https://example.test/d.png");
    let (sinks_a, rx_a) = completion_sinks();
    let (sinks_b, rx_b) = completion_sinks();
    let task_a = orchestrator.load_image(request.clone(), sinks_a);
    let task_b = orchestrator.load_image(request, sinks_b);

    orchestrator.cancel(&task_a);
    orchestrator.cancel(&task_b);

    assert!(rx_a.await.is_err());
    assert!(rx_b.await.is_err());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(loader.cancel_count(), 1);
}

struct OrderTrackingLoader {
    order: Arc<Mutex<Vec<String>>>,
    filler_delay: Duration,
}

struct NoopFetchHandle;

impl FetchHandle for NoopFetchHandle {
    fn cancel(&self) {}
}

impl DataLoader for OrderTrackingLoader {
    fn load(&self, request: &Request, events: FetchEvents) -> Box<dyn FetchHandle> {
        let resource_id = request.resource_id().to_string();
        let is_filler = resource_id == "filler";
        if !is_filler {
            self.order.lock().unwrap().push(resource_id);
        }
        let delay = self.filler_delay;
        tokio::spawn(async move {
            if is_filler {
                tokio::time::sleep(delay).await;
            }
            (events.on_complete)(Some("order-tracking stub never decodes".into()));
        });
        Box::new(NoopFetchHandle)
    }
}

// Scenario 5: a late-arriving higher-priority subscriber escalates its
// session's queued fetch above a session that was submitted earlier but
// never escalated.
#[tokio::test]
async fn priority_escalation_reorders_a_queued_fetch() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(OrderTrackingLoader {
        order: Arc::clone(&order),
        filler_delay: Duration::from_millis(60),
    });
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .fetch_concurrency(1)
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    // Occupies the only fetch slot so "low" and "mid" both queue behind it.
    orchestrator.load_image(Request::new("filler"), TaskSinks::default());

    let low = Request::new("low").with_priority(Priority::Low);
    let low_task = orchestrator.load_image(low, TaskSinks::default());

    let mid = Request::new("mid").with_priority(Priority::Normal);
    orchestrator.load_image(mid, TaskSinks::default());

    // A second subscriber on "low" at VeryHigh escalates its session above "mid".
    let escalate = Request::new("low").with_priority(Priority::VeryHigh);
    orchestrator.load_image(escalate, TaskSinks::default());
    let _ = low_task;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*order.lock().unwrap(), vec!["low".to_string(), "mid".to_string()]);
}

// Scenario 6: with progressive decoding enabled, at least one partial
// image is delivered before the single success completion, and the
// partial image is a distinct allocation from the completed one.
#[tokio::test]
async fn progressive_delivery_emits_partial_then_final() {
    let chunks = vec![Bytes::from_static(b"AAAA"), Bytes::from_static(b"BBBB")];
    let loader = Arc::new(FakeLoader::new(chunks, Some(8), Ok(())).with_step_delay(Duration::from_millis(5)));
    let processor: Arc<dyn Processor> = Arc::new(FakeProcessor::new("resize"));
    let request = Request::new("https://example.test/e.png").with_processor(processor);

    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .progressive_decoding_enabled(true)
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let partials = Arc::new(Mutex::new(Vec::new()));
    let partials_sink = Arc::clone(&partials);
    let completed = Arc::new(AtomicBool::new(false));
    let completed_sink = Arc::clone(&completed);
    let (tx, rx) = oneshot::channel();

    let sinks = TaskSinks {
        on_partial_image: Some(Arc::new(move |image, _scan| {
            assert!(!completed_sink.load(Ordering::SeqCst), "no progressive callback after completion");
            partials_sink.lock().unwrap().push(image);
        })),
        on_completion: Box::new(move |result| {
            completed.store(true, Ordering::SeqCst);
            let _ = tx.send(result);
        }),
        ..Default::default()
    };
    orchestrator.load_image(request, sinks);

    let final_image = rx.await.unwrap().expect("progressive load succeeds");
    let partials = partials.lock().unwrap();
    assert!(!partials.is_empty(), "at least one progressive callback fires");
    assert!(
        !partials.last().unwrap().is_same_as(&final_image),
        "the progressive image is distinct by identity from the completion image"
    );
}

// Boundary: progressive decoding is enabled but the content length is
// unknown, so no partial image is ever produced.
#[tokio::test]
async fn progressive_without_known_length_never_emits_a_partial() {
    let chunks = vec![Bytes::from_static(b"AAAA"), Bytes::from_static(b"BBBB")];
    let loader = Arc::new(FakeLoader::new(chunks, None, Ok(())).with_step_delay(Duration::from_millis(5)));
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .progressive_decoding_enabled(true)
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let partial_count = Arc::new(Mutex::new(0usize));
    let partial_count_sink = Arc::clone(&partial_count);
    let (sinks_tx, rx) = completion_sinks();
    let sinks = TaskSinks {
        on_partial_image: Some(Arc::new(move |_image, _scan| {
            *partial_count_sink.lock().unwrap() += 1;
        })),
        ..sinks_tx
    };
    orchestrator.load_image(Request::new("https://example.test/unknown-length.png"), sinks);

    rx.await.unwrap().expect("load still succeeds");
    assert_eq!(*partial_count.lock().unwrap(), 0);
}

// Boundary: zero bytes delivered with no error is treated as a decoding failure.
#[tokio::test]
async fn zero_bytes_with_no_error_is_decoding_failed() {
    let loader = Arc::new(FakeLoader::zero_bytes());
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let (sinks, rx) = completion_sinks();
    orchestrator.load_image(Request::new("https://example.test/empty.png"), sinks);

    let result = rx.await.unwrap();
    assert!(matches!(result, Err(ImagePipelineError::DecodingFailed)));
}

// A data-loader failure surfaces verbatim through the DataLoad variant.
#[tokio::test]
async fn data_loader_failure_surfaces_as_data_load_error() {
    let loader = Arc::new(FakeLoader::failing("network down"));
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let (sinks, rx) = completion_sinks();
    orchestrator.load_image(Request::new("https://example.test/fails.png"), sinks);

    let result = rx.await.unwrap();
    match result {
        Err(ImagePipelineError::DataLoad(message)) => assert_eq!(message, "network down"),
        other => panic!("expected DataLoad error, got {other:?}"),
    }
}

// Memory cache write occurs iff the result is a success and the request
// allows it; a request with writes disabled never populates the cache.
#[tokio::test]
async fn cache_write_is_skipped_when_the_request_forbids_it() {
    let loader = Arc::new(FakeLoader::single_success(b"ok".to_vec()));
    let cache = Arc::new(FakeCache::new());
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .image_cache(Arc::clone(&cache) as Arc<dyn ImageCache>)
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let request = Request::new("https://example.test/f.png").with_cache_write(false);
    let (sinks, rx) = completion_sinks();
    orchestrator.load_image(request.clone(), sinks);

    rx.await.unwrap().expect("load succeeds");
    assert!(cache.get(&request.cache_key()).is_none());
}

// `cancel(task)` called twice has the same effect as calling it once.
#[tokio::test]
async fn cancelling_twice_matches_cancelling_once() {
    let loader = Arc::new(FakeLoader::single_success(b"z".to_vec()).with_step_delay(Duration::from_millis(30)));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default())).build().expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let task = orchestrator.load_image(Request::new("https://example.test/g.png"), TaskSinks::default());
    orchestrator.cancel(&task);
    orchestrator.cancel(&task);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(loader.cancel_count(), 1);
}

// Boundary: a task cancelled immediately after submission (before the
// spawned fetch operation ever runs) never reaches the data loader.
#[tokio::test]
async fn cancel_before_fetch_runs_skips_the_data_loader() {
    let loader = Arc::new(FakeLoader::single_success(b"never".to_vec()));
    let config = PipelineConfig::builder(loader.clone(), Arc::new(FakeDecoderRegistry::default()))
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let task = orchestrator.load_image(Request::new("https://example.test/h.png"), TaskSinks::default());
    orchestrator.cancel(&task);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(loader.call_count(), 0);
}

// A task's metrics are stamped with `time_completed` once its completion
// fires, and remain readable afterward.
#[tokio::test]
async fn metrics_record_time_completed_after_a_successful_load() {
    let loader = Arc::new(FakeLoader::single_success(b"metrics".to_vec()));
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let (sinks, rx) = completion_sinks();
    let task = orchestrator.load_image(Request::new("https://example.test/i.png"), sinks);
    rx.await.unwrap().expect("load succeeds");

    let metrics = orchestrator.task_metrics(&task).expect("metrics recorded");
    assert!(metrics.time_completed.is_some());
    assert!(metrics.time_cancelled.is_none());
}

// A cancelled task's metrics are stamped with `time_cancelled` rather than
// `time_completed`.
#[tokio::test]
async fn metrics_record_time_cancelled_after_cancellation() {
    let loader = Arc::new(FakeLoader::single_success(b"metrics".to_vec()).with_step_delay(Duration::from_millis(30)));
    let config = PipelineConfig::builder(loader, Arc::new(FakeDecoderRegistry::default()))
        .build()
        .expect("valid test config");
    let orchestrator = PipelineOrchestrator::new(config);

    let task = orchestrator.load_image(Request::new("https://example.test/j.png"), TaskSinks::default());
    orchestrator.cancel(&task);

    let metrics = orchestrator.task_metrics(&task).expect("metrics recorded");
    assert!(metrics.time_cancelled.is_some());
    assert!(metrics.time_completed.is_none());
}
