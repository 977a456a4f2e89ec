//! Concurrent pipeline orchestration engine: the runtime half of imgpipe.
//!
//! This crate owns the [`PipelineOrchestrator`] state machine — session
//! deduplication, the fetch and processing queues, the rate limiter, and
//! the memory cache gate — built on the primitives in `imgpipe-core`.
//! Byte fetching, decoding and image processing are all external
//! collaborators, supplied through the traits in [`traits`].

mod cache;
mod config;
mod orchestrator;
mod queue;
mod rate_limiter;
mod request;
mod session;
mod task;
mod traits;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::MemoryCacheAdapter;
pub use config::{
    PipelineConfig, PipelineConfigBuilder, DEFAULT_FETCH_CONCURRENCY, DEFAULT_PROCESSING_CONCURRENCY,
    DEFAULT_RATE_LIMITER_CAPACITY, DEFAULT_RATE_LIMITER_REFILL_PER_SEC,
};
pub use orchestrator::PipelineOrchestrator;
pub use request::Request;
pub use session::TaskSinks;
pub use task::Task;
pub use traits::{
    DataLoader, DecoderRegistry, Decoder, DefaultProcessorResolver, FetchEvents, FetchHandle, ImageCache, Processor,
    ProcessorResolver,
};
pub use types::{DataBuffer, DecodedFrame, DecodingContext, FetchResponse, Image, ProcessingContext, ProgressUpdate};

pub use imgpipe_core::{
    CacheKey, CancellationSource, CancellationToken, ImagePipelineError, LoadKey, PipelineResult, Priority,
    SessionId, SessionMetrics, TaskId, TaskMetrics,
};
