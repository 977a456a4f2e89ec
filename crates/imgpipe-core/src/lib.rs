//! # imgpipe-core
//!
//! Foundation types for the imgpipe pipeline orchestration core: keys,
//! priorities, the cancellation token, passive metrics records, and the
//! error type surfaced to callers. Nothing in this crate touches an
//! execution context — it is safe to share between the orchestrator,
//! delivery, decoding, fetch and processing contexts described by the
//! runtime crate.
//!
//! ## Module Organization
//!
//! - [`ids`]: monotonic `TaskId` and unique `SessionId`
//! - [`priority`]: the `Priority` ordering used by tasks and sessions
//! - [`keys`]: `LoadKey` / `CacheKey` deduplication and cache keys
//! - [`cancellation`]: one-shot cancellation token with callback registration
//! - [`error`]: `ImagePipelineError` and `PipelineResult`
//! - [`metrics`]: passive per-task and per-session timing records

#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod cancellation;
pub mod error;
pub mod ids;
pub mod keys;
pub mod metrics;
pub mod priority;

pub use cancellation::{CancellationSource, CancellationToken};
pub use error::{ImagePipelineError, PipelineResult};
pub use ids::{SessionId, TaskId};
pub use keys::{CacheKey, LoadKey};
pub use metrics::{SessionMetrics, TaskMetrics};
pub use priority::Priority;
