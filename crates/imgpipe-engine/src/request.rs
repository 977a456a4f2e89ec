//! The immutable per-submission `Request` value.

use std::sync::Arc;

use imgpipe_core::{CacheKey, LoadKey, Priority};

use crate::traits::Processor;

/// An immutable description of one image load submission.
///
/// `Request` is cheap to clone (an `Arc<str>` resource id and an
/// `Arc<dyn Processor>`), so the orchestrator and each `Session` can hold
/// their own copy without synchronization.
#[derive(Clone)]
pub struct Request {
    resource_id: Arc<str>,
    processor: Option<Arc<dyn Processor>>,
    priority: Priority,
    cache_read: bool,
    cache_write: bool,
}

impl Request {
    /// Start building a request for the given resource identifier (e.g. a
    /// URL). Defaults: no processor, [`Priority::Normal`], cache reads and
    /// writes both allowed.
    pub fn new(resource_id: impl Into<Arc<str>>) -> Self {
        Self {
            resource_id: resource_id.into(),
            processor: None,
            priority: Priority::Normal,
            cache_read: true,
            cache_write: true,
        }
    }

    /// Attach a processor whose cache identity participates in this
    /// request's [`LoadKey`]/[`CacheKey`].
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set the initial priority carried by the `Task` created for this
    /// request.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Allow or forbid reading the memory cache for this request.
    #[must_use]
    pub fn with_cache_read(mut self, allowed: bool) -> Self {
        self.cache_read = allowed;
        self
    }

    /// Allow or forbid writing the memory cache after a successful load.
    #[must_use]
    pub fn with_cache_write(mut self, allowed: bool) -> Self {
        self.cache_write = allowed;
        self
    }

    /// The target resource identifier.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// The attached processor, if any.
    pub fn processor(&self) -> Option<&Arc<dyn Processor>> {
        self.processor.as_ref()
    }

    /// The priority this request was submitted with.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether cache reads are permitted.
    pub fn cache_read_allowed(&self) -> bool {
        self.cache_read
    }

    /// Whether cache writes are permitted.
    pub fn cache_write_allowed(&self) -> bool {
        self.cache_write
    }

    fn processor_identity(&self) -> Option<Arc<str>> {
        self.processor
            .as_ref()
            .map(|p| Arc::from(p.cache_identity()))
    }

    /// Derive the deduplication key for this request.
    ///
    /// When `dedup_enabled` is `false`, returns a key that never equals any
    /// other key.
    pub fn load_key(&self, dedup_enabled: bool) -> LoadKey {
        if dedup_enabled {
            LoadKey::new(Arc::clone(&self.resource_id), self.processor_identity())
        } else {
            LoadKey::fresh_unique(Arc::clone(&self.resource_id), self.processor_identity())
        }
    }

    /// Derive the memory-cache key for this request. Unaffected by the
    /// deduplication setting.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(Arc::clone(&self.resource_id), self.processor_identity())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("resource_id", &self.resource_id)
            .field("has_processor", &self.processor.is_some())
            .field("priority", &self.priority)
            .field("cache_read", &self.cache_read)
            .field("cache_write", &self.cache_write)
            .finish()
    }
}
