//! Memory cache read/write gate.

use std::sync::Arc;

use imgpipe_core::CacheKey;

use crate::request::Request;
use crate::traits::ImageCache;
use crate::types::Image;

/// Honors a request's cache-read/cache-write flags around an external,
/// already thread-safe [`ImageCache`].
pub struct MemoryCacheAdapter {
    cache: Option<Arc<dyn ImageCache>>,
}

impl MemoryCacheAdapter {
    /// Wrap an optional external cache. `None` disables both read and
    /// write regardless of request flags.
    pub fn new(cache: Option<Arc<dyn ImageCache>>) -> Self {
        Self { cache }
    }

    /// Look up `request`'s cache key, honoring `cache_read_allowed`.
    pub fn read(&self, request: &Request) -> Option<Image> {
        if !request.cache_read_allowed() {
            return None;
        }
        self.cache.as_ref()?.get(&request.cache_key())
    }

    /// Store `image` under `request`'s cache key, honoring
    /// `cache_write_allowed`. Callers only invoke this after a successful
    /// final delivery — failures and partials are never stored.
    pub fn write(&self, request: &Request, key: CacheKey, image: Image) {
        if !request.cache_write_allowed() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.set(key, image);
        }
    }
}
