//! Deduplication and cache keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Equivalence class used for deduplication: `(resource identifier,
/// processor cache identity)`.
///
/// Two requests produce an equal `LoadKey` iff they target the same
/// resource and carry processors with the same cache identity (or neither
/// carries a processor). When deduplication is disabled, callers should
/// construct a session key with [`LoadKey::fresh_unique`] instead, which
/// never compares equal to any other key — preserving the "one session
/// table, keyed either way" shape described in the design notes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadKey {
    resource_id: Arc<str>,
    processor_identity: Option<Arc<str>>,
    /// `Some` only for non-deduplicated sessions; guarantees the key is
    /// unique regardless of `resource_id`/`processor_identity`.
    disambiguator: Option<u64>,
}

impl LoadKey {
    /// Build the deduplicating key for a resource and optional processor.
    pub fn new(resource_id: impl Into<Arc<str>>, processor_identity: Option<Arc<str>>) -> Self {
        Self {
            resource_id: resource_id.into(),
            processor_identity,
            disambiguator: None,
        }
    }

    /// Build a key guaranteed not to equal any other key, for use when
    /// deduplication is disabled.
    pub fn fresh_unique(resource_id: impl Into<Arc<str>>, processor_identity: Option<Arc<str>>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            resource_id: resource_id.into(),
            processor_identity,
            disambiguator: Some(COUNTER.fetch_add(1, Ordering::Relaxed)),
        }
    }
}

/// Memory-cache lookup key. Structurally identical to [`LoadKey`] in the
/// default configuration, but never carries a dedup disambiguator — two
/// requests for the same resource and processor always share a cache
/// entry, whether or not deduplication of in-flight sessions is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource_id: Arc<str>,
    processor_identity: Option<Arc<str>>,
}

impl CacheKey {
    /// Build a cache key directly from a resource and optional processor.
    pub fn new(resource_id: impl Into<Arc<str>>, processor_identity: Option<Arc<str>>) -> Self {
        Self {
            resource_id: resource_id.into(),
            processor_identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_produce_equal_load_keys() {
        let a = LoadKey::new("https://x/img.png", Some(Arc::from("resize:100x100")));
        let b = LoadKey::new("https://x/img.png", Some(Arc::from("resize:100x100")));
        assert_eq!(a, b);
    }

    #[test]
    fn different_processor_identity_differs() {
        let a = LoadKey::new("https://x/img.png", Some(Arc::from("resize:100x100")));
        let b = LoadKey::new("https://x/img.png", Some(Arc::from("resize:200x200")));
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_unique_never_collides() {
        let a = LoadKey::fresh_unique("https://x/img.png", None);
        let b = LoadKey::fresh_unique("https://x/img.png", None);
        assert_ne!(a, b);
    }

}
