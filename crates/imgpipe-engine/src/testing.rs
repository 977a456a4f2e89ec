//! In-crate fakes for the five external collaborator traits, shared by
//! this crate's own unit tests and by `tests/` integration tests (gated
//! behind the `test-util` feature, so test doubles can be shared across
//! test binaries without shipping them in the default build).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use imgpipe_core::CacheKey;
use parking_lot::Mutex;

use crate::request::Request;
use crate::traits::{DataLoader, Decoder, DecoderRegistry, FetchEvents, FetchHandle, ImageCache, Processor};
use crate::types::{DataBuffer, DecodedFrame, DecodingContext, FetchResponse, Image};

/// A scripted [`DataLoader`] that delivers a fixed sequence of chunks,
/// pacing itself with short real sleeps so tests can race cancellation
/// against in-flight delivery.
pub struct FakeLoader {
    chunks: Vec<Bytes>,
    expected_content_length: Option<u64>,
    result: Result<(), String>,
    step_delay: Duration,
    call_count: Arc<AtomicUsize>,
    cancel_count: Arc<AtomicUsize>,
}

impl FakeLoader {
    /// A loader that delivers `chunks` (pacing `step_delay` between each,
    /// and once more before completing) and then reports `result`.
    pub fn new(chunks: Vec<Bytes>, expected_content_length: Option<u64>, result: Result<(), String>) -> Self {
        Self {
            chunks,
            expected_content_length,
            result,
            step_delay: Duration::from_millis(15),
            call_count: Arc::new(AtomicUsize::new(0)),
            cancel_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Convenience: a single successful chunk, content length known.
    pub fn single_success(data: impl Into<Bytes>) -> Self {
        let bytes = data.into();
        let len = bytes.len() as u64;
        Self::new(vec![bytes], Some(len), Ok(()))
    }

    /// Convenience: completes successfully having delivered zero bytes.
    pub fn zero_bytes() -> Self {
        Self::new(Vec::new(), Some(0), Ok(()))
    }

    /// Convenience: the underlying load fails outright.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Vec::new(), None, Err(message.into()))
    }

    /// Override the pacing delay (default 15ms).
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// How many times [`DataLoader::load`] has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// How many times a handle this loader issued has been cancelled.
    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }
}

struct FakeFetchHandle {
    cancel_count: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

impl FetchHandle for FakeFetchHandle {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.cancel_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl DataLoader for FakeLoader {
    fn load(&self, _request: &Request, events: FetchEvents) -> Box<dyn FetchHandle> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = FakeFetchHandle {
            cancel_count: Arc::clone(&self.cancel_count),
            cancelled: Arc::clone(&cancelled),
        };

        let chunks = self.chunks.clone();
        let expected_content_length = self.expected_content_length;
        let result = self.result.clone();
        let step_delay = self.step_delay;

        tokio::spawn(async move {
            for chunk in chunks {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                (events.on_chunk)(
                    chunk,
                    FetchResponse {
                        expected_content_length,
                    },
                );
                tokio::time::sleep(step_delay).await;
            }
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            (events.on_complete)(result.err());
        });

        Box::new(handle)
    }
}

/// A decoder registry that always returns [`FakeDecoder`].
pub struct FakeDecoderRegistry {
    /// Whether the registry should pretend it can't find a decoder.
    pub refuse: bool,
}

impl Default for FakeDecoderRegistry {
    fn default() -> Self {
        Self { refuse: false }
    }
}

impl DecoderRegistry for FakeDecoderRegistry {
    fn select(&self, _context: &DecodingContext) -> Option<Box<dyn Decoder>> {
        if self.refuse {
            None
        } else {
            Some(Box::new(FakeDecoder { scan: 0 }))
        }
    }
}

/// A decoder that treats any non-empty buffer as a decodable image,
/// emitting a fresh `Image` (and incrementing scan number) each call.
pub struct FakeDecoder {
    scan: u32,
}

impl Decoder for FakeDecoder {
    fn decode(&mut self, buffer: &DataBuffer, is_final: bool) -> Option<DecodedFrame> {
        if buffer.is_empty() {
            return None;
        }
        if !is_final && !buffer.is_progressive() {
            return None;
        }
        self.scan += 1;
        Some(DecodedFrame {
            image: Image::new(buffer.as_slice().to_vec()),
            scan_number: Some(self.scan),
        })
    }
}

/// A processor that wraps the input image's bytes with a marker, proving
/// identity differs between the processed output and its input.
pub struct FakeProcessor {
    identity: String,
    refuse: bool,
}

impl FakeProcessor {
    /// A processor with the given cache identity that always succeeds.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            refuse: false,
        }
    }

    /// A processor that always reports failure.
    pub fn failing(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            refuse: true,
        }
    }
}

impl Processor for FakeProcessor {
    fn cache_identity(&self) -> &str {
        &self.identity
    }

    fn process(&self, image: &Image) -> Option<Image> {
        if self.refuse {
            return None;
        }
        let bytes = image.downcast_ref::<Vec<u8>>()?.clone();
        Some(Image::new(bytes))
    }
}

/// A trivial thread-safe in-memory cache.
pub struct FakeCache {
    entries: Mutex<std::collections::HashMap<CacheKey, Image>>,
}

impl FakeCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for FakeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache for FakeCache {
    fn get(&self, key: &CacheKey) -> Option<Image> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: CacheKey, image: Image) {
        self.entries.lock().insert(key, image);
    }
}
