//! Narrow interfaces to the external collaborators the orchestrator never
//! implements itself: the byte loader, decoder selection, processors and
//! the memory cache.

use std::sync::Arc;

use bytes::Bytes;
use imgpipe_core::CacheKey;

use crate::request::Request;
use crate::types::{DataBuffer, DecodedFrame, DecodingContext, FetchResponse, Image, ProcessingContext};

/// A handle to one in-flight fetch, returned synchronously by
/// [`DataLoader::load`].
pub trait FetchHandle: Send + Sync {
    /// Abort the fetch. The orchestrator fires this at most once per
    /// session, as part of tearing the session down — whether because a
    /// caller cancelled it or because the session finished (successfully
    /// or not) while the fetch was still technically registered.
    /// Implementations must tolerate a call after the fetch already
    /// finished on its own.
    fn cancel(&self);
}

/// Callbacks a [`DataLoader`] invokes as a fetch progresses.
///
/// `on_chunk` may be called zero or more times with monotonically
/// accumulating byte arrivals; `on_complete` fires exactly once. Both are
/// safe to call from any thread — the orchestrator marshals them back onto
/// its own serial context.
pub struct FetchEvents {
    /// Invoked with each newly-arrived chunk and the (now-stable) response.
    pub on_chunk: Box<dyn Fn(Bytes, FetchResponse) + Send + Sync>,
    /// Invoked exactly once, with `Some(message)` on failure or `None` on
    /// success.
    pub on_complete: Box<dyn FnOnce(Option<String>) + Send>,
}

/// Loads the bytes of one resource. Implemented externally (HTTP, disk,
/// in-memory fixture); the core never parses URLs or speaks a transport
/// protocol itself.
pub trait DataLoader: Send + Sync {
    /// Begin loading `request`'s resource, invoking `events` as data
    /// arrives. Must accept concurrent calls.
    fn load(&self, request: &Request, events: FetchEvents) -> Box<dyn FetchHandle>;
}

/// Selects a [`Decoder`] for a fetch in progress.
pub trait DecoderRegistry: Send + Sync {
    /// Choose a decoder, or `None` if no decoder can handle this response.
    fn select(&self, context: &DecodingContext) -> Option<Box<dyn Decoder>>;
}

/// A stateful, single-session decoder instance. Confined to the decoding
/// context; never shared across sessions or threads.
pub trait Decoder: Send {
    /// Attempt to decode `buffer`. `is_final` is `true` only for the
    /// completed download; partial invocations (`is_final = false`) only
    /// happen when the buffer is progressive.
    fn decode(&mut self, buffer: &DataBuffer, is_final: bool) -> Option<DecodedFrame>;
}

/// Transforms a decoded image. Two requests whose processors share a
/// [`cache_identity`](Processor::cache_identity) are deduplicated onto the
/// same session and cache entry.
pub trait Processor: Send + Sync {
    /// A stable identity string used for deduplication and cache keying.
    /// Two processor instances with equal identities are treated as
    /// equivalent regardless of object identity.
    fn cache_identity(&self) -> &str;

    /// Transform `image`, or return `None` to signal processing failure.
    fn process(&self, image: &Image) -> Option<Image>;
}

/// Resolves which [`Processor`] (if any) applies to one decode result.
///
/// This is the pluggable `imageProcessor` configuration hook;
/// the default simply returns the request's own attached processor.
pub trait ProcessorResolver: Send + Sync {
    /// Choose a processor for this context, or `None` to skip processing.
    fn resolve(&self, context: &ProcessingContext) -> Option<Arc<dyn Processor>>;
}

/// The default processor resolver: use the request's attached processor.
#[derive(Debug, Default)]
pub struct DefaultProcessorResolver;

impl ProcessorResolver for DefaultProcessorResolver {
    fn resolve(&self, context: &ProcessingContext) -> Option<Arc<dyn Processor>> {
        context.request.processor().cloned()
    }
}

/// Thread-safe external memory cache of decoded, processed images.
pub trait ImageCache: Send + Sync {
    /// Look up a previously-stored image.
    fn get(&self, key: &CacheKey) -> Option<Image>;

    /// Store an image, overwriting any previous entry for `key`.
    fn set(&self, key: CacheKey, image: Image);
}
