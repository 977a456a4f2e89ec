//! Shared value types crossing the boundary to external collaborators.

use std::any::Any;
use std::sync::Arc;

use crate::request::Request;

/// An opaque, reference-counted in-memory decoded image.
///
/// The core never inspects image contents — decoding, processing and
/// platform representation are all external collaborators. The
/// payload is type-erased so this crate has no dependency on any concrete
/// image or codec library; the decoder and processor the caller supplies
/// agree on the concrete type between themselves.
///
/// Two `Image` values are the same image iff they share the same
/// allocation — use [`is_same_as`](Image::is_same_as) for identity
/// comparisons rather than comparing decoded contents.
#[derive(Clone)]
pub struct Image {
    payload: Arc<dyn Any + Send + Sync>,
}

impl Image {
    /// Wrap an arbitrary payload as an opaque image.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    /// Attempt to downcast back to the concrete payload type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Whether two images are the same allocation (identity comparison).
    pub fn is_same_as(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("ptr", &Arc::as_ptr(&self.payload))
            .finish()
    }
}

/// Stable response metadata available after the first chunk arrives.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// `Content-Length`-equivalent, when known. Progressive decoding never
    /// attempts a partial decode while this is `None`.
    pub expected_content_length: Option<u64>,
}

/// Growing byte buffer backing one session's in-flight decode.
///
/// Confined to the decoding context; never shared.
#[derive(Debug, Default)]
pub struct DataBuffer {
    data: Vec<u8>,
    progressive: bool,
}

impl DataBuffer {
    /// Create an empty buffer, marked progressive or not for its lifetime.
    pub fn new(progressive: bool) -> Self {
        Self {
            data: Vec::new(),
            progressive,
        }
    }

    /// Append newly-arrived bytes.
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Whether this buffer was created in progressive mode.
    pub fn is_progressive(&self) -> bool {
        self.progressive
    }

    /// The bytes accumulated so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no bytes have arrived yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Context passed to [`DecoderRegistry::select`](crate::traits::DecoderRegistry).
#[derive(Debug, Clone)]
pub struct DecodingContext {
    /// The originating request (decoder selection may consult the
    /// processor or resource identifier).
    pub request: Request,
    /// Response metadata, stable from the first chunk onward.
    pub response: FetchResponse,
    /// The bytes observed so far when the decoder was selected.
    pub first_chunk_len: usize,
}

/// Context passed to a [`Processor`](crate::traits::Processor).
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    /// The image to transform.
    pub image: Image,
    /// The originating request.
    pub request: Request,
    /// `false` for partial/progressive images, `true` for the final image.
    pub is_final: bool,
    /// Decoder-supplied scan number, when available.
    pub scan_number: Option<u32>,
}

/// One decode attempt's result.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// The decoded image.
    pub image: Image,
    /// Decoder-supplied scan number, when available.
    pub scan_number: Option<u32>,
}

/// A progress notification delivered to a task's `on_progress` sink.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    /// Bytes received so far for this task's session.
    pub completed_bytes: u64,
    /// Total expected bytes, once known from the fetch response.
    pub total_bytes: Option<u64>,
}
