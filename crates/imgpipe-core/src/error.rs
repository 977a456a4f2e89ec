//! Pipeline error types.

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, ImagePipelineError>;

/// Errors surfaced to a `Task`'s completion callback.
///
/// These are the only kinds of failure the core reports; cancellation is
/// not represented here — a cancelled task simply never receives
/// a completion callback.
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum ImagePipelineError {
    /// The data loader reported a fetch failure.
    #[error("data load failed: {0}")]
    DataLoad(String),

    /// Final decode returned no image, the fetch produced zero bytes, or
    /// no decoder could be instantiated for the response.
    #[error("decoding failed")]
    DecodingFailed,

    /// The final processor returned no image.
    #[error("processing failed")]
    ProcessingFailed,

    /// The pipeline was misconfigured (e.g. zero concurrency).
    #[error("invalid configuration: {0}")]
    Configuration(String),
}
