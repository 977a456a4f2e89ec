//! Pipeline configuration.

use std::sync::Arc;

use imgpipe_core::{ImagePipelineError, PipelineResult};

use crate::traits::{DataLoader, DecoderRegistry, ImageCache, ProcessorResolver};
use crate::traits::DefaultProcessorResolver;

/// Default number of concurrent fetch operations.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 6;

/// Default number of concurrent processing operations.
pub const DEFAULT_PROCESSING_CONCURRENCY: usize = 2;

/// Default rate limiter token bucket capacity.
pub const DEFAULT_RATE_LIMITER_CAPACITY: u32 = 30;

/// Default rate limiter refill rate, in tokens per second.
pub const DEFAULT_RATE_LIMITER_REFILL_PER_SEC: f64 = 80.0;

/// Configuration for a [`PipelineOrchestrator`](crate::orchestrator::PipelineOrchestrator).
///
/// A plain, cloneable struct plus a chained builder, all fields defaulted
/// to sensible out-of-the-box values.
#[derive(Clone)]
pub struct PipelineConfig {
    /// The byte-level data loader. Required — there is no usable default.
    pub data_loader: Arc<dyn DataLoader>,
    /// Selects a decoder for each fetch in progress.
    pub image_decoder: Arc<dyn DecoderRegistry>,
    /// Optional external memory cache.
    pub image_cache: Option<Arc<dyn ImageCache>>,
    /// Resolves which processor (if any) applies to a decode result.
    pub image_processor: Arc<dyn ProcessorResolver>,
    /// Maximum concurrent fetch operations.
    pub fetch_concurrency: usize,
    /// Maximum concurrent processing operations.
    pub processing_concurrency: usize,
    /// Whether concurrent requests for the same load key share one fetch.
    pub is_deduplication_enabled: bool,
    /// Whether subscribe/cancel churn is smoothed by a token-bucket limiter.
    pub is_rate_limiter_enabled: bool,
    /// Whether partially-downloaded data may be decoded into interim images.
    pub is_progressive_decoding_enabled: bool,
    /// Token bucket capacity for the rate limiter.
    pub rate_limiter_capacity: u32,
    /// Token bucket refill rate, in tokens per second.
    pub rate_limiter_refill_per_sec: f64,
}

impl PipelineConfig {
    /// Start a builder requiring only the data loader and decoder
    /// registry, the two collaborators with no sensible default.
    pub fn builder(
        data_loader: Arc<dyn DataLoader>,
        image_decoder: Arc<dyn DecoderRegistry>,
    ) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            data_loader,
            image_decoder,
            image_cache: None,
            image_processor: Arc::new(DefaultProcessorResolver),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            processing_concurrency: DEFAULT_PROCESSING_CONCURRENCY,
            is_deduplication_enabled: true,
            is_rate_limiter_enabled: true,
            is_progressive_decoding_enabled: false,
            rate_limiter_capacity: DEFAULT_RATE_LIMITER_CAPACITY,
            rate_limiter_refill_per_sec: DEFAULT_RATE_LIMITER_REFILL_PER_SEC,
        }
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("processing_concurrency", &self.processing_concurrency)
            .field("is_deduplication_enabled", &self.is_deduplication_enabled)
            .field("is_rate_limiter_enabled", &self.is_rate_limiter_enabled)
            .field(
                "is_progressive_decoding_enabled",
                &self.is_progressive_decoding_enabled,
            )
            .field("rate_limiter_capacity", &self.rate_limiter_capacity)
            .field(
                "rate_limiter_refill_per_sec",
                &self.rate_limiter_refill_per_sec,
            )
            .field("has_image_cache", &self.image_cache.is_some())
            .finish()
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    data_loader: Arc<dyn DataLoader>,
    image_decoder: Arc<dyn DecoderRegistry>,
    image_cache: Option<Arc<dyn ImageCache>>,
    image_processor: Arc<dyn ProcessorResolver>,
    fetch_concurrency: usize,
    processing_concurrency: usize,
    is_deduplication_enabled: bool,
    is_rate_limiter_enabled: bool,
    is_progressive_decoding_enabled: bool,
    rate_limiter_capacity: u32,
    rate_limiter_refill_per_sec: f64,
}

impl PipelineConfigBuilder {
    /// Set the external memory cache.
    #[must_use]
    pub fn image_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    /// Override the default processor resolver.
    #[must_use]
    pub fn image_processor(mut self, resolver: Arc<dyn ProcessorResolver>) -> Self {
        self.image_processor = resolver;
        self
    }

    /// Set fetch concurrency (default 6).
    #[must_use]
    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n;
        self
    }

    /// Set processing concurrency (default 2).
    #[must_use]
    pub fn processing_concurrency(mut self, n: usize) -> Self {
        self.processing_concurrency = n;
        self
    }

    /// Enable or disable deduplication (default enabled).
    #[must_use]
    pub fn deduplication_enabled(mut self, enabled: bool) -> Self {
        self.is_deduplication_enabled = enabled;
        self
    }

    /// Enable or disable the rate limiter (default enabled).
    #[must_use]
    pub fn rate_limiter_enabled(mut self, enabled: bool) -> Self {
        self.is_rate_limiter_enabled = enabled;
        self
    }

    /// Enable or disable progressive decoding (default disabled).
    #[must_use]
    pub fn progressive_decoding_enabled(mut self, enabled: bool) -> Self {
        self.is_progressive_decoding_enabled = enabled;
        self
    }

    /// Override the rate limiter's bucket capacity and refill rate.
    #[must_use]
    pub fn rate_limits(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.rate_limiter_capacity = capacity;
        self.rate_limiter_refill_per_sec = refill_per_sec;
        self
    }

    /// Finish building.
    ///
    /// Fails if `fetch_concurrency` or `processing_concurrency` is zero, or
    /// if the rate limiter is enabled with a non-positive, non-finite
    /// refill rate (either of which would otherwise panic later when the
    /// rate limiter computes a retry delay).
    pub fn build(self) -> PipelineResult<PipelineConfig> {
        if self.fetch_concurrency == 0 {
            return Err(ImagePipelineError::Configuration(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.processing_concurrency == 0 {
            return Err(ImagePipelineError::Configuration(
                "processing_concurrency must be at least 1".to_string(),
            ));
        }
        if self.is_rate_limiter_enabled
            && !(self.rate_limiter_refill_per_sec.is_finite() && self.rate_limiter_refill_per_sec > 0.0)
        {
            return Err(ImagePipelineError::Configuration(
                "rate_limiter_refill_per_sec must be a positive, finite number when the rate limiter is enabled".to_string(),
            ));
        }

        Ok(PipelineConfig {
            data_loader: self.data_loader,
            image_decoder: self.image_decoder,
            image_cache: self.image_cache,
            image_processor: self.image_processor,
            fetch_concurrency: self.fetch_concurrency,
            processing_concurrency: self.processing_concurrency,
            is_deduplication_enabled: self.is_deduplication_enabled,
            is_rate_limiter_enabled: self.is_rate_limiter_enabled,
            is_progressive_decoding_enabled: self.is_progressive_decoding_enabled,
            rate_limiter_capacity: self.rate_limiter_capacity,
            rate_limiter_refill_per_sec: self.rate_limiter_refill_per_sec,
        })
    }
}
