//! nutrilens-worker: the asynchronous nutrition inference pipeline.
//!
//! Claims queued inference tasks, routes them to a vision provider, turns
//! unreliable model output into canonical results and records the outcome.

pub mod analyzer;
pub mod error;
pub mod error_mapper;
pub mod limiter;
pub mod postprocess;
pub mod providers;
pub mod resilience;
pub mod retry_policy;
pub mod router;
pub mod storage;
pub mod worker;

pub use analyzer::NutritionAnalyzer;
pub use error::InferenceError;
pub use error_mapper::{ErrorCode, MappedError, map_error};
pub use limiter::{InFlightLimiter, InFlightPermit, LocalInFlightLimiter};
pub use postprocess::{PostProcessor, SanityPostProcessor};
pub use providers::provider::{
    InlineImage, Provider, ProviderContentBlock, ProviderError, ProviderRequest, ProviderResponse,
    ProviderUsage, extract_all_text,
};
pub use retry_policy::RetryPolicy;
pub use router::{ProviderRouter, RouteError, RoutedProvider};
pub use storage::{BlobObject, BlobStore, FsBlobStore, StorageError};
pub use worker::{CycleReport, Worker, start_reaper_runner, start_worker_runner};
