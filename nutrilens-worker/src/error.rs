//! Worker-side error types.

use crate::providers::ProviderError;
use crate::router::RouteError;
use crate::storage::StorageError;

/// Failure of one inference attempt, before classification.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Provider routing failed: {0}")]
    Routing(#[from] RouteError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Provider refused the request: {reason}")]
    Refused { reason: String },

    #[error("Provider returned unusable output: {0}")]
    BadResponse(String),

    #[error("Provider returned empty output")]
    Empty,

    #[error("Image storage failed: {0}")]
    Storage(#[from] StorageError),
}
