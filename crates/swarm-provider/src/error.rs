use thiserror::Error;

/// Uniform error surface every driver translates its native errors into:
/// `NotFound`/`ValidationError`/`ProviderInitError`/`ProviderError`/
/// `ResourceLimitError`/`Timeout`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider initialization failed: {0}")]
    InitError(String),

    #[error("provider operation failed: {0}")]
    Operation(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal provider error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Operation(err.to_string())
        }
    }
}
