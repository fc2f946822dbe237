use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("health record not found: {0}")]
    HealthNotFound(String),

    #[error("migration plan not found: {0}")]
    PlanNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
