use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Swarm controller not initialized")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] swarm_config::ConfigError),

    #[error(transparent)]
    Store(#[from] swarm_store::StoreError),

    #[error(transparent)]
    Provider(#[from] swarm_provider::ProviderError),

    #[error(transparent)]
    Health(#[from] swarm_health::HealthError),

    #[error(transparent)]
    Migration(#[from] swarm_migration::MigrationError),

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] regex::Error),
}
