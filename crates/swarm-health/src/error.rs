use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error(transparent)]
    Store(#[from] swarm_store::StoreError),

    #[error(transparent)]
    Provider(#[from] swarm_provider::ProviderError),
}
