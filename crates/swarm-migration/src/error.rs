use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration plan {0} not found")]
    PlanNotFound(String),

    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("migration plan {0} is already in a terminal state")]
    AlreadyTerminal(String),

    #[error(transparent)]
    Store(#[from] swarm_store::StoreError),

    #[error(transparent)]
    Provider(#[from] swarm_provider::ProviderError),
}
