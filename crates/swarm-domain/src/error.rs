use thiserror::Error;

/// Validation failures for `InstanceConfig`, raised before a config ever
/// reaches a provider. Kept separate from `ProviderError`'s `ValidationError`
/// kind (swarm-provider) so the domain crate stays provider-agnostic.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("instance name must not be empty")]
    EmptyName,

    #[error("instance image must not be empty")]
    EmptyImage,

    #[error("resources.cpu must be greater than zero, got {0}")]
    InvalidCpu(f64),

    #[error("duplicate host port {0} in network spec")]
    DuplicateHostPort(u16),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
