pub mod docker;
pub mod error;
pub mod flyio;
pub mod mock;
pub mod provider;
pub mod registry;

pub use docker::DockerProvider;
pub use error::ProviderError;
pub use flyio::FlyioProvider;
pub use mock::MockProvider;
pub use provider::{CommandResult, ListFilter, LogOptions, LogStream, Provider, ProviderCapabilities};
pub use registry::ProviderRegistry;
