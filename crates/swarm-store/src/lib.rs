pub mod error;
mod file_backend;
mod health_store;
mod instance_registry;
mod migration_store;

pub use error::StoreError;
pub use file_backend::RecordDir;
pub use health_store::{FileHealthStore, HealthStore, InMemoryHealthStore};
pub use instance_registry::{FileInstanceRegistry, InMemoryInstanceRegistry, InstanceRegistry};
pub use migration_store::{FileMigrationStore, InMemoryMigrationStore, MigrationStore};
