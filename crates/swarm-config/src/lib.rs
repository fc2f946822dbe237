pub mod error;
mod loader;
mod raw;

pub use error::ConfigError;
pub use loader::{
    load_config, load_partial_config, GeneralConfig, HealthMonitorConfig, MigrationConfig,
    RecoveryActions, SwarmConfig,
};
pub use raw::{
    PartialGeneralConfig, PartialHealthMonitorConfig, PartialMigrationConfig,
    PartialRecoveryActions, PartialSwarmConfig, ProviderConfigEntry,
};
