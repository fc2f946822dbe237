use std::path::{Path, PathBuf};

use swarm_domain::types::{MigrationStrategy, ProviderType};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{
    PartialGeneralConfig, PartialHealthMonitorConfig, PartialMigrationConfig,
    PartialRecoveryActions, PartialSwarmConfig, ProviderConfigEntry,
};

/// Fully-resolved configuration the Swarm Controller runs with. Produced by
/// layering a [`PartialSwarmConfig`] (from YAML, or passed directly to
/// `Controller::initialize`) onto [`SwarmConfig::default`].
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmConfig {
    pub general: GeneralConfig,
    pub providers: Vec<ProviderConfigEntry>,
    pub health_monitor: HealthMonitorConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralConfig {
    pub state_dir: PathBuf,
    pub default_provider_type: ProviderType,
    pub load_state_on_startup: bool,
    pub auto_save_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryActions {
    pub restart: bool,
    pub recreate: bool,
    pub migrate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    pub auto_recover: bool,
    pub max_recovery_attempts: u32,
    pub history_size: usize,
    pub recovery_actions: RecoveryActions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationConfig {
    pub enabled: bool,
    pub default_strategy: MigrationStrategy,
    pub timeout_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            default_provider_type: ProviderType::Docker,
            load_state_on_startup: true,
            auto_save_interval_ms: 60_000,
        }
    }
}

impl Default for RecoveryActions {
    fn default() -> Self {
        Self {
            restart: true,
            recreate: false,
            migrate: false,
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 60_000,
            auto_recover: true,
            max_recovery_attempts: 3,
            history_size: 10,
            recovery_actions: RecoveryActions::default(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_strategy: MigrationStrategy::StopAndRecreate,
            timeout_ms: 300_000,
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            providers: Vec::new(),
            health_monitor: HealthMonitorConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

/// `~/.vscode-remote-swarm`, falling back to `./.vscode-remote-swarm` if the
/// home directory can't be resolved (e.g. a minimal container environment).
fn default_state_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Path::new(&home).join(".vscode-remote-swarm"),
        _ => PathBuf::from(".vscode-remote-swarm"),
    }
}

impl SwarmConfig {
    /// Layer a partial override onto the default configuration. Every field
    /// left `None` in `partial` falls back to the default; set fields
    /// replace it wholesale (no deep-merge below the field level).
    pub fn merge(partial: PartialSwarmConfig) -> Self {
        let mut config = Self::default();
        config.apply(partial);
        config
    }

    /// Apply a partial override onto an already-resolved config in place.
    pub fn apply(&mut self, partial: PartialSwarmConfig) {
        if let Some(general) = partial.general {
            self.apply_general(general);
        }
        if let Some(providers) = partial.providers {
            self.providers = providers;
        }
        if let Some(health_monitor) = partial.health_monitor {
            self.apply_health_monitor(health_monitor);
        }
        if let Some(migration) = partial.migration {
            self.apply_migration(migration);
        }
    }

    fn apply_general(&mut self, partial: PartialGeneralConfig) {
        if let Some(state_dir) = partial.state_dir {
            self.general.state_dir = state_dir;
        }
        if let Some(default_provider_type) = partial.default_provider_type {
            self.general.default_provider_type = default_provider_type;
        }
        if let Some(load_state_on_startup) = partial.load_state_on_startup {
            self.general.load_state_on_startup = load_state_on_startup;
        }
        if let Some(auto_save_interval_ms) = partial.auto_save_interval_ms {
            self.general.auto_save_interval_ms = auto_save_interval_ms;
        }
    }

    fn apply_health_monitor(&mut self, partial: PartialHealthMonitorConfig) {
        if let Some(enabled) = partial.enabled {
            self.health_monitor.enabled = enabled;
        }
        if let Some(check_interval_ms) = partial.check_interval_ms {
            self.health_monitor.check_interval_ms = check_interval_ms;
        }
        if let Some(auto_recover) = partial.auto_recover {
            self.health_monitor.auto_recover = auto_recover;
        }
        if let Some(max_recovery_attempts) = partial.max_recovery_attempts {
            self.health_monitor.max_recovery_attempts = max_recovery_attempts;
        }
        if let Some(history_size) = partial.history_size {
            self.health_monitor.history_size = history_size;
        }
        if let Some(recovery_actions) = partial.recovery_actions {
            self.apply_recovery_actions(recovery_actions);
        }
    }

    fn apply_recovery_actions(&mut self, partial: PartialRecoveryActions) {
        if let Some(restart) = partial.restart {
            self.health_monitor.recovery_actions.restart = restart;
        }
        if let Some(recreate) = partial.recreate {
            self.health_monitor.recovery_actions.recreate = recreate;
        }
        if let Some(migrate) = partial.migrate {
            self.health_monitor.recovery_actions.migrate = migrate;
        }
    }

    fn apply_migration(&mut self, partial: PartialMigrationConfig) {
        if let Some(enabled) = partial.enabled {
            self.migration.enabled = enabled;
        }
        if let Some(default_strategy) = partial.default_strategy {
            self.migration.default_strategy = default_strategy;
        }
        if let Some(timeout_ms) = partial.timeout_ms {
            self.migration.timeout_ms = timeout_ms;
        }
    }
}

/// Read and parse a YAML config file into a [`PartialSwarmConfig`]. Caller
/// merges it onto [`SwarmConfig::default`] via [`SwarmConfig::merge`].
pub fn load_partial_config(path: &Path) -> Result<PartialSwarmConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!(path = %path.display(), "loading swarm config");
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Convenience wrapper: load a YAML file and merge it onto the default
/// configuration in one call.
pub fn load_config(path: &Path) -> Result<SwarmConfig, ConfigError> {
    let partial = load_partial_config(path)?;
    Ok(SwarmConfig::merge(partial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.general.auto_save_interval_ms, 60_000);
        assert_eq!(config.health_monitor.check_interval_ms, 60_000);
        assert_eq!(config.health_monitor.history_size, 10);
        assert_eq!(config.health_monitor.max_recovery_attempts, 3);
        assert!(config.health_monitor.recovery_actions.restart);
        assert!(!config.health_monitor.recovery_actions.recreate);
        assert!(!config.health_monitor.recovery_actions.migrate);
        assert_eq!(config.migration.timeout_ms, 300_000);
        assert_eq!(config.migration.default_strategy, MigrationStrategy::StopAndRecreate);
    }

    #[test]
    fn merge_overrides_only_set_fields() {
        let partial = PartialSwarmConfig {
            health_monitor: Some(PartialHealthMonitorConfig {
                check_interval_ms: Some(5_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = SwarmConfig::merge(partial);
        assert_eq!(config.health_monitor.check_interval_ms, 5_000);
        // Untouched fields keep their defaults.
        assert_eq!(config.health_monitor.history_size, 10);
        assert_eq!(config.migration.timeout_ms, 300_000);
    }

    #[test]
    fn load_partial_config_reads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "general:\n  autoSaveIntervalMs: 12345\nmigration:\n  enabled: false\n"
        )
        .unwrap();
        let partial = load_partial_config(file.path()).expect("should parse");
        assert_eq!(
            partial.general.unwrap().auto_save_interval_ms,
            Some(12345)
        );
        assert_eq!(partial.migration.unwrap().enabled, Some(false));
    }

    #[test]
    fn missing_file_returns_io_error() {
        let err = load_partial_config(Path::new("/nonexistent/path/does/not/exist.yml"))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
