use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use swarm_domain::types::{MigrationStrategy, ProviderType};

/// Partial configuration as parsed from YAML/TOML or passed to
/// `Controller::initialize`. Every field is optional so a caller can
/// override only what they care about; absent fields fall back to
/// [`SwarmConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSwarmConfig {
    pub general: Option<PartialGeneralConfig>,
    pub providers: Option<Vec<ProviderConfigEntry>>,
    pub health_monitor: Option<PartialHealthMonitorConfig>,
    pub migration: Option<PartialMigrationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialGeneralConfig {
    pub state_dir: Option<PathBuf>,
    pub default_provider_type: Option<ProviderType>,
    pub load_state_on_startup: Option<bool>,
    pub auto_save_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigEntry {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialHealthMonitorConfig {
    pub enabled: Option<bool>,
    pub check_interval_ms: Option<u64>,
    pub auto_recover: Option<bool>,
    pub max_recovery_attempts: Option<u32>,
    pub history_size: Option<usize>,
    pub recovery_actions: Option<PartialRecoveryActions>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRecoveryActions {
    pub restart: Option<bool>,
    pub recreate: Option<bool>,
    pub migrate: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialMigrationConfig {
    pub enabled: Option<bool>,
    pub default_strategy: Option<MigrationStrategy>,
    pub timeout_ms: Option<u64>,
}
