use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        PlanId(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Provider type ─────────────────────────────────────────────────────────────

/// Open-ended tag identifying an infrastructure driver. The built-in set is
/// enumerated here; new drivers register additional `Other(String)` values.
/// Serializes/deserializes as its bare lowercase string (`"docker"`,
/// `"flyio"`, or any other driver name) so on-disk records stay readable
/// when a new driver is registered — the same trick `PartitionBackend`
/// uses to stay forward-compatible across a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderType {
    Docker,
    Flyio,
    Other(String),
}

impl ProviderType {
    /// The built-in provider types the control plane ships drivers for.
    /// `getSwarmStatus` iterates this set to report on every known provider,
    /// not just the ones currently configured.
    pub fn builtin() -> &'static [ProviderType] {
        &[ProviderType::Docker, ProviderType::Flyio]
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Docker => write!(f, "docker"),
            ProviderType::Flyio => write!(f, "flyio"),
            ProviderType::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "docker" => ProviderType::Docker,
            "flyio" => ProviderType::Flyio,
            other => ProviderType::Other(other.to_string()),
        })
    }
}

impl Serialize for ProviderType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProviderType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("ProviderType::from_str is infallible"))
    }
}

// ── Instance lifecycle ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Deleted,
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Created => "created",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Deleted => "deleted",
            InstanceStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

// ── InstanceConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu: f64,
    pub memory: String,
    pub storage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub container_port: u16,
    /// 0 means "let the provider pick a host port".
    pub host_port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub public_access: bool,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    None,
    Password,
    Token,
    Ssh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

/// Desired-state descriptor for an instance. Immutable after creation except
/// through `updateInstance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub image: String,
    pub workspace_path: String,
    pub resources: ResourceSpec,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    pub auth: AuthConfig,
}

/// Fields of `InstanceConfig` an `updateInstance` call may change. Unset
/// fields leave the stored config unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfigPatch {
    pub image: Option<String>,
    pub resources: Option<ResourceSpec>,
    pub network: Option<NetworkSpec>,
    pub env: Option<HashMap<String, String>>,
    pub extensions: Option<Vec<String>>,
}

impl InstanceConfig {
    pub fn apply_patch(&mut self, patch: InstanceConfigPatch) {
        if let Some(image) = patch.image {
            self.image = image;
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        if let Some(network) = patch.network {
            self.network = network;
        }
        if let Some(env) = patch.env {
            self.env = env;
        }
        if let Some(extensions) = patch.extensions {
            self.extensions = extensions;
        }
    }
}

// ── Provider-scoped metadata ──────────────────────────────────────────────────

/// Docker driver bookkeeping: enough to address the container later.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DockerMetadata {
    pub container_id: Option<String>,
}

/// fly.io driver bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlyMetadata {
    pub app_name: Option<String>,
    pub machine_id: Option<String>,
    pub volume_id: Option<String>,
    pub ip_address_id: Option<String>,
    pub region: Option<String>,
}

/// Heterogeneous provider-scoped bag, re-architected from a dynamic record
/// into a tagged sum discriminated by `VSCodeInstance::provider_type`. On
/// disk it stays an open JSON object so unrecognized keys round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderMetadata {
    Docker(DockerMetadata),
    Fly(FlyMetadata),
    /// Any provider not built in, or a record written by a newer driver.
    Opaque(serde_json::Map<String, serde_json::Value>),
}

impl Default for ProviderMetadata {
    fn default() -> Self {
        ProviderMetadata::Opaque(serde_json::Map::new())
    }
}

// ── VSCodeInstance ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObservedNetwork {
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservedResources {
    pub used: Option<ResourceSpec>,
    pub limit: Option<ResourceSpec>,
}

/// The observed record for one managed instance, as maintained by the
/// Instance Registry. `(provider_type, provider_instance_id)` uniquely
/// identifies the instance with its driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VSCodeInstance {
    pub id: InstanceId,
    pub name: String,
    pub provider_type: ProviderType,
    pub provider_instance_id: String,
    pub status: InstanceStatus,
    pub config: InstanceConfig,
    #[serde(default)]
    pub network: ObservedNetwork,
    #[serde(default)]
    pub resources: ObservedResources,
    #[serde(default)]
    pub metadata: ProviderMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Health ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
    Recovering,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Recovering => "recovering",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthDetails {
    pub message: String,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// One entry in an instance's bounded `healthHistory` ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthHistoryEntry {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub details: HealthDetails,
}

/// Result of a single probe, returned by `checkInstanceHealth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub instance_id: InstanceId,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub details: HealthDetails,
}

/// Durable per-instance health record, owned by the Health Monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub instance_id: InstanceId,
    pub status: HealthStatus,
    pub last_checked: DateTime<Utc>,
    pub details: HealthDetails,
    /// Newest-first, capacity bounded to the configured `historySize`.
    pub health_history: Vec<HealthHistoryEntry>,
}

impl InstanceHealth {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            status: HealthStatus::Unknown,
            last_checked: Utc::now(),
            details: HealthDetails::default(),
            health_history: Vec::new(),
        }
    }

    /// Prepend a new entry and truncate to `history_size`. `history_size == 0`
    /// degenerates to an empty history (still records `status`/`last_checked`).
    pub fn record(&mut self, status: HealthStatus, checked_at: DateTime<Utc>, details: HealthDetails, history_size: usize) {
        self.status = status;
        self.last_checked = checked_at;
        self.details = details.clone();
        self.health_history.insert(0, HealthHistoryEntry { status, checked_at, details });
        self.health_history.truncate(history_size);
    }
}

// ── Migration ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    StopAndRecreate,
    CreateThenStop,
}

impl Default for MigrationStrategy {
    fn default() -> Self {
        MigrationStrategy::StopAndRecreate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Prepare,
    ValidateSource,
    ValidateTargetProvider,
    StopSource,
    ExportSourceConfig,
    CreateTarget,
    StartTarget,
    VerifyTarget,
    CleanupSource,
    Complete,
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepName::Prepare => "prepare",
            StepName::ValidateSource => "validate_source",
            StepName::ValidateTargetProvider => "validate_target_provider",
            StepName::StopSource => "stop_source",
            StepName::ExportSourceConfig => "export_source_config",
            StepName::CreateTarget => "create_target",
            StepName::StartTarget => "start_target",
            StepName::VerifyTarget => "verify_target",
            StepName::CleanupSource => "cleanup_source",
            StepName::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

impl StepName {
    pub fn description(&self) -> &'static str {
        match self {
            StepName::Prepare => "Preflight hook (no-op)",
            StepName::ValidateSource => "Confirm the source instance still exists",
            StepName::ValidateTargetProvider => "Confirm the target provider has capacity",
            StepName::StopSource => "Stop the source instance",
            StepName::ExportSourceConfig => "Snapshot the source instance's config",
            StepName::CreateTarget => "Create the instance on the target provider",
            StepName::StartTarget => "Start the target instance",
            StepName::VerifyTarget => "Verify the target instance is in the expected state",
            StepName::CleanupSource => "Delete the source instance",
            StepName::Complete => "Mark the migration complete",
        }
    }

    /// Step sequence for a given migration strategy.
    pub fn sequence_for(strategy: MigrationStrategy) -> Vec<StepName> {
        let mut steps = vec![
            StepName::Prepare,
            StepName::ValidateSource,
            StepName::ValidateTargetProvider,
        ];
        match strategy {
            MigrationStrategy::StopAndRecreate => {
                steps.extend([
                    StepName::StopSource,
                    StepName::ExportSourceConfig,
                    StepName::CreateTarget,
                    StepName::StartTarget,
                    StepName::VerifyTarget,
                    StepName::CleanupSource,
                ]);
            }
            MigrationStrategy::CreateThenStop => {
                steps.extend([
                    StepName::ExportSourceConfig,
                    StepName::CreateTarget,
                    StepName::StartTarget,
                    StepName::VerifyTarget,
                    StepName::StopSource,
                    StepName::CleanupSource,
                ]);
            }
        }
        steps.push(StepName::Complete);
        steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStep {
    pub name: StepName,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MigrationStep {
    pub fn pending(name: StepName) -> Self {
        Self {
            description: name.description().to_string(),
            name,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl MigrationStatus {
    /// Terminal statuses are monotone: once reached, the plan never
    /// transitions further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed
                | MigrationStatus::Failed
                | MigrationStatus::Cancelled
                | MigrationStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: PlanId,
    pub source_instance_id: InstanceId,
    pub source_provider_type: ProviderType,
    pub target_provider_type: ProviderType,
    pub strategy: MigrationStrategy,
    pub keep_source: bool,
    pub start_target: bool,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub steps: Vec<MigrationStep>,
    pub current_step_index: usize,
    pub status: MigrationStatus,
    pub target_instance_id: Option<InstanceId>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationPlan {
    /// Current step, or `None` once `current_step_index` has walked off the
    /// end (all steps completed).
    pub fn current_step(&self) -> Option<&MigrationStep> {
        self.steps.get(self.current_step_index)
    }
}
