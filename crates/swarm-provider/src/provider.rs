use chrono::{DateTime, Utc};
use async_trait::async_trait;
use swarm_domain::types::{
    InstanceConfig, InstanceConfigPatch, InstanceId, InstanceStatus, ProviderType, VSCodeInstance,
};
use tokio::sync::mpsc;

use crate::error::ProviderError;

/// Static, cheap-to-compute description of what a driver can do. Consulted
/// by the Migration Manager's `validate_target_provider` step and surfaced
/// through `Controller::getProviderCapabilities`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCapabilities {
    pub supports_live_resize: bool,
    pub supports_snapshotting: bool,
    pub supports_multi_region: bool,
    pub supported_regions: Option<Vec<String>>,
    pub max_instances_per_user: u32,
    pub max_resources_per_instance: Option<swarm_domain::types::ResourceSpec>,
}

/// Optional predicate set for `listInstances`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Vec<InstanceStatus>>,
    pub name_pattern: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub lines: Option<u32>,
    pub since: Option<DateTime<Utc>>,
    pub follow: bool,
}

/// `getInstanceLogs` result: a finite batch when `follow=false`, or a
/// cancellable channel of lines when `follow=true` — dropping the receiver
/// is the cancellation signal, the idiomatic tokio equivalent of an
/// unsubscribe call.
#[derive(Debug)]
pub enum LogStream {
    Finite(Vec<String>),
    Follow(mpsc::Receiver<String>),
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Uniform contract each infrastructure driver implements. The Controller
/// is polymorphic over this trait and never touches a concrete driver type
/// directly.
///
/// Every method besides `create_instance` addresses an instance by the
/// [`InstanceId`] that `create_instance` assigned; implementations keep
/// their own internal mapping from that id to whatever handle the
/// underlying infrastructure API actually wants (container id, machine id).
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn provider_type(&self) -> ProviderType;

    /// Must be pure and cheap — no network calls.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Ready the driver: validate auth, ensure default network/volumes.
    async fn initialize(&self) -> Result<(), ProviderError>;

    async fn create_instance(&self, config: InstanceConfig) -> Result<VSCodeInstance, ProviderError>;

    /// Never mutates; returns the driver-observed state.
    async fn get_instance(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, ProviderError>;

    async fn list_instances(
        &self,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<VSCodeInstance>, ProviderError>;

    async fn start_instance(&self, id: &InstanceId) -> Result<VSCodeInstance, ProviderError>;

    async fn stop_instance(&self, id: &InstanceId, force: bool) -> Result<VSCodeInstance, ProviderError>;

    async fn delete_instance(&self, id: &InstanceId) -> Result<bool, ProviderError>;

    async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstanceConfigPatch,
    ) -> Result<VSCodeInstance, ProviderError>;

    async fn get_instance_logs(
        &self,
        id: &InstanceId,
        opts: LogOptions,
    ) -> Result<LogStream, ProviderError>;

    async fn execute_command(&self, id: &InstanceId, command: &str) -> Result<CommandResult, ProviderError>;
}
