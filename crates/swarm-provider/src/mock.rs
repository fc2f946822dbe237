use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use swarm_domain::types::{
    InstanceConfig, InstanceConfigPatch, InstanceId, InstanceStatus, ObservedNetwork,
    ObservedResources, ProviderMetadata, ProviderType, VSCodeInstance,
};
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::provider::{CommandResult, ListFilter, LogOptions, LogStream, Provider, ProviderCapabilities};

/// In-memory stand-in for a real driver, used by the Health Monitor and
/// Migration Manager test suites. Performs no I/O; every operation is a
/// map mutation, so tests can drive exact failure scenarios (missing
/// instance, non-zero exit code, slow probes) deterministically.
#[derive(Clone)]
pub struct MockProvider {
    provider_type: ProviderType,
    instances: Arc<RwLock<HashMap<InstanceId, VSCodeInstance>>>,
    capabilities: ProviderCapabilities,
    /// Exit code `execute_command` reports for every instance; override
    /// per-test to simulate a failing health probe.
    pub command_exit_code: Arc<RwLock<i32>>,
    pub command_stderr: Arc<RwLock<String>>,
    pub fail_init: bool,
}

impl MockProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            instances: Arc::new(RwLock::new(HashMap::new())),
            capabilities: ProviderCapabilities {
                supports_live_resize: false,
                supports_snapshotting: false,
                supports_multi_region: false,
                supported_regions: None,
                max_instances_per_user: 10,
                max_resources_per_instance: None,
            },
            command_exit_code: Arc::new(RwLock::new(0)),
            command_stderr: Arc::new(RwLock::new(String::new())),
            fail_init: false,
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Seed an instance directly, bypassing `create_instance`, for tests
    /// that need to start from a pre-existing state.
    pub async fn seed(&self, instance: VSCodeInstance) {
        self.instances.write().await.insert(instance.id.clone(), instance);
    }

    pub async fn set_status(&self, id: &InstanceId, status: InstanceStatus) {
        if let Some(instance) = self.instances.write().await.get_mut(id) {
            instance.status = status;
            instance.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type.clone()
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if self.fail_init {
            return Err(ProviderError::InitError("mock provider configured to fail init".into()));
        }
        Ok(())
    }

    async fn create_instance(&self, config: InstanceConfig) -> Result<VSCodeInstance, ProviderError> {
        let id = InstanceId::new();
        let instance = VSCodeInstance {
            id: id.clone(),
            name: config.name.clone(),
            provider_type: self.provider_type.clone(),
            provider_instance_id: format!("mock-{id}"),
            status: InstanceStatus::Running,
            config,
            network: ObservedNetwork::default(),
            resources: ObservedResources::default(),
            metadata: ProviderMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.instances.write().await.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, ProviderError> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn list_instances(&self, filter: Option<&ListFilter>) -> Result<Vec<VSCodeInstance>, ProviderError> {
        let mut instances: Vec<_> = self.instances.read().await.values().cloned().collect();
        if let Some(filter) = filter {
            if let Some(statuses) = &filter.status {
                instances.retain(|i| statuses.contains(&i.status));
            }
            if let Some(pattern) = &filter.name_pattern {
                if let Ok(re) = regex::Regex::new(pattern) {
                    instances.retain(|i| re.is_match(&i.name));
                }
            }
        }
        Ok(instances)
    }

    async fn start_instance(&self, id: &InstanceId) -> Result<VSCodeInstance, ProviderError> {
        let mut guard = self.instances.write().await;
        let instance = guard.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        instance.status = InstanceStatus::Running;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn stop_instance(&self, id: &InstanceId, _force: bool) -> Result<VSCodeInstance, ProviderError> {
        let mut guard = self.instances.write().await;
        let instance = guard.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        instance.status = InstanceStatus::Stopped;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<bool, ProviderError> {
        Ok(self.instances.write().await.remove(id).is_some())
    }

    async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstanceConfigPatch,
    ) -> Result<VSCodeInstance, ProviderError> {
        let mut guard = self.instances.write().await;
        let instance = guard.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        instance.config.apply_patch(patch);
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn get_instance_logs(&self, id: &InstanceId, _opts: LogOptions) -> Result<LogStream, ProviderError> {
        if self.instances.read().await.get(id).is_none() {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(LogStream::Finite(vec!["mock log line".to_string()]))
    }

    async fn execute_command(&self, id: &InstanceId, _command: &str) -> Result<CommandResult, ProviderError> {
        if self.instances.read().await.get(id).is_none() {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(CommandResult {
            exit_code: *self.command_exit_code.read().await,
            stdout: String::new(),
            stderr: self.command_stderr.read().await.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_config() -> InstanceConfig {
        InstanceConfig {
            name: "dev".to_string(),
            image: "codercom/code-server:latest".to_string(),
            workspace_path: "/ws".to_string(),
            resources: swarm_domain::types::ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
            network: Default::default(),
            env: HashMap::new(),
            extensions: vec![],
            auth: swarm_domain::types::AuthConfig {
                auth_type: swarm_domain::types::AuthType::None,
                credentials: HashMap::new(),
            },
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let provider = MockProvider::new(ProviderType::Docker);
        let created = provider.create_instance(dummy_config()).await.unwrap();
        let got = provider.get_instance(&created.id).await.unwrap();
        assert_eq!(got.map(|i| i.id), Some(created.id));
    }

    #[tokio::test]
    async fn stop_then_start_round_trips_status() {
        let provider = MockProvider::new(ProviderType::Docker);
        let created = provider.create_instance(dummy_config()).await.unwrap();
        provider.stop_instance(&created.id, false).await.unwrap();
        let stopped = provider.get_instance(&created.id).await.unwrap().unwrap();
        assert_eq!(stopped.status, InstanceStatus::Stopped);

        provider.start_instance(&created.id).await.unwrap();
        let started = provider.get_instance(&created.id).await.unwrap().unwrap();
        assert_eq!(started.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn delete_removes_instance() {
        let provider = MockProvider::new(ProviderType::Docker);
        let created = provider.create_instance(dummy_config()).await.unwrap();
        assert!(provider.delete_instance(&created.id).await.unwrap());
        assert!(provider.get_instance(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_init_surfaces_error() {
        let provider = MockProvider::new(ProviderType::Docker).failing_init();
        assert!(provider.initialize().await.is_err());
    }
}
