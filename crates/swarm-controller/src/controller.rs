use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use swarm_config::{PartialSwarmConfig, SwarmConfig};
use swarm_domain::types::{
    HealthCheckResult, HealthStatus, InstanceConfig, InstanceConfigPatch, InstanceHealth,
    InstanceId, InstanceStatus, MigrationPlan, MigrationStatus, PlanId, ProviderType,
    VSCodeInstance,
};
use swarm_health::HealthMonitor;
use swarm_migration::{MigrationManager, MigrationOptions, MigrationResult};
use swarm_provider::{ProviderCapabilities, ProviderRegistry};
use swarm_store::{
    FileHealthStore, FileInstanceRegistry, FileMigrationStore, HealthStore, InstanceRegistry,
    MigrationStore,
};
use tracing::{info, warn};

use crate::error::ControllerError;
use crate::filter::InstanceFilter;

/// One row of `getSwarmStatus`'s `providers` array.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub instance_count: usize,
}

#[derive(Debug, Clone)]
pub struct SwarmStatus {
    pub initialized: bool,
    pub providers: Vec<ProviderStatus>,
    pub total_instances: usize,
    pub health_monitor_enabled: bool,
    pub migration_enabled: bool,
}

/// Facade and dispatcher over the Instance Registry, Health Monitor, and
/// Migration Manager. The single entry point clients use;
/// every public method requires a prior successful [`SwarmController::initialize`].
pub struct SwarmController {
    initialized: AtomicBool,
    config: std::sync::RwLock<Option<SwarmConfig>>,
    registry: std::sync::RwLock<Option<Arc<dyn InstanceRegistry>>>,
    providers: std::sync::RwLock<Option<Arc<ProviderRegistry>>>,
    health: std::sync::RwLock<Option<Arc<HealthMonitor>>>,
    migration: std::sync::RwLock<Option<Arc<MigrationManager>>>,
}

impl Default for SwarmController {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmController {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            config: std::sync::RwLock::new(None),
            registry: std::sync::RwLock::new(None),
            providers: std::sync::RwLock::new(None),
            health: std::sync::RwLock::new(None),
            migration: std::sync::RwLock::new(None),
        }
    }

    /// Merges `partial_config` onto defaults, constructs providers for each
    /// enabled entry, initializes each (failures logged, not fatal), then
    /// initializes the Registry, Health Monitor, and Migration Manager in
    /// that order.
    pub async fn initialize(self: &Arc<Self>, partial_config: Option<PartialSwarmConfig>) -> Result<(), ControllerError> {
        let config = SwarmConfig::merge(partial_config.unwrap_or_default());

        let providers = Arc::new(ProviderRegistry::from_config(
            config.general.default_provider_type.clone(),
            &config.providers,
        ));
        for (provider_type, provider) in providers.iter() {
            if let Err(err) = provider.initialize().await {
                warn!(%provider_type, %err, "provider failed to initialize; leaving it registered but unready");
            }
        }

        self.initialize_with_providers(config, providers).await
    }

    /// Shared tail of `initialize`, split out so tests can supply a
    /// pre-built [`ProviderRegistry`] (e.g. backed by test doubles) without
    /// going through [`ProviderRegistry::from_config`].
    async fn initialize_with_providers(
        self: &Arc<Self>,
        config: SwarmConfig,
        providers: Arc<ProviderRegistry>,
    ) -> Result<(), ControllerError> {
        let registry: Arc<dyn InstanceRegistry> = Arc::new(FileInstanceRegistry::new(
            config.general.state_dir.clone(),
            config.general.load_state_on_startup,
            config.general.auto_save_interval_ms,
        ));
        registry.initialize().await?;

        let health_store: Arc<dyn HealthStore> =
            Arc::new(FileHealthStore::new(config.general.state_dir.clone()));
        let health = Arc::new(HealthMonitor::new(
            config.health_monitor.clone(),
            registry.clone(),
            providers.clone(),
            health_store,
        ));
        health.initialize().await?;

        let migration_store: Arc<dyn MigrationStore> =
            Arc::new(FileMigrationStore::new(config.general.state_dir.clone()));
        let migration = Arc::new(MigrationManager::new(
            config.migration.clone(),
            migration_store,
            registry.clone(),
            providers.clone(),
        ));
        migration.initialize().await?;

        *self.config.write().expect("config lock poisoned") = Some(config);
        *self.registry.write().expect("registry lock poisoned") = Some(registry);
        *self.providers.write().expect("providers lock poisoned") = Some(providers);
        *self.health.write().expect("health lock poisoned") = Some(health);
        *self.migration.write().expect("migration lock poisoned") = Some(migration);
        self.initialized.store(true, Ordering::SeqCst);
        info!("swarm controller initialized");
        Ok(())
    }

    fn require_initialized(&self) -> Result<(), ControllerError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ControllerError::NotInitialized)
        }
    }

    fn registry(&self) -> Result<Arc<dyn InstanceRegistry>, ControllerError> {
        self.require_initialized()?;
        Ok(self.registry.read().expect("registry lock poisoned").clone().expect("initialized"))
    }

    fn providers(&self) -> Result<Arc<ProviderRegistry>, ControllerError> {
        self.require_initialized()?;
        Ok(self.providers.read().expect("providers lock poisoned").clone().expect("initialized"))
    }

    fn health(&self) -> Result<Arc<HealthMonitor>, ControllerError> {
        self.require_initialized()?;
        Ok(self.health.read().expect("health lock poisoned").clone().expect("initialized"))
    }

    fn migration(&self) -> Result<Arc<MigrationManager>, ControllerError> {
        self.require_initialized()?;
        Ok(self.migration.read().expect("migration lock poisoned").clone().expect("initialized"))
    }

    fn default_provider_type(&self) -> Result<ProviderType, ControllerError> {
        self.require_initialized()?;
        Ok(self
            .config
            .read()
            .expect("config lock poisoned")
            .as_ref()
            .expect("initialized")
            .general
            .default_provider_type
            .clone())
    }

    pub async fn create_instance(
        &self,
        config: InstanceConfig,
        provider_type: Option<ProviderType>,
    ) -> Result<VSCodeInstance, ControllerError> {
        let provider_type = provider_type.unwrap_or(self.default_provider_type()?);
        let provider = self.providers()?.for_type(&provider_type)?;
        let instance = provider.create_instance(config).await?;
        self.registry()?.upsert(&instance).await?;
        Ok(instance)
    }

    /// Registry lookup with a best-effort refresh: if found, consults the
    /// owning provider and returns the live state; on provider error,
    /// returns the cached Registry record instead.
    pub async fn get_instance(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, ControllerError> {
        let registry = self.registry()?;
        let Some(cached) = registry.get(id).await? else { return Ok(None) };

        let providers = self.providers()?;
        let Ok(provider) = providers.for_type(&cached.provider_type) else {
            return Ok(Some(cached));
        };
        match provider.get_instance(id).await {
            Ok(Some(observed)) => {
                registry.upsert(&observed).await?;
                Ok(Some(observed))
            }
            Ok(None) => Ok(Some(cached)),
            Err(_) => Ok(Some(cached)),
        }
    }

    pub async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<VSCodeInstance>, ControllerError> {
        let mut instances = self.registry()?.list().await?;

        if let Some(statuses) = &filter.status {
            instances.retain(|i| statuses.contains(&i.status));
        }
        if let Some(pattern) = &filter.name_pattern {
            let re = Regex::new(pattern)?;
            instances.retain(|i| re.is_match(&i.name));
        }
        if let Some(after) = filter.created_after {
            instances.retain(|i| i.created_at > after);
        }
        if let Some(before) = filter.created_before {
            instances.retain(|i| i.created_at < before);
        }
        if !filter.tags.is_empty() {
            instances.retain(|i| {
                let swarm_domain::types::ProviderMetadata::Opaque(map) = &i.metadata else {
                    return false;
                };
                filter.tags.iter().all(|(k, v)| map.get(k) == Some(v))
            });
        }

        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let offset = filter.offset.unwrap_or(0);
        let instances = instances.into_iter().skip(offset);
        Ok(match filter.limit {
            Some(limit) => instances.take(limit).collect(),
            None => instances.collect(),
        })
    }

    async fn resolve_provider(&self, id: &InstanceId) -> Result<(Arc<dyn swarm_provider::Provider>, VSCodeInstance), ControllerError> {
        let registry = self.registry()?;
        let instance = registry
            .get(id)
            .await?
            .ok_or_else(|| ControllerError::Provider(swarm_provider::ProviderError::NotFound(id.to_string())))?;
        let provider = self.providers()?.for_type(&instance.provider_type)?;
        Ok((provider, instance))
    }

    pub async fn start_instance(&self, id: &InstanceId) -> Result<VSCodeInstance, ControllerError> {
        let (provider, _) = self.resolve_provider(id).await?;
        let updated = provider.start_instance(id).await?;
        self.registry()?.upsert(&updated).await?;
        Ok(updated)
    }

    pub async fn stop_instance(&self, id: &InstanceId, force: bool) -> Result<VSCodeInstance, ControllerError> {
        let (provider, _) = self.resolve_provider(id).await?;
        let updated = provider.stop_instance(id, force).await?;
        self.registry()?.upsert(&updated).await?;
        Ok(updated)
    }

    pub async fn delete_instance(&self, id: &InstanceId) -> Result<bool, ControllerError> {
        let (provider, _) = self.resolve_provider(id).await?;
        let deleted = provider.delete_instance(id).await?;
        if deleted {
            self.registry()?.remove(id).await?;
        }
        Ok(deleted)
    }

    pub async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstanceConfigPatch,
    ) -> Result<VSCodeInstance, ControllerError> {
        let (provider, _) = self.resolve_provider(id).await?;
        let updated = provider.update_instance(id, patch).await?;
        self.registry()?.upsert(&updated).await?;
        Ok(updated)
    }

    pub async fn check_instance_health(&self, id: &InstanceId) -> Result<HealthCheckResult, ControllerError> {
        Ok(self.health()?.check_instance_health(id).await?)
    }

    pub async fn list_instance_health(&self, status: Option<HealthStatus>) -> Result<Vec<InstanceHealth>, ControllerError> {
        Ok(self.health()?.list_instance_health(status).await?)
    }

    pub async fn get_instance_health(&self, id: &InstanceId) -> Result<Option<InstanceHealth>, ControllerError> {
        Ok(self.health()?.get_instance_health(id).await?)
    }

    pub async fn recover_instance(&self, id: &InstanceId) -> Result<bool, ControllerError> {
        Ok(self.health()?.recover_instance(id).await?)
    }

    pub async fn create_migration_plan(
        &self,
        source_id: InstanceId,
        target_provider_type: ProviderType,
        options: MigrationOptions,
    ) -> Result<MigrationPlan, ControllerError> {
        Ok(self.migration()?.create_migration_plan(source_id, target_provider_type, options).await?)
    }

    pub async fn start_migration(&self, plan_id: &PlanId) -> Result<MigrationResult, ControllerError> {
        Ok(self.migration()?.start_migration(plan_id).await?)
    }

    pub async fn cancel_migration(&self, plan_id: &PlanId) -> Result<bool, ControllerError> {
        Ok(self.migration()?.cancel_migration(plan_id).await?)
    }

    pub async fn get_migration_plan(&self, plan_id: &PlanId) -> Result<Option<MigrationPlan>, ControllerError> {
        Ok(self.migration()?.get_migration_plan(plan_id).await?)
    }

    pub async fn list_migration_plans(&self, status: Option<MigrationStatus>) -> Result<Vec<MigrationPlan>, ControllerError> {
        Ok(self.migration()?.list_migration_plans(status).await?)
    }

    pub async fn get_provider_capabilities(&self, provider_type: &ProviderType) -> Result<ProviderCapabilities, ControllerError> {
        let provider = self.providers()?.for_type(provider_type)?;
        Ok(provider.capabilities())
    }

    pub async fn get_swarm_status(&self) -> Result<SwarmStatus, ControllerError> {
        self.require_initialized()?;
        let providers = self.providers()?;
        let registry = self.registry()?;
        let instances = registry.list().await?;

        let mut rows = Vec::new();
        let mut total = 0usize;
        for provider_type in ProviderType::builtin() {
            let enabled = providers.is_enabled(provider_type);
            let instance_count = instances.iter().filter(|i| &i.provider_type == provider_type).count();
            total += instance_count;
            rows.push(ProviderStatus { provider_type: provider_type.clone(), enabled, instance_count });
        }

        let config = self.config.read().expect("config lock poisoned");
        let config = config.as_ref().expect("initialized");

        Ok(SwarmStatus {
            initialized: true,
            providers: rows,
            total_instances: total,
            health_monitor_enabled: config.health_monitor.enabled,
            migration_enabled: config.migration.enabled,
        })
    }

    /// Disposes Health, Migration, and Registry in that order; each
    /// failure is logged but does not abort the others. Always marks the
    /// controller uninitialized on return.
    pub async fn dispose(&self) -> Result<(), ControllerError> {
        if let Some(health) = self.health.read().expect("health lock poisoned").clone() {
            if let Err(err) = health.dispose().await {
                warn!(%err, "health monitor failed to dispose cleanly");
            }
        }
        if let Some(migration) = self.migration.read().expect("migration lock poisoned").clone() {
            if let Err(err) = migration.dispose().await {
                warn!(%err, "migration manager failed to dispose cleanly");
            }
        }
        if let Some(registry) = self.registry.read().expect("registry lock poisoned").clone() {
            if let Err(err) = registry.dispose().await {
                warn!(%err, "instance registry failed to dispose cleanly");
            }
        }
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use swarm_domain::types::{AuthConfig, AuthType, NetworkSpec, ResourceSpec};
    use swarm_provider::MockProvider;

    fn dummy_config(name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            image: "codercom/code-server:latest".to_string(),
            workspace_path: "/ws".to_string(),
            resources: ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
            network: NetworkSpec::default(),
            env: HashMap::new(),
            extensions: vec![],
            auth: AuthConfig { auth_type: AuthType::None, credentials: HashMap::new() },
        }
    }

    async fn harness() -> (Arc<SwarmController>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = SwarmConfig::default();
        config.general.state_dir = tmp.path().to_path_buf();
        config.health_monitor.enabled = false;

        let mut providers = ProviderRegistry::new(ProviderType::Docker);
        providers.register(ProviderType::Docker, Arc::new(MockProvider::new(ProviderType::Docker)));
        providers.register(ProviderType::Flyio, Arc::new(MockProvider::new(ProviderType::Flyio)));

        let controller = Arc::new(SwarmController::new());
        controller.initialize_with_providers(config, Arc::new(providers)).await.unwrap();
        (controller, tmp)
    }

    #[tokio::test]
    async fn methods_reject_before_initialize() {
        let controller = Arc::new(SwarmController::new());
        let err = controller.get_swarm_status().await.unwrap_err();
        assert!(matches!(err, ControllerError::NotInitialized));
    }

    #[tokio::test]
    async fn create_then_get_instance_round_trips() {
        let (controller, _tmp) = harness().await;
        let created = controller.create_instance(dummy_config("dev"), None).await.unwrap();
        let got = controller.get_instance(&created.id).await.unwrap();
        assert_eq!(got.map(|i| i.id), Some(created.id));
    }

    #[tokio::test]
    async fn list_instances_filters_by_status() {
        let (controller, _tmp) = harness().await;
        let a = controller.create_instance(dummy_config("a"), None).await.unwrap();
        let _b = controller.create_instance(dummy_config("b"), None).await.unwrap();
        controller.stop_instance(&a.id, false).await.unwrap();

        let running = controller
            .list_instances(InstanceFilter { status: Some(vec![InstanceStatus::Running]), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "b");
    }

    #[tokio::test]
    async fn get_swarm_status_counts_instances_per_provider() {
        let (controller, _tmp) = harness().await;
        controller.create_instance(dummy_config("a"), Some(ProviderType::Docker)).await.unwrap();
        controller.create_instance(dummy_config("b"), Some(ProviderType::Flyio)).await.unwrap();

        let status = controller.get_swarm_status().await.unwrap();
        assert!(status.initialized);
        assert_eq!(status.total_instances, 2);
        assert_eq!(status.providers.len(), 2);
        assert!(status.providers.iter().all(|p| p.enabled));
    }

    #[tokio::test]
    async fn dispose_marks_controller_uninitialized() {
        let (controller, _tmp) = harness().await;
        controller.dispose().await.unwrap();
        let err = controller.get_swarm_status().await.unwrap_err();
        assert!(matches!(err, ControllerError::NotInitialized));
    }
}
