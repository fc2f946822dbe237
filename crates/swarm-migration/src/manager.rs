use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{Duration as ChronoDuration, Utc};
use swarm_config::MigrationConfig;
use swarm_domain::types::{
    InstanceId, InstanceStatus, MigrationPlan, MigrationStatus, MigrationStep, MigrationStrategy,
    PlanId, ProviderType, StepName, StepStatus,
};
use swarm_provider::{ProviderError, ProviderRegistry};
use swarm_store::{InstanceRegistry, MigrationStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::MigrationError;

/// Caller-supplied overrides for `createMigrationPlan`; unset fields fall
/// back to the resolved `MigrationConfig`.
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    pub strategy: Option<MigrationStrategy>,
    pub keep_source: Option<bool>,
    pub start_target: Option<bool>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub plan: MigrationPlan,
    pub success: bool,
    pub target_instance: Option<swarm_domain::types::VSCodeInstance>,
    pub error: Option<String>,
}

/// Durable stepwise migration of an instance to another provider.
/// Owns `MigrationPlan` records and one timeout timer per active plan.
pub struct MigrationManager {
    config: MigrationConfig,
    store: Arc<dyn MigrationStore>,
    registry: Arc<dyn InstanceRegistry>,
    providers: Arc<ProviderRegistry>,
    timers: StdMutex<HashMap<PlanId, JoinHandle<()>>>,
}

impl MigrationManager {
    pub fn new(
        config: MigrationConfig,
        store: Arc<dyn MigrationStore>,
        registry: Arc<dyn InstanceRegistry>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self { config, store, registry, providers, timers: StdMutex::new(HashMap::new()) }
    }

    /// Loads persisted plans then re-enters `executeMigration` for any
    /// `in_progress` plan that has not yet expired.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), MigrationError> {
        self.store.initialize().await?;
        self.resume_migrations().await
    }

    async fn resume_migrations(self: &Arc<Self>) -> Result<(), MigrationError> {
        let now = Utc::now();
        for plan in self.store.list_unfinished().await? {
            if plan.status != MigrationStatus::InProgress {
                continue;
            }
            if plan.expires_at < now {
                let mut plan = plan;
                plan.status = MigrationStatus::TimedOut;
                plan.error = Some("Migration timed out".to_string());
                self.store.upsert(&plan).await?;
                continue;
            }
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let id = plan.id.clone();
                let result = this.execute_migration(plan).await;
                if !result.success {
                    warn!(plan_id = %id, error = ?result.error, "resumed migration did not complete");
                }
            });
        }
        Ok(())
    }

    pub async fn create_migration_plan(
        &self,
        source_id: InstanceId,
        target_provider_type: ProviderType,
        options: MigrationOptions,
    ) -> Result<MigrationPlan, MigrationError> {
        let source = self
            .registry
            .get(&source_id)
            .await?
            .ok_or_else(|| MigrationError::InstanceNotFound(source_id.to_string()))?;

        let strategy = options.strategy.unwrap_or(self.config.default_strategy);
        let keep_source = options.keep_source.unwrap_or(false);
        let start_target = options.start_target.unwrap_or(true);
        let timeout_seconds = options
            .timeout_seconds
            .unwrap_or_else(|| (self.config.timeout_ms / 1000).max(1));

        let steps: Vec<MigrationStep> =
            StepName::sequence_for(strategy).into_iter().map(MigrationStep::pending).collect();
        let now = Utc::now();

        let plan = MigrationPlan {
            id: PlanId::new(),
            source_instance_id: source_id,
            source_provider_type: source.provider_type,
            target_provider_type,
            strategy,
            keep_source,
            start_target,
            timeout_seconds,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(timeout_seconds as i64),
            steps,
            current_step_index: 0,
            status: MigrationStatus::Pending,
            target_instance_id: None,
            error: None,
            completed_at: None,
        };
        self.store.upsert(&plan).await?;
        Ok(plan)
    }

    pub async fn start_migration(self: &Arc<Self>, plan_id: &PlanId) -> Result<MigrationResult, MigrationError> {
        let mut plan = self
            .store
            .get(plan_id)
            .await?
            .ok_or_else(|| MigrationError::PlanNotFound(plan_id.to_string()))?;
        if plan.status.is_terminal() {
            return Err(MigrationError::AlreadyTerminal(plan_id.to_string()));
        }
        plan.status = MigrationStatus::InProgress;
        self.store.upsert(&plan).await?;
        Ok(self.execute_migration(plan).await)
    }

    /// If another task (a fired timeout, or a concurrent `cancel_migration`)
    /// has since moved the persisted plan to a terminal status, returns that
    /// plan so the caller can stop instead of writing a stale transition
    /// over it.
    async fn terminal_conflict(&self, plan_id: &PlanId) -> Option<MigrationPlan> {
        match self.store.get(plan_id).await {
            Ok(Some(latest)) if latest.status.is_terminal() => Some(latest),
            _ => None,
        }
    }

    /// Executes `plan.steps[plan.current_step_index..]` in order, persisting
    /// before and after every transition so a crash mid-step can resume.
    async fn execute_migration(self: &Arc<Self>, mut plan: MigrationPlan) -> MigrationResult {
        self.arm_timeout(plan.id.clone(), plan.expires_at);

        let len = plan.steps.len();
        let mut i = plan.current_step_index;
        while i < len {
            // cooperative cancellation / timeout check: another task may have
            // moved the plan to a terminal status since we last looked
            if let Some(latest) = self.terminal_conflict(&plan.id).await {
                self.clear_timer(&plan.id);
                return MigrationResult {
                    success: false,
                    error: latest.error.clone(),
                    plan: latest,
                    target_instance: None,
                };
            }

            plan.current_step_index = i;
            if let Err(err) = self.store.upsert(&plan).await {
                warn!(plan_id = %plan.id, %err, "failed to persist migration plan index");
            }

            if plan.steps[i].status == StepStatus::Completed {
                i += 1;
                continue;
            }

            plan.steps[i].status = StepStatus::InProgress;
            plan.steps[i].started_at = Some(Utc::now());
            if let Err(err) = self.store.upsert(&plan).await {
                warn!(plan_id = %plan.id, %err, "failed to persist migration step start");
            }

            let step_name = plan.steps[i].name;
            match self.run_step(step_name, &mut plan).await {
                Ok(()) => {
                    // the step's own I/O may have taken long enough for a
                    // concurrent cancel/timeout to land; re-check before
                    // writing completion over it
                    if let Some(latest) = self.terminal_conflict(&plan.id).await {
                        self.clear_timer(&plan.id);
                        return MigrationResult {
                            success: false,
                            error: latest.error.clone(),
                            plan: latest,
                            target_instance: None,
                        };
                    }
                    plan.steps[i].status = StepStatus::Completed;
                    plan.steps[i].completed_at = Some(Utc::now());
                    if let Err(err) = self.store.upsert(&plan).await {
                        warn!(plan_id = %plan.id, %err, "failed to persist migration step completion");
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    plan.steps[i].status = StepStatus::Failed;
                    plan.steps[i].error = Some(message.clone());
                    plan.status = MigrationStatus::Failed;
                    plan.error = Some(format!("Failed to execute step {}: {}", step_name, message));
                    let _ = self.store.upsert(&plan).await;
                    self.clear_timer(&plan.id);
                    return MigrationResult {
                        success: false,
                        error: plan.error.clone(),
                        plan,
                        target_instance: None,
                    };
                }
            }
            i += 1;
        }

        if let Some(latest) = self.terminal_conflict(&plan.id).await {
            self.clear_timer(&plan.id);
            return MigrationResult {
                success: false,
                error: latest.error.clone(),
                plan: latest,
                target_instance: None,
            };
        }

        plan.status = MigrationStatus::Completed;
        plan.completed_at = Some(Utc::now());
        let _ = self.store.upsert(&plan).await;
        self.clear_timer(&plan.id);

        let target_instance = match &plan.target_instance_id {
            Some(id) => self.registry.get(id).await.ok().flatten(),
            None => None,
        };

        MigrationResult { success: true, error: None, plan, target_instance }
    }

    async fn run_step(&self, step: StepName, plan: &mut MigrationPlan) -> Result<(), MigrationError> {
        match step {
            StepName::Prepare => Ok(()),

            StepName::ValidateSource => {
                let provider = self.providers.for_type(&plan.source_provider_type)?;
                provider
                    .get_instance(&plan.source_instance_id)
                    .await?
                    .ok_or_else(|| MigrationError::InstanceNotFound(plan.source_instance_id.to_string()))?;
                Ok(())
            }

            StepName::ValidateTargetProvider => {
                let provider = self.providers.for_type(&plan.target_provider_type)?;
                if provider.capabilities().max_instances_per_user == 0 {
                    return Err(MigrationError::Provider(ProviderError::ResourceLimit(
                        "target provider has no available instance capacity".to_string(),
                    )));
                }
                Ok(())
            }

            StepName::StopSource => {
                let provider = self.providers.for_type(&plan.source_provider_type)?;
                if let Some(source) = provider.get_instance(&plan.source_instance_id).await? {
                    if source.status == InstanceStatus::Running {
                        provider.stop_instance(&plan.source_instance_id, false).await?;
                    }
                }
                Ok(())
            }

            // The config snapshot itself lives on the source instance record
            // already fetched in `create_target`; this step is a named
            // checkpoint rather than independent work.
            StepName::ExportSourceConfig => Ok(()),

            StepName::CreateTarget => {
                if plan.target_instance_id.is_some() {
                    // not idempotent — a retried step must not double-create
                    return Ok(());
                }
                let source_provider = self.providers.for_type(&plan.source_provider_type)?;
                let source = source_provider
                    .get_instance(&plan.source_instance_id)
                    .await?
                    .ok_or_else(|| MigrationError::InstanceNotFound(plan.source_instance_id.to_string()))?;

                let mut target_config = source.config.clone();
                target_config.name = format!("{}-migrated", source.config.name);

                let target_provider = self.providers.for_type(&plan.target_provider_type)?;
                let target = target_provider.create_instance(target_config).await?;
                plan.target_instance_id = Some(target.id.clone());
                self.registry.upsert(&target).await?;
                Ok(())
            }

            StepName::StartTarget => {
                if !plan.start_target {
                    return Ok(());
                }
                let target_id = plan
                    .target_instance_id
                    .clone()
                    .ok_or_else(|| MigrationError::InstanceNotFound("target instance".to_string()))?;
                let provider = self.providers.for_type(&plan.target_provider_type)?;
                let already_running = provider
                    .get_instance(&target_id)
                    .await?
                    .map(|i| i.status == InstanceStatus::Running)
                    .unwrap_or(false);
                if !already_running {
                    let started = provider.start_instance(&target_id).await?;
                    self.registry.upsert(&started).await?;
                }
                Ok(())
            }

            StepName::VerifyTarget => {
                let target_id = plan
                    .target_instance_id
                    .clone()
                    .ok_or_else(|| MigrationError::InstanceNotFound("target instance".to_string()))?;
                let provider = self.providers.for_type(&plan.target_provider_type)?;
                let observed = provider
                    .get_instance(&target_id)
                    .await?
                    .ok_or_else(|| MigrationError::InstanceNotFound(target_id.to_string()))?;
                if plan.start_target && observed.status != InstanceStatus::Running {
                    return Err(MigrationError::Provider(ProviderError::Operation(
                        "target instance did not reach running state".to_string(),
                    )));
                }
                Ok(())
            }

            StepName::CleanupSource => {
                if plan.keep_source {
                    return Ok(());
                }
                let provider = self.providers.for_type(&plan.source_provider_type)?;
                provider.delete_instance(&plan.source_instance_id).await?;
                self.registry.remove(&plan.source_instance_id).await?;
                Ok(())
            }

            StepName::Complete => Ok(()),
        }
    }

    pub async fn cancel_migration(&self, plan_id: &PlanId) -> Result<bool, MigrationError> {
        let Some(mut plan) = self.store.get(plan_id).await? else {
            return Err(MigrationError::PlanNotFound(plan_id.to_string()));
        };
        if plan.status.is_terminal() {
            return Ok(false);
        }
        plan.status = MigrationStatus::Cancelled;
        self.store.upsert(&plan).await?;
        self.clear_timer(plan_id);
        Ok(true)
    }

    pub async fn get_migration_plan(&self, plan_id: &PlanId) -> Result<Option<MigrationPlan>, MigrationError> {
        Ok(self.store.get(plan_id).await?)
    }

    pub async fn list_migration_plans(
        &self,
        status: Option<MigrationStatus>,
    ) -> Result<Vec<MigrationPlan>, MigrationError> {
        let all = self.store.list().await?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|p| p.status == status).collect(),
            None => all,
        })
    }

    fn arm_timeout(self: &Arc<Self>, plan_id: PlanId, expires_at: chrono::DateTime<Utc>) {
        let this = Arc::clone(self);
        let key = plan_id.clone();
        let wait = (expires_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.handle_migration_timeout(&plan_id).await;
        });
        self.timers.lock().expect("timers lock poisoned").insert(key, handle);
    }

    async fn handle_migration_timeout(&self, plan_id: &PlanId) {
        let Ok(Some(mut plan)) = self.store.get(plan_id).await else { return };
        if plan.status.is_terminal() {
            return;
        }
        plan.status = MigrationStatus::TimedOut;
        plan.error = Some("Migration timed out".to_string());
        if let Err(err) = self.store.upsert(&plan).await {
            warn!(%plan_id, %err, "failed to persist timed-out migration plan");
        } else {
            info!(%plan_id, "migration timed out");
        }
        self.clear_timer(plan_id);
    }

    fn clear_timer(&self, plan_id: &PlanId) {
        if let Some(handle) = self.timers.lock().expect("timers lock poisoned").remove(plan_id) {
            handle.abort();
        }
    }

    /// Cancels every outstanding timeout timer.
    pub async fn dispose(&self) -> Result<(), MigrationError> {
        let mut timers = self.timers.lock().expect("timers lock poisoned");
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use swarm_domain::types::{AuthConfig, AuthType, InstanceConfig, NetworkSpec, ResourceSpec};
    use swarm_provider::MockProvider;
    use swarm_store::{InMemoryInstanceRegistry, InMemoryMigrationStore};

    fn dummy_config(name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            image: "codercom/code-server:latest".to_string(),
            workspace_path: "/ws".to_string(),
            resources: ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
            network: NetworkSpec::default(),
            env: StdHashMap::new(),
            extensions: vec![],
            auth: AuthConfig { auth_type: AuthType::None, credentials: StdHashMap::new() },
        }
    }

    fn test_config() -> MigrationConfig {
        MigrationConfig { enabled: true, default_strategy: MigrationStrategy::StopAndRecreate, timeout_ms: 300_000 }
    }

    async fn harness() -> (Arc<MigrationManager>, InstanceId) {
        let docker = Arc::new(MockProvider::new(ProviderType::Docker));
        let flyio = Arc::new(MockProvider::new(ProviderType::Flyio));
        let mut providers = ProviderRegistry::new(ProviderType::Docker);
        providers.register(ProviderType::Docker, docker.clone());
        providers.register(ProviderType::Flyio, flyio.clone());

        let registry: Arc<dyn InstanceRegistry> = Arc::new(InMemoryInstanceRegistry::new());
        let store: Arc<dyn MigrationStore> = Arc::new(InMemoryMigrationStore::new());

        let created = docker.create_instance(dummy_config("dev")).await.unwrap();
        registry.upsert(&created).await.unwrap();

        let manager =
            Arc::new(MigrationManager::new(test_config(), store, registry, Arc::new(providers)));
        (manager, created.id)
    }

    #[tokio::test]
    async fn full_migration_completes_and_registers_target() {
        let (manager, source_id) = harness().await;
        let plan = manager
            .create_migration_plan(source_id.clone(), ProviderType::Flyio, MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(plan.status, MigrationStatus::Pending);

        let result = manager.start_migration(&plan.id).await.unwrap();
        assert!(result.success, "migration failed: {:?}", result.error);
        assert_eq!(result.plan.status, MigrationStatus::Completed);
        assert!(result.plan.target_instance_id.is_some());
        assert!(result.target_instance.is_some());
    }

    #[tokio::test]
    async fn cancel_migration_marks_cancelled_and_ignores_terminal() {
        let (manager, source_id) = harness().await;
        let plan = manager
            .create_migration_plan(source_id, ProviderType::Flyio, MigrationOptions::default())
            .await
            .unwrap();

        assert!(manager.cancel_migration(&plan.id).await.unwrap());
        let cancelled = manager.get_migration_plan(&plan.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, MigrationStatus::Cancelled);

        assert!(!manager.cancel_migration(&plan.id).await.unwrap());
    }

    #[tokio::test]
    async fn create_target_step_is_not_retried_once_target_assigned() {
        let (manager, source_id) = harness().await;
        let mut plan = manager
            .create_migration_plan(source_id, ProviderType::Flyio, MigrationOptions::default())
            .await
            .unwrap();

        // simulate a crash right after create_target persisted the id but
        // before the step was marked completed
        let existing_target_id = InstanceId::new();
        plan.target_instance_id = Some(existing_target_id.clone());

        manager.run_step(StepName::CreateTarget, &mut plan).await.unwrap();
        assert_eq!(plan.target_instance_id, Some(existing_target_id));
    }

    #[tokio::test]
    async fn list_migration_plans_filters_by_status() {
        let (manager, source_id) = harness().await;
        let plan = manager
            .create_migration_plan(source_id, ProviderType::Flyio, MigrationOptions::default())
            .await
            .unwrap();

        let pending = manager.list_migration_plans(Some(MigrationStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, plan.id);

        let completed = manager.list_migration_plans(Some(MigrationStatus::Completed)).await.unwrap();
        assert!(completed.is_empty());
    }
}
