use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use swarm_config::HealthMonitorConfig;
use swarm_domain::types::{
    HealthCheckResult, HealthDetails, HealthStatus, InstanceId, InstanceStatus,
};
use swarm_provider::ProviderRegistry;
use swarm_store::HealthStore;
use swarm_store::InstanceRegistry;
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::HealthError;

/// Periodic per-instance health probe and optional auto-recovery. Wraps
/// the Instance Registry and Provider Registry it was constructed with;
/// owns its own `InstanceHealth` records.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: Arc<dyn InstanceRegistry>,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn HealthStore>,
    scheduler: StdMutex<Option<JoinHandle<()>>>,
    ticking: Arc<AtomicBool>,
    /// Rolling window of recent recovery attempt timestamps per instance.
    /// Advisory only — never persisted, reset on process restart.
    recovery_attempts: Arc<Mutex<HashMap<InstanceId, VecDeque<DateTime<Utc>>>>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        registry: Arc<dyn InstanceRegistry>,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn HealthStore>,
    ) -> Self {
        Self {
            config,
            registry,
            providers,
            store,
            scheduler: StdMutex::new(None),
            ticking: Arc::new(AtomicBool::new(false)),
            recovery_attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Loads persisted health records and, if enabled, starts the ticker.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), HealthError> {
        self.store.initialize().await?;
        if self.config.enabled && self.config.check_interval_ms > 0 {
            self.start_scheduler();
        }
        Ok(())
    }

    fn start_scheduler(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let period = Duration::from_millis(this.config.check_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if this.ticking.swap(true, Ordering::SeqCst) {
                    debug!("health monitor tick skipped: previous tick still running");
                    continue;
                }
                this.run_scan().await;
                this.ticking.store(false, Ordering::SeqCst);
            }
        });
        *self.scheduler.lock().expect("scheduler lock poisoned") = Some(handle);
    }

    /// One full pass over every `running` instance in the Registry.
    async fn run_scan(self: &Arc<Self>) {
        let instances = match self.registry.list().await {
            Ok(instances) => instances,
            Err(err) => {
                error!(%err, "health monitor failed to list instances");
                return;
            }
        };
        for instance in instances {
            if instance.status != InstanceStatus::Running {
                continue;
            }
            let result = self.check_instance_health(&instance.id).await;
            if let Ok(result) = result {
                if self.config.auto_recover && result.status == HealthStatus::Unhealthy {
                    let this = Arc::clone(self);
                    let id = result.instance_id.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.recover_instance(&id).await {
                            warn!(%id, %err, "auto-recovery failed");
                        }
                    });
                }
            }
        }
    }

    /// Probes one instance, persists the updated record, and returns the
    /// result. Exposed publicly so callers can probe on demand as well as
    /// via the scheduler.
    pub async fn check_instance_health(
        self: &Arc<Self>,
        id: &InstanceId,
    ) -> Result<HealthCheckResult, HealthError> {
        let checked_at = Utc::now();
        let instance = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| HealthError::InstanceNotFound(id.to_string()))?;

        let (status, details) = if instance.status != InstanceStatus::Running {
            (
                HealthStatus::Unknown,
                HealthDetails {
                    message: format!("instance is {} — not probed", instance.status),
                    error: None,
                    response_time_ms: None,
                },
            )
        } else {
            self.probe(id, &instance.provider_type).await
        };

        let mut health = self
            .store
            .get(id)
            .await?
            .unwrap_or_else(|| swarm_domain::types::InstanceHealth::new(id.clone()));
        health.record(status, checked_at, details.clone(), self.config.history_size);
        self.store.upsert(&health).await?;

        Ok(HealthCheckResult { instance_id: id.clone(), status, checked_at, details })
    }

    /// Steps 1-4 of the probe algorithm, bounded by a per-probe timeout
    /// derived from `checkIntervalMs`.
    async fn probe(
        self: &Arc<Self>,
        id: &InstanceId,
        provider_type: &swarm_domain::types::ProviderType,
    ) -> (HealthStatus, HealthDetails) {
        let timeout = probe_timeout(self.config.check_interval_ms);
        match tokio::time::timeout(timeout, self.probe_inner(id, provider_type)).await {
            Ok(result) => result,
            Err(_) => (
                HealthStatus::Unknown,
                HealthDetails { message: "Timed out".to_string(), error: None, response_time_ms: None },
            ),
        }
    }

    async fn probe_inner(
        &self,
        id: &InstanceId,
        provider_type: &swarm_domain::types::ProviderType,
    ) -> (HealthStatus, HealthDetails) {
        let provider = match self.providers.for_type(provider_type) {
            Ok(provider) => provider,
            Err(_) => {
                return (
                    HealthStatus::Unknown,
                    HealthDetails { message: "Provider not found".to_string(), error: None, response_time_ms: None },
                );
            }
        };

        let observed = match provider.get_instance(id).await {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                return (
                    HealthStatus::Unhealthy,
                    HealthDetails {
                        message: "Instance not found in provider".to_string(),
                        error: None,
                        response_time_ms: None,
                    },
                );
            }
            Err(err) => {
                return (
                    HealthStatus::Unhealthy,
                    HealthDetails { message: "Provider error".to_string(), error: Some(err.to_string()), response_time_ms: None },
                );
            }
        };

        if observed.status != InstanceStatus::Running {
            return (
                HealthStatus::Unhealthy,
                HealthDetails {
                    message: format!("observed status is {}", observed.status),
                    error: None,
                    response_time_ms: None,
                },
            );
        }

        let start = Utc::now();
        match provider.execute_command(id, "echo health check").await {
            Ok(result) if result.exit_code == 0 => {
                let response_time_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;
                (
                    HealthStatus::Healthy,
                    HealthDetails { message: "ok".to_string(), error: None, response_time_ms: Some(response_time_ms) },
                )
            }
            Ok(result) => (
                HealthStatus::Unhealthy,
                HealthDetails {
                    message: "health check command failed".to_string(),
                    error: Some(result.stderr),
                    response_time_ms: None,
                },
            ),
            Err(err) => (
                HealthStatus::Unhealthy,
                HealthDetails { message: "health check command errored".to_string(), error: Some(err.to_string()), response_time_ms: None },
            ),
        }
    }

    pub async fn list_instance_health(
        &self,
        status: Option<HealthStatus>,
    ) -> Result<Vec<swarm_domain::types::InstanceHealth>, HealthError> {
        let all = self.store.list().await?;
        Ok(match status {
            Some(status) => all.into_iter().filter(|h| h.status == status).collect(),
            None => all,
        })
    }

    pub async fn get_instance_health(
        &self,
        id: &InstanceId,
    ) -> Result<Option<swarm_domain::types::InstanceHealth>, HealthError> {
        Ok(self.store.get(id).await?)
    }

    /// Restart-based recovery: `stopInstance` then `startInstance` on the
    /// owning provider. Only the `restart` recovery action is implemented;
    /// `recreate`/`migrate` are configuration-validated but not wired to a
    /// recovery path here.
    pub async fn recover_instance(self: &Arc<Self>, id: &InstanceId) -> Result<bool, HealthError> {
        if !self.within_recovery_budget(id).await {
            warn!(%id, "recovery attempt budget exceeded for this window; skipping");
            return Ok(false);
        }

        let instance = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| HealthError::InstanceNotFound(id.to_string()))?;
        let provider = self.providers.for_type(&instance.provider_type)?;

        let outcome = async {
            provider.stop_instance(id, false).await?;
            provider.start_instance(id).await?;
            Ok::<(), swarm_provider::ProviderError>(())
        }
        .await;

        let mut health = self
            .store
            .get(id)
            .await?
            .unwrap_or_else(|| swarm_domain::types::InstanceHealth::new(id.clone()));

        match outcome {
            Ok(()) => {
                health.record(
                    HealthStatus::Recovering,
                    Utc::now(),
                    HealthDetails { message: "Instance restarted for recovery".to_string(), error: None, response_time_ms: None },
                    self.config.history_size,
                );
                self.store.upsert(&health).await?;
                info!(%id, "recovery succeeded");
                Ok(true)
            }
            Err(err) => {
                health.record(
                    HealthStatus::Unhealthy,
                    Utc::now(),
                    HealthDetails { message: "recovery failed".to_string(), error: Some(err.to_string()), response_time_ms: None },
                    self.config.history_size,
                );
                self.store.upsert(&health).await?;
                Ok(false)
            }
        }
    }

    /// Advisory rolling-window cap: at most `maxRecoveryAttempts` recorded
    /// within `checkIntervalMs * historySize` of one another, approximating
    /// a sliding window without persisting attempt history across restarts.
    async fn within_recovery_budget(&self, id: &InstanceId) -> bool {
        if self.config.max_recovery_attempts == 0 {
            return true;
        }
        let window = ChronoDuration::milliseconds(
            self.config.check_interval_ms.max(1) as i64 * self.config.history_size.max(1) as i64,
        );
        let now = Utc::now();
        let mut attempts = self.recovery_attempts.lock().await;
        let entry = attempts.entry(id.clone()).or_default();
        while let Some(front) = entry.front() {
            if now - *front > window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.config.max_recovery_attempts as usize {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Stops the scheduler. Health records are already flushed on every
    /// write, so there is no final batch to persist.
    pub async fn dispose(&self) -> Result<(), HealthError> {
        let handle = self.scheduler.lock().expect("scheduler lock poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
        }
        Ok(())
    }
}

/// Per-probe timeout: a fraction of the tick period, never zero.
fn probe_timeout(check_interval_ms: u64) -> Duration {
    Duration::from_millis((check_interval_ms / 2).max(1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use swarm_domain::types::{
        AuthConfig, AuthType, InstanceConfig, NetworkSpec, ProviderType, ResourceSpec,
    };
    use swarm_provider::MockProvider;
    use swarm_store::{InMemoryHealthStore, InMemoryInstanceRegistry};

    fn dummy_config() -> InstanceConfig {
        InstanceConfig {
            name: "dev".to_string(),
            image: "codercom/code-server:latest".to_string(),
            workspace_path: "/ws".to_string(),
            resources: ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
            network: NetworkSpec::default(),
            env: StdHashMap::new(),
            extensions: vec![],
            auth: AuthConfig { auth_type: AuthType::None, credentials: StdHashMap::new() },
        }
    }

    fn test_config() -> HealthMonitorConfig {
        HealthMonitorConfig {
            enabled: false,
            check_interval_ms: 60_000,
            auto_recover: true,
            max_recovery_attempts: 3,
            history_size: 5,
            recovery_actions: swarm_config::RecoveryActions { restart: true, recreate: false, migrate: false },
        }
    }

    async fn harness() -> (Arc<HealthMonitor>, Arc<MockProvider>, InstanceId) {
        let provider = Arc::new(MockProvider::new(ProviderType::Docker));
        let mut providers = ProviderRegistry::new(ProviderType::Docker);
        providers.register(ProviderType::Docker, provider.clone());
        let registry: Arc<dyn InstanceRegistry> = Arc::new(InMemoryInstanceRegistry::new());
        let store: Arc<dyn HealthStore> = Arc::new(InMemoryHealthStore::new());

        let created = provider.create_instance(dummy_config()).await.unwrap();
        registry.upsert(&created).await.unwrap();

        let monitor = Arc::new(HealthMonitor::new(test_config(), registry, Arc::new(providers), store));
        (monitor, provider, created.id)
    }

    #[tokio::test]
    async fn healthy_probe_records_healthy_status() {
        let (monitor, _provider, id) = harness().await;
        let result = monitor.check_instance_health(&id).await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);

        let stored = monitor.get_instance_health(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, HealthStatus::Healthy);
        assert_eq!(stored.health_history.len(), 1);
    }

    #[tokio::test]
    async fn failing_command_yields_unhealthy() {
        let (monitor, provider, id) = harness().await;
        *provider.command_exit_code.write().await = 1;
        *provider.command_stderr.write().await = "boom".to_string();

        let result = monitor.check_instance_health(&id).await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.details.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn non_running_instance_is_unknown_and_not_probed() {
        let (monitor, provider, id) = harness().await;
        provider.set_status(&id, InstanceStatus::Stopped).await;
        let mut stopped = provider.get_instance(&id).await.unwrap().unwrap();
        stopped.status = InstanceStatus::Stopped;
        monitor.registry.upsert(&stopped).await.unwrap();

        let result = monitor.check_instance_health(&id).await.unwrap();
        assert_eq!(result.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn missing_instance_in_provider_is_unhealthy() {
        let (monitor, provider, id) = harness().await;
        provider.delete_instance(&id).await.unwrap();

        let result = monitor.check_instance_health(&id).await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn recover_instance_restarts_and_records_recovering() {
        let (monitor, _provider, id) = harness().await;
        let recovered = monitor.recover_instance(&id).await.unwrap();
        assert!(recovered);

        let health = monitor.get_instance_health(&id).await.unwrap().unwrap();
        assert_eq!(health.status, HealthStatus::Recovering);
    }

    #[tokio::test]
    async fn recovery_budget_is_enforced_within_window() {
        let (monitor, _provider, id) = harness().await;
        for _ in 0..3 {
            monitor.recover_instance(&id).await.unwrap();
        }
        let fourth = monitor.recover_instance(&id).await.unwrap();
        assert!(!fourth);
    }
}
