use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use swarm_domain::types::{MigrationPlan, MigrationStatus, PlanId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::file_backend::RecordDir;

/// Durable migration plan records, owned by the Migration Manager.
/// A plan persists through its whole lifecycle so an in-progress
/// migration can resume after a process restart.
#[async_trait]
pub trait MigrationStore: Send + Sync + 'static {
    /// Load on-disk records, if any. A no-op for in-memory backings.
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, id: &PlanId) -> Result<Option<MigrationPlan>, StoreError>;
    async fn list(&self) -> Result<Vec<MigrationPlan>, StoreError>;
    async fn upsert(&self, plan: &MigrationPlan) -> Result<(), StoreError>;
    async fn remove(&self, id: &PlanId) -> Result<(), StoreError>;

    /// Plans left in a non-terminal status, for `resumeMigrations` at startup.
    async fn list_unfinished(&self) -> Result<Vec<MigrationPlan>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMigrationStore {
    inner: Arc<RwLock<HashMap<PlanId, MigrationPlan>>>,
}

impl InMemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStore for InMemoryMigrationStore {
    async fn get(&self, id: &PlanId) -> Result<Option<MigrationPlan>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<MigrationPlan>, StoreError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn upsert(&self, plan: &MigrationPlan) -> Result<(), StoreError> {
        self.inner.write().await.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn remove(&self, id: &PlanId) -> Result<(), StoreError> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}

/// Persistent implementation: one JSON file per plan under
/// `<stateDir>/migrations/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileMigrationStore {
    dir: RecordDir,
    cache: Arc<RwLock<HashMap<PlanId, MigrationPlan>>>,
}

impl FileMigrationStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            dir: RecordDir::new(state_dir.join("migrations")),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        let records: Vec<MigrationPlan> = self.dir.read_all()?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for record in records {
            cache.insert(record.id.clone(), record);
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for FileMigrationStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        FileMigrationStore::initialize(self).await
    }

    async fn get(&self, id: &PlanId) -> Result<Option<MigrationPlan>, StoreError> {
        Ok(self.cache.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<MigrationPlan>, StoreError> {
        Ok(self.cache.read().await.values().cloned().collect())
    }

    async fn upsert(&self, plan: &MigrationPlan) -> Result<(), StoreError> {
        self.dir.write(&plan.id.to_string(), plan)?;
        self.cache.write().await.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn remove(&self, id: &PlanId) -> Result<(), StoreError> {
        self.dir.remove(&id.to_string())?;
        self.cache.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use swarm_domain::types::{InstanceId, MigrationStep, MigrationStrategy, ProviderType, StepName};

    fn dummy_plan(status: MigrationStatus) -> MigrationPlan {
        let strategy = MigrationStrategy::StopAndRecreate;
        let steps = StepName::sequence_for(strategy)
            .into_iter()
            .map(MigrationStep::pending)
            .collect();
        MigrationPlan {
            id: PlanId::new(),
            source_instance_id: InstanceId::new(),
            source_provider_type: ProviderType::Docker,
            target_provider_type: ProviderType::Flyio,
            strategy,
            keep_source: false,
            start_target: true,
            timeout_seconds: 300,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::seconds(300),
            steps,
            current_step_index: 0,
            status,
            target_instance_id: None,
            error: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn list_unfinished_excludes_terminal_plans() {
        let store = InMemoryMigrationStore::new();
        store.upsert(&dummy_plan(MigrationStatus::InProgress)).await.unwrap();
        store.upsert(&dummy_plan(MigrationStatus::Completed)).await.unwrap();
        store.upsert(&dummy_plan(MigrationStatus::Pending)).await.unwrap();

        let unfinished = store.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 2);
    }

    #[tokio::test]
    async fn file_store_persists_across_initialize() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = dummy_plan(MigrationStatus::InProgress);

        {
            let store = FileMigrationStore::new(tmp.path().to_path_buf());
            store.upsert(&plan).await.unwrap();
        }

        let reopened = FileMigrationStore::new(tmp.path().to_path_buf());
        reopened.initialize().await.unwrap();
        assert!(reopened.get(&plan.id).await.unwrap().is_some());
    }
}
