use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use swarm_domain::types::{InstanceHealth, InstanceId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::file_backend::RecordDir;

/// Durable per-instance health records, owned by the Health Monitor.
/// Keyed by [`InstanceId`]; one record per monitored instance, created
/// lazily on the first probe.
#[async_trait]
pub trait HealthStore: Send + Sync + 'static {
    /// Load on-disk records, if any. A no-op for in-memory backings.
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<InstanceHealth>, StoreError>;
    async fn list(&self) -> Result<Vec<InstanceHealth>, StoreError>;
    async fn upsert(&self, health: &InstanceHealth) -> Result<(), StoreError>;
    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryHealthStore {
    inner: Arc<RwLock<HashMap<InstanceId, InstanceHealth>>>,
}

impl InMemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn get(&self, id: &InstanceId) -> Result<Option<InstanceHealth>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<InstanceHealth>, StoreError> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn upsert(&self, health: &InstanceHealth) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(health.instance_id.clone(), health.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}

/// Persistent implementation: one JSON file per instance under
/// `<stateDir>/health/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileHealthStore {
    dir: RecordDir,
    cache: Arc<RwLock<HashMap<InstanceId, InstanceHealth>>>,
}

impl FileHealthStore {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            dir: RecordDir::new(state_dir.join("health")),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        let records: Vec<InstanceHealth> = self.dir.read_all()?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for record in records {
            cache.insert(record.instance_id.clone(), record);
        }
        Ok(())
    }
}

#[async_trait]
impl HealthStore for FileHealthStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        FileHealthStore::initialize(self).await
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<InstanceHealth>, StoreError> {
        Ok(self.cache.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<InstanceHealth>, StoreError> {
        Ok(self.cache.read().await.values().cloned().collect())
    }

    async fn upsert(&self, health: &InstanceHealth) -> Result<(), StoreError> {
        self.dir.write(&health.instance_id.as_str(), health)?;
        self.cache
            .write()
            .await
            .insert(health.instance_id.clone(), health.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        self.dir.remove(&id.as_str())?;
        self.cache.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_upsert_and_get() {
        let store = InMemoryHealthStore::new();
        let health = InstanceHealth::new(InstanceId::new());
        store.upsert(&health).await.unwrap();
        let got = store.get(&health.instance_id).await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn file_store_persists_across_initialize() {
        let tmp = tempfile::tempdir().unwrap();
        let health = InstanceHealth::new(InstanceId::new());

        {
            let store = FileHealthStore::new(tmp.path().to_path_buf());
            store.upsert(&health).await.unwrap();
        }

        let reopened = FileHealthStore::new(tmp.path().to_path_buf());
        reopened.initialize().await.unwrap();
        assert!(reopened.get(&health.instance_id).await.unwrap().is_some());
    }
}
