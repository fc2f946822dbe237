use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use regex::Regex;
use swarm_domain::types::{InstanceId, ProviderType, VSCodeInstance};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::file_backend::RecordDir;

/// Durable index of every instance the swarm knows about, keyed by
/// [`InstanceId`]. `(provider_type, provider_instance_id)` addresses the
/// same instance with its driver.
#[async_trait]
pub trait InstanceRegistry: Send + Sync + 'static {
    /// Load on-disk records, if any, and start the periodic autosave timer
    /// if configured. A no-op for in-memory backings.
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Stops the autosave timer, if running, and performs a final resave.
    /// A no-op for in-memory backings.
    async fn dispose(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, StoreError>;
    async fn list(&self) -> Result<Vec<VSCodeInstance>, StoreError>;
    async fn upsert(&self, instance: &VSCodeInstance) -> Result<(), StoreError>;
    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError>;

    /// All instances whose `name` matches `pattern` as a regular expression.
    async fn find_by_name(&self, pattern: &str) -> Result<Vec<VSCodeInstance>, StoreError>;

    /// All instances managed by a given provider.
    async fn find_by_provider_type(
        &self,
        provider_type: &ProviderType,
    ) -> Result<Vec<VSCodeInstance>, StoreError>;

    /// All instances whose metadata satisfies every `(key, value)` pair, for
    /// provider metadata stored as an opaque JSON object. Typed metadata
    /// variants (`ProviderMetadata::Docker`/`Fly`) never match, since they
    /// carry no open key space to search.
    async fn find_by_metadata(
        &self,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<VSCodeInstance>, StoreError>;
}

fn matches_metadata(instance: &VSCodeInstance, filters: &HashMap<String, serde_json::Value>) -> bool {
    if filters.is_empty() {
        return true;
    }
    let swarm_domain::types::ProviderMetadata::Opaque(map) = &instance.metadata else {
        return false;
    };
    filters.iter().all(|(k, v)| map.get(k) == Some(v))
}

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    instances: HashMap<InstanceId, VSCodeInstance>,
}

/// In-memory implementation, used by tests and as the backing of a `--no-persist`
/// controller mode. All data is lost on process exit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInstanceRegistry {
    inner: Arc<RwLock<MemoryInner>>,
}

impl InMemoryInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRegistry for InMemoryInstanceRegistry {
    async fn get(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, StoreError> {
        Ok(self.inner.read().await.instances.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self.inner.read().await.instances.values().cloned().collect())
    }

    async fn upsert(&self, instance: &VSCodeInstance) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        self.inner.write().await.instances.remove(id);
        Ok(())
    }

    async fn find_by_name(&self, pattern: &str) -> Result<Vec<VSCodeInstance>, StoreError> {
        let re = Regex::new(pattern)?;
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| re.is_match(&i.name))
            .cloned()
            .collect())
    }

    async fn find_by_provider_type(
        &self,
        provider_type: &ProviderType,
    ) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| &i.provider_type == provider_type)
            .cloned()
            .collect())
    }

    async fn find_by_metadata(
        &self,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| matches_metadata(i, filters))
            .cloned()
            .collect())
    }
}

// ── File-backed implementation ────────────────────────────────────────────────

/// Persistent implementation: one JSON file per instance under
/// `<stateDir>/instances/<id>.json`, with an in-memory cache kept
/// consistent under a single write lock. Reads consult the cache only,
/// which `initialize()` populates from disk.
#[derive(Debug, Clone)]
pub struct FileInstanceRegistry {
    dir: RecordDir,
    cache: Arc<RwLock<HashMap<InstanceId, VSCodeInstance>>>,
    load_state_on_startup: bool,
    auto_save_interval_ms: u64,
    scheduler: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl FileInstanceRegistry {
    pub fn new(state_dir: PathBuf, load_state_on_startup: bool, auto_save_interval_ms: u64) -> Self {
        Self {
            dir: RecordDir::new(state_dir.join("instances")),
            cache: Arc::new(RwLock::new(HashMap::new())),
            load_state_on_startup,
            auto_save_interval_ms,
            scheduler: Arc::new(StdMutex::new(None)),
        }
    }

    /// If `loadStateOnStartup`, loads every on-disk record into the cache.
    /// If `autoSaveIntervalMs > 0`, starts the periodic full resave.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        if self.load_state_on_startup {
            let records: Vec<VSCodeInstance> = self.dir.read_all()?;
            let mut cache = self.cache.write().await;
            cache.clear();
            for record in records {
                cache.insert(record.id.clone(), record);
            }
        }
        if self.auto_save_interval_ms > 0 {
            self.start_auto_save();
        }
        Ok(())
    }

    /// Writes every cached record back to disk. Used by both the periodic
    /// autosave timer and `dispose()`'s final flush.
    async fn resave_all(&self) -> Result<(), StoreError> {
        let snapshot: Vec<VSCodeInstance> = self.cache.read().await.values().cloned().collect();
        for instance in &snapshot {
            self.dir.write(&instance.id.as_str(), instance)?;
        }
        Ok(())
    }

    /// Spawns the periodic full resave, mirroring the Health Monitor's
    /// ticker: a `tokio::time::interval` loop on its own task, with the
    /// handle stored so `dispose()` can abort it.
    fn start_auto_save(&self) {
        let cache = Arc::clone(&self.cache);
        let dir = self.dir.clone();
        let period = tokio::time::Duration::from_millis(self.auto_save_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot: Vec<VSCodeInstance> = cache.read().await.values().cloned().collect();
                for instance in &snapshot {
                    if let Err(err) = dir.write(&instance.id.as_str(), instance) {
                        tracing::warn!(%err, "periodic instance resave failed");
                    }
                }
            }
        });
        *self.scheduler.lock().expect("scheduler lock poisoned") = Some(handle);
    }

    /// Cancels the autosave timer, if running, and performs a final resave.
    pub async fn dispose(&self) -> Result<(), StoreError> {
        if let Some(handle) = self.scheduler.lock().expect("scheduler lock poisoned").take() {
            handle.abort();
        }
        self.resave_all().await
    }
}

#[async_trait]
impl InstanceRegistry for FileInstanceRegistry {
    async fn initialize(&self) -> Result<(), StoreError> {
        FileInstanceRegistry::initialize(self).await
    }

    async fn dispose(&self) -> Result<(), StoreError> {
        FileInstanceRegistry::dispose(self).await
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, StoreError> {
        Ok(self.cache.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self.cache.read().await.values().cloned().collect())
    }

    async fn upsert(&self, instance: &VSCodeInstance) -> Result<(), StoreError> {
        self.dir.write(&instance.id.as_str(), instance)?;
        self.cache
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StoreError> {
        self.dir.remove(&id.as_str())?;
        self.cache.write().await.remove(id);
        Ok(())
    }

    async fn find_by_name(&self, pattern: &str) -> Result<Vec<VSCodeInstance>, StoreError> {
        let re = Regex::new(pattern)?;
        Ok(self
            .cache
            .read()
            .await
            .values()
            .filter(|i| re.is_match(&i.name))
            .cloned()
            .collect())
    }

    async fn find_by_provider_type(
        &self,
        provider_type: &ProviderType,
    ) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self
            .cache
            .read()
            .await
            .values()
            .filter(|i| &i.provider_type == provider_type)
            .cloned()
            .collect())
    }

    async fn find_by_metadata(
        &self,
        filters: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<VSCodeInstance>, StoreError> {
        Ok(self
            .cache
            .read()
            .await
            .values()
            .filter(|i| matches_metadata(i, filters))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use swarm_domain::types::{
        AuthConfig, AuthType, InstanceConfig, InstanceStatus, NetworkSpec, ObservedNetwork,
        ObservedResources, ProviderMetadata, ResourceSpec,
    };

    fn dummy(name: &str, provider_type: ProviderType) -> VSCodeInstance {
        VSCodeInstance {
            id: InstanceId::new(),
            name: name.to_string(),
            provider_type,
            provider_instance_id: format!("prov-{name}"),
            status: InstanceStatus::Running,
            config: InstanceConfig {
                name: name.to_string(),
                image: "codercom/code-server:latest".to_string(),
                workspace_path: "/ws".to_string(),
                resources: ResourceSpec { cpu: 1.0, memory: "512m".to_string(), storage: 1 },
                network: NetworkSpec::default(),
                env: HashMap::new(),
                extensions: vec![],
                auth: AuthConfig { auth_type: AuthType::None, credentials: HashMap::new() },
            },
            network: ObservedNetwork::default(),
            resources: ObservedResources::default(),
            metadata: ProviderMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_upsert_and_get() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = dummy("dev-a", ProviderType::Docker);
        registry.upsert(&instance).await.unwrap();

        let got = registry.get(&instance.id).await.unwrap();
        assert_eq!(got.map(|i| i.name), Some("dev-a".to_string()));
    }

    #[tokio::test]
    async fn memory_find_by_name_regex() {
        let registry = InMemoryInstanceRegistry::new();
        registry.upsert(&dummy("dev-alpha", ProviderType::Docker)).await.unwrap();
        registry.upsert(&dummy("dev-beta", ProviderType::Docker)).await.unwrap();
        registry.upsert(&dummy("prod-alpha", ProviderType::Flyio)).await.unwrap();

        let matches = registry.find_by_name("^dev-").await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn memory_find_by_provider_type() {
        let registry = InMemoryInstanceRegistry::new();
        registry.upsert(&dummy("a", ProviderType::Docker)).await.unwrap();
        registry.upsert(&dummy("b", ProviderType::Flyio)).await.unwrap();

        let docker_only = registry.find_by_provider_type(&ProviderType::Docker).await.unwrap();
        assert_eq!(docker_only.len(), 1);
        assert_eq!(docker_only[0].name, "a");
    }

    #[tokio::test]
    async fn memory_remove_deletes_instance() {
        let registry = InMemoryInstanceRegistry::new();
        let instance = dummy("gone", ProviderType::Docker);
        registry.upsert(&instance).await.unwrap();
        registry.remove(&instance.id).await.unwrap();
        assert!(registry.get(&instance.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_registry_persists_across_initialize() {
        let tmp = tempfile::tempdir().unwrap();
        let instance = dummy("persisted", ProviderType::Docker);

        {
            let registry = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
            registry.upsert(&instance).await.unwrap();
        }

        let reopened = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
        reopened.initialize().await.unwrap();
        let got = reopened.get(&instance.id).await.unwrap();
        assert_eq!(got.map(|i| i.name), Some("persisted".to_string()));
    }

    #[tokio::test]
    async fn file_registry_remove_deletes_record_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let instance = dummy("to-delete", ProviderType::Docker);
        let registry = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
        registry.upsert(&instance).await.unwrap();
        registry.remove(&instance.id).await.unwrap();

        let reopened = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
        reopened.initialize().await.unwrap();
        assert!(reopened.get(&instance.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_state_on_startup_false_leaves_cache_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let instance = dummy("untouched", ProviderType::Docker);
        {
            let registry = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
            registry.upsert(&instance).await.unwrap();
        }

        let reopened = FileInstanceRegistry::new(tmp.path().to_path_buf(), false, 0);
        reopened.initialize().await.unwrap();
        assert!(reopened.get(&instance.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispose_flushes_cache_even_without_auto_save() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
        registry.upsert(&dummy("flush-me", ProviderType::Docker)).await.unwrap();
        InstanceRegistry::dispose(&registry).await.unwrap();

        let reopened = FileInstanceRegistry::new(tmp.path().to_path_buf(), true, 0);
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_metadata_matches_opaque_keys() {
        let registry = InMemoryInstanceRegistry::new();
        let mut instance = dummy("tagged", ProviderType::Docker);
        let mut map = serde_json::Map::new();
        map.insert("team".to_string(), serde_json::json!("infra"));
        instance.metadata = ProviderMetadata::Opaque(map);
        registry.upsert(&instance).await.unwrap();

        let mut filters = HashMap::new();
        filters.insert("team".to_string(), serde_json::json!("infra"));
        let matches = registry.find_by_metadata(&filters).await.unwrap();
        assert_eq!(matches.len(), 1);

        filters.insert("team".to_string(), serde_json::json!("other"));
        let no_matches = registry.find_by_metadata(&filters).await.unwrap();
        assert!(no_matches.is_empty());
    }
}
