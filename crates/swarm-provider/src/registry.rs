use std::collections::HashMap;
use std::sync::Arc;

use swarm_config::ProviderConfigEntry;
use swarm_domain::types::ProviderType;
use tracing::warn;

use crate::docker::DockerProvider;
use crate::error::ProviderError;
use crate::flyio::FlyioProvider;
use crate::provider::Provider;

/// Dispatches Controller calls to the correct driver for a given
/// [`ProviderType`] — the Provider Factory.
///
/// Constructed once at `Controller::initialize` time from the resolved
/// configuration's `providers[]` list; entries with `enabled=false` or an
/// unrecognized `type` are skipped with a warning, never fatal.
pub struct ProviderRegistry {
    pub default_provider_type: ProviderType,
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(default_provider_type: ProviderType) -> Self {
        Self {
            default_provider_type,
            providers: HashMap::new(),
        }
    }

    /// Build a registry from configuration entries, constructing (but not
    /// initializing) a driver for each enabled, recognized entry.
    pub fn from_config(default_provider_type: ProviderType, entries: &[ProviderConfigEntry]) -> Self {
        let mut registry = Self::new(default_provider_type);
        for entry in entries {
            if !entry.enabled {
                continue;
            }
            match &entry.provider_type {
                ProviderType::Docker => {
                    registry.register(ProviderType::Docker, Arc::new(DockerProvider::new(&entry.config)));
                }
                ProviderType::Flyio => {
                    registry.register(ProviderType::Flyio, Arc::new(FlyioProvider::new(&entry.config)));
                }
                ProviderType::Other(name) => {
                    warn!(provider = %name, "no built-in driver registered for provider type; skipping");
                }
            }
        }
        registry
    }

    pub fn register(&mut self, provider_type: ProviderType, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(provider_type, provider);
        self
    }

    pub fn for_type(&self, provider_type: &ProviderType) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(provider_type)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("provider not configured: {provider_type}")))
    }

    /// Resolve the default driver, used when a caller omits `providerType`.
    pub fn default_provider(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.for_type(&self.default_provider_type)
    }

    pub fn active_types(&self) -> Vec<ProviderType> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_enabled(&self, provider_type: &ProviderType) -> bool {
        self.providers.contains_key(provider_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProviderType, &Arc<dyn Provider>)> {
        self.providers.iter()
    }
}
