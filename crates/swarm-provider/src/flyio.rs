use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use swarm_domain::types::{
    FlyMetadata, InstanceConfig, InstanceConfigPatch, InstanceId, InstanceStatus, ObservedNetwork,
    ObservedResources, ProviderMetadata, ProviderType, VSCodeInstance,
};
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::provider::{CommandResult, ListFilter, LogOptions, LogStream, Provider, ProviderCapabilities};

const META_INSTANCE_ID: &str = "swarm_instance_id";

/// Driver for fly.io Machines, addressed through the public Machines API.
///
/// Every machine is created with `config.metadata.swarm_instance_id` set to
/// the control-plane [`InstanceId`], so `list_instances` can rebuild the
/// `(InstanceId -> (app, machine_id))` mapping after a restart without
/// relying on any local state surviving.
pub struct FlyioProvider {
    client: reqwest::Client,
    base_url: String,
    app_name: String,
    api_token: String,
    cache: Arc<RwLock<HashMap<InstanceId, FlyMetadata>>>,
}

impl FlyioProvider {
    pub fn new(config: &HashMap<String, String>) -> Self {
        let base_url = config
            .get("host")
            .cloned()
            .unwrap_or_else(|| "https://api.machines.dev".to_string());
        let app_name = config.get("app").cloned().unwrap_or_else(|| "vscode-swarm".to_string());
        let api_token = config.get("token").cloned().unwrap_or_default();
        Self {
            client: reqwest::Client::new(),
            base_url,
            app_name,
            api_token,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn machines_url(&self, suffix: &str) -> String {
        format!("{}/v1/apps/{}/machines{}", self.base_url, self.app_name, suffix)
    }

    async fn resolve_machine(&self, id: &InstanceId) -> Result<Option<FlyMetadata>, ProviderError> {
        if let Some(meta) = self.cache.read().await.get(id).cloned() {
            return Ok(Some(meta));
        }
        let found = self.list_machines().await?;
        for (machine_id, body) in found {
            if body["config"]["metadata"][META_INSTANCE_ID].as_str() == Some(id.to_string().as_str()) {
                let meta = FlyMetadata {
                    app_name: Some(self.app_name.clone()),
                    machine_id: Some(machine_id),
                    volume_id: None,
                    ip_address_id: None,
                    region: body["region"].as_str().map(|s| s.to_string()),
                };
                self.cache.write().await.insert(id.clone(), meta.clone());
                return Ok(Some(meta));
            }
        }
        Ok(None)
    }

    async fn list_machines(&self) -> Result<Vec<(String, Value)>, ProviderError> {
        let resp: Vec<Value> = self
            .client
            .get(self.machines_url(""))
            .bearer_auth(&self.api_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .into_iter()
            .filter_map(|m| m["id"].as_str().map(|id| (id.to_string(), m)))
            .collect())
    }

    fn status_from_state(state: &str) -> InstanceStatus {
        match state {
            "created" => InstanceStatus::Created,
            "starting" => InstanceStatus::Starting,
            "started" => InstanceStatus::Running,
            "stopping" => InstanceStatus::Stopping,
            "stopped" => InstanceStatus::Stopped,
            "destroying" | "destroyed" => InstanceStatus::Deleted,
            "failed" => InstanceStatus::Failed,
            _ => InstanceStatus::Unknown,
        }
    }

    fn to_instance(id: &InstanceId, config: &InstanceConfig, meta: &FlyMetadata, body: &Value) -> VSCodeInstance {
        let state = body["state"].as_str().unwrap_or("unknown");
        let ip = body["private_ip"].as_str().map(|s| s.to_string());
        VSCodeInstance {
            id: id.clone(),
            name: config.name.clone(),
            provider_type: ProviderType::Flyio,
            provider_instance_id: meta.machine_id.clone().unwrap_or_default(),
            status: Self::status_from_state(state),
            config: config.clone(),
            network: ObservedNetwork {
                internal_ip: ip,
                external_ip: None,
                ports: config.network.ports.clone(),
                urls: Vec::new(),
            },
            resources: ObservedResources::default(),
            metadata: ProviderMetadata::Fly(meta.clone()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Provider for FlyioProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Flyio
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_live_resize: true,
            supports_snapshotting: true,
            supports_multi_region: true,
            supported_regions: Some(vec!["iad".into(), "lhr".into(), "nrt".into()]),
            max_instances_per_user: 50,
            max_resources_per_instance: None,
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        if self.api_token.is_empty() {
            return Err(ProviderError::InitError("fly.io provider requires an API token".into()));
        }
        let url = format!("{}/v1/apps/{}", self.base_url, self.app_name);
        self.client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProviderError::InitError(format!("fly.io API unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| ProviderError::InitError(e.to_string()))?;
        Ok(())
    }

    async fn create_instance(&self, config: InstanceConfig) -> Result<VSCodeInstance, ProviderError> {
        let id = InstanceId::new();

        let guest = json!({
            "cpu_kind": "shared",
            "cpus": config.resources.cpu.max(1.0) as u32,
            "memory_mb": parse_memory_mb(&config.resources.memory),
        });
        let services: Vec<Value> = config
            .network
            .ports
            .iter()
            .map(|p| {
                json!({
                    "protocol": p.protocol,
                    "internal_port": p.container_port,
                    "ports": [{ "port": p.host_port, "handlers": ["http"] }],
                })
            })
            .collect();

        let create_body = json!({
            "config": {
                "image": config.image,
                "env": config.env,
                "guest": guest,
                "services": services,
                "metadata": { META_INSTANCE_ID: id.to_string() },
            }
        });

        let body: Value = self
            .client
            .post(self.machines_url(""))
            .bearer_auth(&self.api_token)
            .json(&create_body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::Operation(format!("machine create failed: {e}")))?
            .json()
            .await?;

        let machine_id = body["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Operation("fly.io did not return a machine id".into()))?
            .to_string();

        let meta = FlyMetadata {
            app_name: Some(self.app_name.clone()),
            machine_id: Some(machine_id),
            volume_id: None,
            ip_address_id: None,
            region: body["region"].as_str().map(|s| s.to_string()),
        };
        self.cache.write().await.insert(id.clone(), meta.clone());

        Ok(Self::to_instance(&id, &config, &meta, &body))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, ProviderError> {
        let Some(meta) = self.resolve_machine(id).await? else {
            return Ok(None);
        };
        let machine_id = meta.machine_id.as_deref().unwrap_or_default();
        let url = self.machines_url(&format!("/{machine_id}"));
        let resp = self.client.get(&url).bearer_auth(&self.api_token).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.error_for_status()?.json().await?;
        let config = InstanceConfig {
            name: body["name"].as_str().unwrap_or_default().to_string(),
            image: body["config"]["image"].as_str().unwrap_or_default().to_string(),
            workspace_path: String::new(),
            resources: swarm_domain::types::ResourceSpec { cpu: 0.0, memory: String::new(), storage: 0 },
            network: Default::default(),
            env: HashMap::new(),
            extensions: Vec::new(),
            auth: swarm_domain::types::AuthConfig {
                auth_type: swarm_domain::types::AuthType::None,
                credentials: HashMap::new(),
            },
        };
        Ok(Some(Self::to_instance(id, &config, &meta, &body)))
    }

    async fn list_instances(&self, filter: Option<&ListFilter>) -> Result<Vec<VSCodeInstance>, ProviderError> {
        let machines = self.list_machines().await?;
        let mut instances = Vec::new();
        for (machine_id, body) in machines {
            let Some(id_str) = body["config"]["metadata"][META_INSTANCE_ID].as_str() else { continue };
            let Ok(uuid) = id_str.parse::<uuid::Uuid>() else { continue };
            let id = InstanceId(uuid);
            let meta = FlyMetadata {
                app_name: Some(self.app_name.clone()),
                machine_id: Some(machine_id),
                volume_id: None,
                ip_address_id: None,
                region: body["region"].as_str().map(|s| s.to_string()),
            };
            self.cache.write().await.insert(id.clone(), meta.clone());
            if let Some(instance) = self.get_instance(&id).await? {
                instances.push(instance);
            }
        }

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
        let meta = self.resolve_machine(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let machine_id = meta.machine_id.as_deref().unwrap_or_default();
        let url = self.machines_url(&format!("/{machine_id}/start"));
        self.client.post(&url).bearer_auth(&self.api_token).send().await?.error_for_status()?;
        self.get_instance(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn stop_instance(&self, id: &InstanceId, force: bool) -> Result<VSCodeInstance, ProviderError> {
        let meta = self.resolve_machine(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let machine_id = meta.machine_id.as_deref().unwrap_or_default();
        let url = self.machines_url(&format!("/{machine_id}/stop"));
        let body = json!({ "signal": if force { "SIGKILL" } else { "SIGTERM" } });
        self.client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        self.get_instance(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<bool, ProviderError> {
        let Some(meta) = self.resolve_machine(id).await? else {
            return Ok(false);
        };
        let machine_id = meta.machine_id.as_deref().unwrap_or_default();
        let url = self.machines_url(&format!("/{machine_id}?force=true"));
        let resp = self.client.delete(&url).bearer_auth(&self.api_token).send().await?;
        self.cache.write().await.remove(id);
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status()?;
        Ok(true)
    }

    async fn update_instance(
        &self,
        id: &InstanceId,
        patch: InstanceConfigPatch,
    ) -> Result<VSCodeInstance, ProviderError> {
        let mut instance = self.get_instance(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        instance.config.apply_patch(patch);
        instance.updated_at = Utc::now();
        Ok(instance)
    }

    async fn get_instance_logs(&self, _id: &InstanceId, opts: LogOptions) -> Result<LogStream, ProviderError> {
        // fly.io exposes logs over NATS/websocket, not this REST API; modeled
        // here as an empty batch / immediately-closed follow channel.
        if opts.follow {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            return Ok(LogStream::Follow(rx));
        }
        Ok(LogStream::Finite(Vec::new()))
    }

    async fn execute_command(&self, id: &InstanceId, command: &str) -> Result<CommandResult, ProviderError> {
        let meta = self.resolve_machine(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let machine_id = meta.machine_id.as_deref().unwrap_or_default();
        let start = Instant::now();
        let url = self.machines_url(&format!("/{machine_id}/exec"));
        let body: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&json!({ "command": ["sh", "-c", command] }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!(instance = %id, elapsed_ms = start.elapsed().as_millis(), "execute_command complete");
        Ok(CommandResult {
            exit_code: body["exit_code"].as_i64().unwrap_or(-1) as i32,
            stdout: body["stdout"].as_str().unwrap_or_default().to_string(),
            stderr: body["stderr"].as_str().unwrap_or_default().to_string(),
        })
    }
}

fn parse_memory_mb(memory: &str) -> u32 {
    let trimmed = memory.trim().to_lowercase();
    if let Some(gb) = trimmed.strip_suffix("gb").or_else(|| trimmed.strip_suffix('g')) {
        gb.trim().parse::<f64>().map(|v| (v * 1024.0) as u32).unwrap_or(512)
    } else if let Some(mb) = trimmed.strip_suffix("mb").or_else(|| trimmed.strip_suffix('m')) {
        mb.trim().parse::<u32>().unwrap_or(512)
    } else {
        trimmed.parse::<u32>().unwrap_or(512)
    }
}
