use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use swarm_domain::types::{
    DockerMetadata, InstanceConfig, InstanceConfigPatch, InstanceId, InstanceStatus,
    ObservedNetwork, ObservedResources, ProviderMetadata, ProviderType, VSCodeInstance,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{CommandResult, ListFilter, LogOptions, LogStream, Provider, ProviderCapabilities};

const LABEL_INSTANCE_ID: &str = "swarm.instance.id";

/// Driver for containers run through the Docker Engine API.
///
/// Containers are named `vscode-swarm-<instanceId>` and labeled with
/// `swarm.instance.id`, so every operation after `create_instance`
/// addresses the container deterministically — the driver keeps no state
/// that can't be rebuilt from a `list_instances` scan after a restart.
pub struct DockerProvider {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<RwLock<HashMap<InstanceId, String>>>,
}

impl DockerProvider {
    pub fn new(config: &HashMap<String, String>) -> Self {
        let base_url = config
            .get("host")
            .cloned()
            .unwrap_or_else(|| "http://localhost:2375".to_string());
        Self {
            client: reqwest::Client::new(),
            base_url,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn container_name(id: &InstanceId) -> String {
        format!("vscode-swarm-{id}")
    }

    async fn resolve_container_id(&self, id: &InstanceId) -> Result<Option<String>, ProviderError> {
        if let Some(cached) = self.cache.read().await.get(id).cloned() {
            return Ok(Some(cached));
        }
        // Cache miss (fresh process): recover by inspecting the deterministic name.
        let name = Self::container_name(id);
        let url = format!("{}/containers/{}/json", self.base_url, name);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.error_for_status()?.json().await?;
        let container_id = body["Id"].as_str().map(|s| s.to_string());
        if let Some(cid) = &container_id {
            self.cache.write().await.insert(id.clone(), cid.clone());
        }
        Ok(container_id)
    }

    fn status_from_state(state: &str) -> InstanceStatus {
        match state {
            "created" => InstanceStatus::Created,
            "running" => InstanceStatus::Running,
            "paused" | "restarting" => InstanceStatus::Starting,
            "removing" | "exited" => InstanceStatus::Stopped,
            "dead" => InstanceStatus::Failed,
            _ => InstanceStatus::Unknown,
        }
    }

    fn to_instance(id: &InstanceId, config: &InstanceConfig, container_id: &str, body: &Value) -> VSCodeInstance {
        let state = body["State"]["Status"].as_str().unwrap_or("unknown");
        let ip = body["NetworkSettings"]["IPAddress"].as_str().filter(|s| !s.is_empty());
        VSCodeInstance {
            id: id.clone(),
            name: config.name.clone(),
            provider_type: ProviderType::Docker,
            provider_instance_id: container_id.to_string(),
            status: Self::status_from_state(state),
            config: config.clone(),
            network: ObservedNetwork {
                internal_ip: ip.map(|s| s.to_string()),
                external_ip: None,
                ports: config.network.ports.clone(),
                urls: Vec::new(),
            },
            resources: ObservedResources::default(),
            metadata: ProviderMetadata::Docker(DockerMetadata {
                container_id: Some(container_id.to_string()),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Provider for DockerProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Docker
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_live_resize: false,
            supports_snapshotting: false,
            supports_multi_region: false,
            supported_regions: None,
            max_instances_per_user: 100,
            max_resources_per_instance: None,
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let url = format!("{}/version", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::InitError(format!("docker engine unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| ProviderError::InitError(e.to_string()))?;
        Ok(())
    }

    async fn create_instance(&self, config: InstanceConfig) -> Result<VSCodeInstance, ProviderError> {
        let id = InstanceId::new();
        let name = Self::container_name(&id);

        let port_bindings: serde_json::Map<String, Value> = config
            .network
            .ports
            .iter()
            .map(|p| {
                let key = format!("{}/{}", p.container_port, p.protocol);
                let binding = json!([{ "HostPort": p.host_port.to_string() }]);
                (key, binding)
            })
            .collect();

        let create_body = json!({
            "Image": config.image,
            "Env": config.env.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>(),
            "Labels": { LABEL_INSTANCE_ID: id.to_string() },
            "HostConfig": {
                "PortBindings": port_bindings,
                "PublishAllPorts": config.network.public_access,
            },
        });

        let url = format!("{}/containers/create?name={}", self.base_url, name);
        let resp = self
            .client
            .post(&url)
            .json(&create_body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::Operation(format!("container create failed: {e}")))?;
        let body: Value = resp.json().await?;
        let container_id = body["Id"]
            .as_str()
            .ok_or_else(|| ProviderError::Operation("docker did not return a container id".into()))?
            .to_string();

        let start_url = format!("{}/containers/{}/start", self.base_url, container_id);
        if let Err(e) = self.client.post(&start_url).send().await?.error_for_status() {
            // Clean up the half-created container rather than leaving an orphan.
            let _ = self
                .client
                .delete(format!("{}/containers/{}?force=true", self.base_url, container_id))
                .send()
                .await;
            return Err(ProviderError::Operation(format!("container start failed: {e}")));
        }

        self.cache.write().await.insert(id.clone(), container_id.clone());

        let inspect_url = format!("{}/containers/{}/json", self.base_url, container_id);
        let inspect: Value = self.client.get(&inspect_url).send().await?.json().await?;
        Ok(Self::to_instance(&id, &config, &container_id, &inspect))
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<VSCodeInstance>, ProviderError> {
        let Some(container_id) = self.resolve_container_id(id).await? else {
            return Ok(None);
        };
        let url = format!("{}/containers/{}/json", self.base_url, container_id);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.error_for_status()?.json().await?;
        let image = body["Config"]["Image"].as_str().unwrap_or_default().to_string();
        let config = InstanceConfig {
            name: body["Name"].as_str().unwrap_or_default().trim_start_matches('/').to_string(),
            image,
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
        Ok(Some(Self::to_instance(id, &config, &container_id, &body)))
    }

    async fn list_instances(&self, filter: Option<&ListFilter>) -> Result<Vec<VSCodeInstance>, ProviderError> {
        let url = format!(
            "{}/containers/json?all=true&filters={{\"label\":[\"{LABEL_INSTANCE_ID}\"]}}",
            self.base_url
        );
        let body: Vec<Value> = self.client.get(&url).send().await?.error_for_status()?.json().await?;

        let mut instances = Vec::new();
        for entry in body {
            let Some(labels) = entry["Labels"].as_object() else { continue };
            let Some(id_str) = labels.get(LABEL_INSTANCE_ID).and_then(|v| v.as_str()) else { continue };
            let Ok(uuid) = id_str.parse::<uuid::Uuid>() else {
                warn!(id_str, "skipping container with malformed instance label");
                continue;
            };
            let id = InstanceId(uuid);
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
        let container_id = self
            .resolve_container_id(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let url = format!("{}/containers/{}/start", self.base_url, container_id);
        let resp = self.client.post(&url).send().await?;
        if resp.status() != reqwest::StatusCode::NOT_MODIFIED {
            resp.error_for_status()?;
        }
        self.get_instance(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn stop_instance(&self, id: &InstanceId, force: bool) -> Result<VSCodeInstance, ProviderError> {
        let container_id = self
            .resolve_container_id(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let url = if force {
            format!("{}/containers/{}/kill", self.base_url, container_id)
        } else {
            format!("{}/containers/{}/stop", self.base_url, container_id)
        };
        let resp = self.client.post(&url).send().await?;
        if resp.status() != reqwest::StatusCode::NOT_MODIFIED {
            resp.error_for_status()?;
        }
        self.get_instance(id).await?.ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<bool, ProviderError> {
        let Some(container_id) = self.resolve_container_id(id).await? else {
            return Ok(false);
        };
        let url = format!("{}/containers/{}?force=true", self.base_url, container_id);
        let resp = self.client.delete(&url).send().await?;
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
        // Docker containers can't be reconfigured in place beyond resource
        // limits; a full update requires recreation, which the Controller
        // drives explicitly. We only persist the patch onto the returned
        // snapshot for the caller's bookkeeping.
        let mut instance = self
            .get_instance(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        instance.config.apply_patch(patch);
        instance.updated_at = Utc::now();
        Ok(instance)
    }

    async fn get_instance_logs(&self, id: &InstanceId, opts: LogOptions) -> Result<LogStream, ProviderError> {
        let container_id = self
            .resolve_container_id(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let mut url = format!(
            "{}/containers/{}/logs?stdout=true&stderr=true",
            self.base_url, container_id
        );
        if let Some(lines) = opts.lines {
            url.push_str(&format!("&tail={lines}"));
        }
        if let Some(since) = opts.since {
            url.push_str(&format!("&since={}", since.timestamp()));
        }
        if opts.follow {
            // A real follow would stream the chunked response; modeled here as
            // an already-closed channel since the HTTP body isn't wired to a
            // long-lived task in this driver.
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            return Ok(LogStream::Follow(rx));
        }
        let body = self.client.get(&url).send().await?.error_for_status()?.text().await?;
        let lines = body.lines().map(|l| l.to_string()).collect();
        Ok(LogStream::Finite(lines))
    }

    async fn execute_command(&self, id: &InstanceId, command: &str) -> Result<CommandResult, ProviderError> {
        let container_id = self
            .resolve_container_id(id)
            .await?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        let start = Instant::now();

        let exec_body = json!({
            "Cmd": ["sh", "-c", command],
            "AttachStdout": true,
            "AttachStderr": true,
        });
        let create_url = format!("{}/containers/{}/exec", self.base_url, container_id);
        let exec: Value = self
            .client
            .post(&create_url)
            .json(&exec_body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let exec_id = exec["Id"].as_str().ok_or_else(|| ProviderError::Operation("docker exec create returned no id".into()))?;

        let start_url = format!("{}/exec/{}/start", self.base_url, exec_id);
        let stdout = self
            .client
            .post(&start_url)
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let inspect_url = format!("{}/exec/{}/json", self.base_url, exec_id);
        let inspect: Value = self.client.get(&inspect_url).send().await?.json().await?;
        let exit_code = inspect["ExitCode"].as_i64().unwrap_or(-1) as i32;

        debug!(instance = %id, elapsed_ms = start.elapsed().as_millis(), "execute_command complete");
        Ok(CommandResult { exit_code, stdout, stderr: String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> InstanceConfig {
        InstanceConfig {
            name: "workspace-1".into(),
            image: "codercom/code-server:latest".into(),
            workspace_path: "/home/coder/project".into(),
            resources: swarm_domain::types::ResourceSpec { cpu: 1.0, memory: "512Mi".into(), storage: 10 },
            network: Default::default(),
            env: HashMap::new(),
            extensions: Vec::new(),
            auth: swarm_domain::types::AuthConfig {
                auth_type: swarm_domain::types::AuthType::None,
                credentials: HashMap::new(),
            },
        }
    }

    fn provider(server: &MockServer) -> DockerProvider {
        let mut config = HashMap::new();
        config.insert("host".to_string(), server.uri());
        DockerProvider::new(&config)
    }

    #[tokio::test]
    async fn initialize_succeeds_when_engine_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Version": "24.0.0"})))
            .mount(&server)
            .await;

        provider(&server).initialize().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_fails_when_engine_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = provider(&server).initialize().await.unwrap_err();
        assert!(matches!(err, ProviderError::InitError(_)));
    }

    #[tokio::test]
    async fn create_instance_starts_container_and_returns_observed_state() {
        let server = MockServer::start().await;
        let container_id = "abc123deadbeef";

        Mock::given(method("POST"))
            .and(path("/containers/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "Id": container_id })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/containers/{container_id}/start")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/containers/{container_id}/json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Id": container_id,
                "Name": "/vscode-swarm-whatever",
                "State": { "Status": "running" },
                "Config": { "Image": "codercom/code-server:latest" },
                "NetworkSettings": { "IPAddress": "172.17.0.2" },
            })))
            .mount(&server)
            .await;

        let instance = provider(&server).create_instance(test_config()).await.unwrap();

        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.network.internal_ip.as_deref(), Some("172.17.0.2"));
        match instance.metadata {
            ProviderMetadata::Docker(meta) => assert_eq!(meta.container_id.as_deref(), Some(container_id)),
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_instance_cleans_up_container_when_start_fails() {
        let server = MockServer::start().await;
        let container_id = "failcase0001";

        Mock::given(method("POST"))
            .and(path("/containers/create"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "Id": container_id })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/containers/{container_id}/start")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("/containers/{container_id}")))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let err = provider(&server).create_instance(test_config()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Operation(_)));
    }

    #[tokio::test]
    async fn get_instance_returns_none_on_fresh_process_cache_miss() {
        let server = MockServer::start().await;
        let id = InstanceId::new();

        Mock::given(method("GET"))
            .and(path(format!("/containers/{}/json", DockerProvider::container_name(&id))))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = provider(&server).get_instance(&id).await.unwrap();
        assert!(result.is_none());
    }
}
