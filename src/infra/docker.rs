use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions},
    image::CreateImageOptions,
    secret::{ContainerStateStatusEnum, CreateImageInfo, EventMessage},
    system::EventsOptions,
    Docker,
};
use futures::{StreamExt, TryStreamExt};
use itertools::{Either, Itertools};
use log::{debug, info};
use map_macro::hash_map;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Map, Value};

use crate::domain::{
    mapper::object_at,
    model::{SchemaVariant, SettingsDocument, TestPhase, ADMINISTRATION},
    port::{DockerDaemon, PhaseStream},
};

pub const OFFICIAL_AGENT_IMAGE: &str = "jetbrains/teamcity-agent:latest";
pub const TEST_LABEL: &str = "dockprof.test.profile";

pub struct DockerDaemonClient {
    pub variant: SchemaVariant,
    pub docker: Docker,
}

#[async_trait]
impl DockerDaemon for DockerDaemonClient {
    async fn ping(&self) -> Result<String, Error> {
        self.docker
            .version()
            .await
            .context("Can't reach docker daemon")
            .map(|version| version.version.unwrap_or_default())
    }

    async fn create_test_container(&self, settings: &SettingsDocument) -> Result<String, Error> {
        let body = create_body(settings, self.variant)?;
        let image = body
            .get("Image")
            .and_then(Value::as_str)
            .ok_or(anyhow!("Profile has no image"))?
            .to_string();
        if pull_on_create(settings) {
            info!("Pull image {}", image);
            self.docker
                .create_image(
                    Some(CreateImageOptions {
                        from_image: image.as_str(),
                        ..Default::default()
                    }),
                    None,
                    None,
                )
                .try_collect::<Vec<CreateImageInfo>>()
                .await
                .context("Error while pulling image")?;
        }
        let config: Config<String> =
            serde_json::from_value(body).context("Profile settings are not a valid container configuration")?;
        let name = format!(
            "{}.test.{}",
            container_name_part(settings.profile().unwrap_or("profile")),
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(7)
                .map(char::from)
                .collect::<String>()
                .to_lowercase()
        );
        let container = self
            .docker
            .create_container(Some(CreateContainerOptions { name, platform: None }), config)
            .await
            .context("Can't create test container")?;
        info!("Created test container {}", container.id);
        Ok(container.id)
    }

    async fn start(&self, container_id: &str) -> Result<(), Error> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context(format!("Error starting container {}", container_id))
    }

    async fn inspect(&self, container_id: &str) -> Result<TestPhase, Error> {
        let state = self
            .docker
            .inspect_container(container_id, None)
            .await
            .context(format!("Error inspecting container {}", container_id))?
            .state
            .ok_or(anyhow!("Container {} has no state", container_id))?;
        Ok(match (state.running, state.status) {
            (Some(true), _) => TestPhase::Running,
            (_, Some(ContainerStateStatusEnum::EXITED)) | (_, Some(ContainerStateStatusEnum::DEAD)) => {
                TestPhase::Exited {
                    code: state.exit_code.unwrap_or_default(),
                }
            }
            (_, Some(ContainerStateStatusEnum::CREATED)) => TestPhase::Created,
            _ => TestPhase::Running,
        })
    }

    async fn logs(&self, container_id: &str) -> Result<Vec<String>, Error> {
        self.docker
            .logs(
                container_id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: "500".to_string(),
                    ..Default::default()
                }),
            )
            .map_ok(|output| output.to_string())
            .try_collect::<Vec<String>>()
            .await
            .context(format!("Error reading logs of container {}", container_id))
    }

    fn status_events(&self, container_id: &str) -> Option<PhaseStream> {
        let events = self.docker.events(Some(EventsOptions::<String> {
            filters: hash_map! {
                "container".to_string() => vec![container_id.to_string()],
                "type".to_string() => vec!["container".to_string()]
            },
            ..Default::default()
        }));
        Some(
            events
                .filter_map(|event| {
                    std::future::ready(match event {
                        Ok(message) => phase_of_event(&message).map(Ok),
                        Err(e) => Some(Err(Error::from(e))),
                    })
                })
                .boxed(),
        )
    }

    async fn remove(&self, container_id: &str) -> Result<(), Error> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .context(format!("Error while removing container {}", container_id))
    }
}

fn phase_of_event(message: &EventMessage) -> Option<TestPhase> {
    debug!("Docker event {:?}", message.action);
    match message.action.as_deref()? {
        "start" => Some(TestPhase::Running),
        "die" => {
            let code = message
                .actor
                .as_ref()
                .and_then(|actor| actor.attributes.as_ref())
                .and_then(|attributes| attributes.get("exitCode"))
                .and_then(|code| code.parse::<i64>().ok())
                .unwrap_or_default();
            Some(TestPhase::Exited { code })
        }
        _ => None,
    }
}

fn pull_on_create(settings: &SettingsDocument) -> bool {
    object_at(settings.content(), &[ADMINISTRATION])
        .and_then(|administration| administration.get("PullOnCreate"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn container_name_part(profile: &str) -> String {
    profile
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Docker Engine create-container body for a stored profile.
pub fn create_body(settings: &SettingsDocument, variant: SchemaVariant) -> Result<Value, Error> {
    let content = settings.content();
    let mut body = match variant {
        SchemaVariant::Container => object_at(content, &[variant.spec_key()]).cloned().unwrap_or_default(),
        SchemaVariant::Swarm => swarm_body(content),
    };
    let official = object_at(content, &[ADMINISTRATION])
        .and_then(|administration| administration.get("UseOfficialTCAgentImage"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if official {
        body.insert("Image".to_string(), json!(OFFICIAL_AGENT_IMAGE));
    }
    if !body.get("Image").and_then(Value::as_str).is_some_and(|image| !image.is_empty()) {
        return Err(anyhow!("Profile {:?} has no image", settings.profile()));
    }

    let mut labels = body
        .remove("Labels")
        .and_then(|labels| labels.as_object().cloned())
        .unwrap_or_default();
    labels.insert(TEST_LABEL.to_string(), json!(settings.profile().unwrap_or_default()));
    body.insert("Labels".to_string(), Value::Object(labels));

    let (anonymous_volumes, exposed) = match body.get_mut("HostConfig") {
        Some(Value::Object(host_config)) => wire_host_config(host_config),
        _ => (Map::new(), Map::new()),
    };
    if !anonymous_volumes.is_empty() {
        body.insert("Volumes".to_string(), Value::Object(anonymous_volumes));
    }
    if !exposed.is_empty() {
        body.insert("ExposedPorts".to_string(), Value::Object(exposed));
    }
    Ok(Value::Object(body))
}

/// Rewrites structured binds and port bindings into their Docker forms.
/// Returns the anonymous volumes and exposed ports the body needs.
fn wire_host_config(host_config: &mut Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut anonymous_volumes = Map::new();
    if let Some(Value::Array(binds)) = host_config.remove("Binds") {
        let (named, anonymous): (Vec<String>, Vec<String>) = binds
            .iter()
            .filter_map(bind_string)
            .partition_map(|(has_host, spec)| {
                if has_host {
                    Either::Left(spec)
                } else {
                    Either::Right(spec)
                }
            });
        for volume in anonymous {
            anonymous_volumes.insert(volume, json!({}));
        }
        if !named.is_empty() {
            host_config.insert("Binds".to_string(), json!(named));
        }
    }
    let mut exposed = Map::new();
    if let Some(Value::Array(ports)) = host_config.remove("PortBindings") {
        let mut bindings = Map::new();
        for port in ports.iter().filter_map(Value::as_object) {
            let Some(container_port) = port.get("ContainerPort").and_then(Value::as_str) else {
                continue;
            };
            let protocol = port.get("Protocol").and_then(Value::as_str).unwrap_or("tcp");
            let key = format!("{}/{}", container_port, protocol);
            exposed.insert(key.clone(), json!({}));
            let binding = json!({
                "HostIp": port.get("HostIp").and_then(Value::as_str).unwrap_or_default(),
                "HostPort": port.get("HostPort").and_then(Value::as_str).unwrap_or_default(),
            });
            if let Value::Array(list) = bindings.entry(key).or_insert_with(|| json!([])) {
                list.push(binding);
            }
        }
        if !bindings.is_empty() {
            host_config.insert("PortBindings".to_string(), Value::Object(bindings));
        }
    }
    (anonymous_volumes, exposed)
}

/// `(has_host_path, docker_spec)` for a structured bind.
fn bind_string(bind: &Value) -> Option<(bool, String)> {
    match bind {
        Value::String(raw) => Some((true, raw.clone())),
        Value::Object(fields) => {
            let host = fields.get("PathOnHost").and_then(Value::as_str).unwrap_or_default();
            let container = fields.get("PathInContainer").and_then(Value::as_str).filter(|path| !path.is_empty())?;
            if host.is_empty() {
                return Some((false, container.to_string()));
            }
            let mode = fields.get("ReadOnly").and_then(Value::as_str).unwrap_or_default();
            Some((
                true,
                [host, container, mode].into_iter().filter(|part| !part.is_empty()).join(":"),
            ))
        }
        _ => None,
    }
}

/// Plain container body from a swarm task template.
fn swarm_body(content: &Map<String, Value>) -> Map<String, Value> {
    let mut body = Map::new();
    let spec_key = SchemaVariant::Swarm.spec_key();
    if let Some(spec) = object_at(content, &[spec_key, "TaskTemplate", "ContainerSpec"]) {
        for (from, to) in [
            ("Image", "Image"),
            ("Hostname", "Hostname"),
            ("User", "User"),
            ("Dir", "WorkingDir"),
            ("Command", "Entrypoint"),
            ("Args", "Cmd"),
            ("Env", "Env"),
            ("Labels", "Labels"),
            ("StopSignal", "StopSignal"),
        ] {
            if let Some(value) = spec.get(from) {
                body.insert(to.to_string(), value.clone());
            }
        }
        if let Some(nanos) = spec.get("StopGracePeriod").and_then(Value::as_i64) {
            body.insert("StopTimeout".to_string(), json!(nanos / 1_000_000_000));
        }
        let mut host_config = Map::new();
        if let Some(Value::Array(mounts)) = spec.get("Mounts") {
            let binds: Vec<Value> = mounts
                .iter()
                .filter_map(Value::as_object)
                .map(|mount| {
                    let mode = match mount.get("ReadOnly").and_then(Value::as_bool) {
                        Some(true) => "ro",
                        _ => "rw",
                    };
                    json!({
                        "PathOnHost": mount.get("Source").cloned().unwrap_or(json!("")),
                        "PathInContainer": mount.get("Target").cloned().unwrap_or(json!("")),
                        "ReadOnly": mode,
                    })
                })
                .collect();
            host_config.insert("Binds".to_string(), Value::Array(binds));
        }
        if let Some(limits) = object_at(content, &[spec_key, "TaskTemplate", "Resources", "Limits"]) {
            if let Some(nanos) = limits.get("NanoCPUs") {
                host_config.insert("NanoCPUs".to_string(), nanos.clone());
            }
            if let Some(memory) = limits.get("MemoryBytes") {
                host_config.insert("Memory".to_string(), memory.clone());
            }
        }
        if !host_config.is_empty() {
            body.insert("HostConfig".to_string(), Value::Object(host_config));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(value: Value) -> SettingsDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn container_body_uses_docker_wire_format() {
        let body = create_body(
            &settings(json!({
                "Administration": {"Version": 4, "Profile": "linux"},
                "Container": {
                    "Image": "alpine",
                    "Env": ["A=1"],
                    "HostConfig": {
                        "Binds": [
                            {"PathOnHost": "/a", "PathInContainer": "/b", "ReadOnly": "ro"},
                            {"PathOnHost": "", "PathInContainer": "/cache"}
                        ],
                        "PortBindings": [
                            {"HostPort": "8080", "ContainerPort": "80", "Protocol": "tcp"},
                            {"ContainerPort": "53", "Protocol": "udp"}
                        ],
                        "Memory": 1024
                    }
                }
            })),
            SchemaVariant::Container,
        )
        .unwrap();
        assert_eq!(
            body,
            json!({
                "Image": "alpine",
                "Env": ["A=1"],
                "Labels": {"dockprof.test.profile": "linux"},
                "Volumes": {"/cache": {}},
                "ExposedPorts": {"80/tcp": {}, "53/udp": {}},
                "HostConfig": {
                    "Binds": ["/a:/b:ro"],
                    "PortBindings": {
                        "80/tcp": [{"HostIp": "", "HostPort": "8080"}],
                        "53/udp": [{"HostIp": "", "HostPort": ""}]
                    },
                    "Memory": 1024
                }
            })
        );
        let config: Config<String> = serde_json::from_value(body).unwrap();
        assert_eq!(config.image.as_deref(), Some("alpine"));
        assert_eq!(config.host_config.unwrap().binds, Some(vec!["/a:/b:ro".to_string()]));
    }

    #[test]
    fn official_image_replaces_image() {
        let body = create_body(
            &settings(json!({"Administration": {"Profile": "p", "UseOfficialTCAgentImage": true}})),
            SchemaVariant::Container,
        )
        .unwrap();
        assert_eq!(body["Image"], json!(OFFICIAL_AGENT_IMAGE));
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(create_body(&settings(json!({"Administration": {"Profile": "p"}})), SchemaVariant::Container).is_err());
    }

    #[test]
    fn swarm_body_from_task_template() {
        let body = create_body(
            &settings(json!({
                "Administration": {"Version": 5, "Profile": "s"},
                "AgentHolderSpec": {"TaskTemplate": {
                    "ContainerSpec": {
                        "Image": "agent",
                        "Dir": "/w",
                        "Args": ["run"],
                        "StopGracePeriod": 10_000_000_000i64,
                        "Mounts": [{"Type": "bind", "Source": "/a", "Target": "/b", "ReadOnly": true}]
                    },
                    "Resources": {"Limits": {"MemoryBytes": 2048}}
                }}
            })),
            SchemaVariant::Swarm,
        )
        .unwrap();
        assert_eq!(
            body,
            json!({
                "Image": "agent",
                "WorkingDir": "/w",
                "Cmd": ["run"],
                "StopTimeout": 10,
                "Labels": {"dockprof.test.profile": "s"},
                "HostConfig": {"Binds": ["/a:/b:ro"], "Memory": 2048}
            })
        );
    }

    #[test]
    fn legacy_string_binds_pass_through() {
        assert_eq!(bind_string(&json!("/x:/y")), Some((true, "/x:/y".to_string())));
        assert_eq!(bind_string(&json!({"PathOnHost": "/x"})), None);
    }

    #[test]
    fn die_event_carries_exit_code() {
        let message: EventMessage = serde_json::from_value(json!({
            "Action": "die",
            "Actor": {"ID": "abc", "Attributes": {"exitCode": "137"}}
        }))
        .unwrap();
        assert_eq!(phase_of_event(&message), Some(TestPhase::Exited { code: 137 }));
    }

    #[test]
    fn container_names_are_sanitized() {
        assert_eq!(container_name_part("linux agents/1"), "linux-agents-1");
    }
}
