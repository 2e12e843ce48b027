//! Docker-backed [`ContainerRuntime`] over the Engine API.

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    ContainerFilter, ContainerHandle, ContainerInfo, ContainerRuntime, ContainerSpec,
    NetworkAddress,
};
use crate::errors::RuntimeError;

const STOP_TIMEOUT_SECS: i32 = 10;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }
        info!(image, "pulling image");
        let options = CreateImageOptionsBuilder::default().from_image(image).build();
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }
}

fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for mapping in &spec.ports {
        port_bindings
            .entry(mapping.container_port.clone())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: mapping.host_ip.clone(),
                host_port: Some(mapping.host_port.to_string()),
            });
    }

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.to_string_lossy().to_string()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: (!env.is_empty()).then_some(env),
        host_config: Some(HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            mounts: (!mounts.is_empty()).then_some(mounts),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let mut options = CreateContainerOptionsBuilder::default();
        if let Some(name) = &spec.name {
            options = options.name(name);
        }
        let created = self
            .docker
            .create_container(Some(options.build()), create_body(spec))
            .await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await?;
        info!(image = %spec.image, id = %created.id, "container started");
        Ok(ContainerHandle(created.id))
    }

    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> Result<(), RuntimeError> {
        info!(tag, dockerfile, context = %context.display(), "building image");
        let output = Command::new("docker")
            .arg("build")
            .arg("-f")
            .arg(context.join(dockerfile))
            .arg("-t")
            .arg(tag)
            .arg(context)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("docker build stdout: {}", stdout.trim());
        }
        if !output.status.success() {
            return Err(RuntimeError::ImageBuild {
                tag: tag.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options = ListContainersOptionsBuilder::default()
            .all(filter.include_stopped)
            .build();
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let running = summary
                    .state
                    .as_ref()
                    .is_some_and(|state| state.to_string() == "running");
                Some(ContainerInfo {
                    handle: ContainerHandle(id),
                    names: summary
                        .names
                        .unwrap_or_default()
                        .into_iter()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .collect(),
                    image: summary.image.unwrap_or_default(),
                    running,
                })
            })
            .filter(|info| filter.matches(info))
            .collect())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = StopContainerOptionsBuilder::default()
            .t(STOP_TIMEOUT_SECS)
            .build();
        self.docker
            .stop_container(handle.as_str(), Some(options))
            .await?;
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(handle.as_str(), Some(options))
            .await?;
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<NetworkAddress, RuntimeError> {
        let details = self
            .docker
            .inspect_container(handle.as_str(), None::<InspectContainerOptions>)
            .await?;
        let endpoint = details
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                let mut networks: Vec<_> = networks.into_iter().collect();
                networks.sort_by(|a, b| a.0.cmp(&b.0));
                let index = networks
                    .iter()
                    .position(|(name, _)| name == "bridge")
                    .unwrap_or(0);
                (index < networks.len()).then(|| networks.swap_remove(index))
            })
            .map(|(_, endpoint)| endpoint);

        let non_empty = |value: Option<String>| value.filter(|s| !s.is_empty());
        Ok(match endpoint {
            Some(endpoint) => NetworkAddress {
                ip: non_empty(endpoint.ip_address),
                gateway: non_empty(endpoint.gateway),
            },
            None => NetworkAddress::default(),
        })
    }
}
