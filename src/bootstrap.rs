//! CI server and agent bring-up.
//!
//! Starts the GoCD server container, waits for it to get a network address,
//! then builds and starts an agent pointed at it. Containers already running
//! from the same image are reused so a repeated bootstrap does not fight
//! over the server's host ports.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::config::BootstrapSection;
use crate::errors::{BootstrapError, RuntimeError};
use crate::readiness::{Probe, ReadinessPolicy};
use crate::runtime::{
    ContainerFilter, ContainerHandle, ContainerRuntime, ContainerSpec, MountSpec, PortMapping,
};

const SERVER_HTTP_PORT: u16 = 8153;
const SERVER_HTTPS_PORT: u16 = 8154;
const LOOPBACK: &str = "127.0.0.1";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const AGENT_DATA_DIR: &str = "/godata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiDeployment {
    pub server: ContainerHandle,
    pub server_ip: String,
    pub agent: ContainerHandle,
}

pub struct Bootstrap<'a> {
    runtime: &'a dyn ContainerRuntime,
    section: &'a BootstrapSection,
    readiness: ReadinessPolicy,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        section: &'a BootstrapSection,
        readiness: ReadinessPolicy,
    ) -> Self {
        Self {
            runtime,
            section,
            readiness,
        }
    }

    pub async fn run(&self) -> Result<CiDeployment, BootstrapError> {
        let server = self.start_server().await?;
        let server_ip = self.wait_for_ip(&server).await?;
        info!(id = %server, ip = %server_ip, "CI server has an address");
        let agent = self.start_agent(&server_ip).await?;
        Ok(CiDeployment {
            server,
            server_ip,
            agent,
        })
    }

    async fn running_from(&self, image: &str) -> Result<Option<ContainerHandle>, RuntimeError> {
        let running = self.runtime.list(&ContainerFilter::by_image(image)).await?;
        Ok(running.into_iter().next().map(|c| c.handle))
    }

    async fn start_server(&self) -> Result<ContainerHandle, BootstrapError> {
        if let Some(handle) = self.running_from(self.section.server_image_name()).await? {
            info!(id = %handle, "CI server already running");
            return Ok(handle);
        }
        info!(image = %self.section.server_image, "starting CI server");
        let spec = ContainerSpec {
            image: self.section.server_image.clone(),
            ports: vec![
                PortMapping::tcp(SERVER_HTTP_PORT, SERVER_HTTP_PORT).on_host_ip(LOOPBACK),
                PortMapping::tcp(SERVER_HTTPS_PORT, SERVER_HTTPS_PORT).on_host_ip(LOOPBACK),
            ],
            ..Default::default()
        };
        Ok(self.runtime.run(&spec).await?)
    }

    async fn wait_for_ip(&self, server: &ContainerHandle) -> Result<String, BootstrapError> {
        let runtime = self.runtime;
        self.readiness
            .wait_for("CI server address", || async move {
                let address = runtime.inspect(server).await?;
                Ok::<_, BootstrapError>(match address.ip {
                    Some(ip) => Probe::Ready(ip),
                    None => Probe::Pending("no IP address assigned yet".to_string()),
                })
            })
            .await
    }

    async fn start_agent(&self, server_ip: &str) -> Result<ContainerHandle, BootstrapError> {
        if let Some(handle) = self.running_from(&self.section.agent_image).await? {
            info!(id = %handle, "CI agent already running");
            return Ok(handle);
        }
        let godata = std::path::absolute(&self.section.godata_dir).map_err(|source| {
            BootstrapError::DataDir {
                path: self.section.godata_dir.clone(),
                source,
            }
        })?;
        info!(tag = %self.section.agent_image, "building CI agent image");
        self.runtime
            .build_image(
                &self.section.agent_context,
                &self.section.agent_dockerfile,
                &self.section.agent_image,
            )
            .await?;

        let spec = ContainerSpec {
            image: self.section.agent_image.clone(),
            env: BTreeMap::from([(
                "GO_SERVER_URL".to_string(),
                format!("https://{}:{}/go", server_ip, SERVER_HTTPS_PORT),
            )]),
            mounts: vec![
                MountSpec {
                    source: PathBuf::from(DOCKER_SOCKET),
                    target: DOCKER_SOCKET.to_string(),
                    read_only: false,
                },
                MountSpec {
                    source: godata,
                    target: AGENT_DATA_DIR.to_string(),
                    read_only: false,
                },
            ],
            ..Default::default()
        };
        info!("starting CI agent");
        Ok(self.runtime.run(&spec).await?)
    }
}
