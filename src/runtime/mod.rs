//! Container runtime seam.
//!
//! The proxy publisher and the CI bootstrap only need a handful of runtime
//! operations. They go through [`ContainerRuntime`] so tests can run against
//! an in-memory double instead of a Docker daemon.

pub mod docker;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::RuntimeError;

pub use docker::DockerRuntime;

/// Opaque reference to a container (id or name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Container side, e.g. `"80/tcp"`.
    pub container_port: String,
    pub host_ip: Option<String>,
    pub host_port: u16,
}

impl PortMapping {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port: format!("{}/tcp", container_port),
            host_ip: None,
            host_port,
        }
    }

    pub fn on_host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = Some(ip.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to start one detached container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
}

/// A container as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub handle: ContainerHandle,
    /// Names without the leading `/` Docker reports.
    pub names: Vec<String>,
    pub image: String,
    pub running: bool,
}

/// Client-side filter. Stopped containers only match when asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub name: Option<String>,
    pub image_contains: Option<String>,
    pub include_stopped: bool,
}

impl ContainerFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_image(fragment: impl Into<String>) -> Self {
        Self {
            image_contains: Some(fragment.into()),
            ..Self::default()
        }
    }

    /// Also match exited and created containers. Needed whenever the caller
    /// is about to reuse a container name.
    pub fn including_stopped(mut self) -> Self {
        self.include_stopped = true;
        self
    }

    pub fn matches(&self, info: &ContainerInfo) -> bool {
        if !self.include_stopped && !info.running {
            return false;
        }
        let name_ok = self
            .name
            .as_ref()
            .is_none_or(|name| info.names.iter().any(|n| n == name));
        let image_ok = self
            .image_contains
            .as_ref()
            .is_none_or(|fragment| info.image.contains(fragment.as_str()));
        name_ok && image_ok
    }
}

/// Network address of a container on its first attached network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip: Option<String>,
    pub gateway: Option<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a detached container, pulling the image if needed.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> Result<(), RuntimeError>;

    /// Containers matching `filter`.
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn inspect(&self, handle: &ContainerHandle) -> Result<NetworkAddress, RuntimeError>;
}
