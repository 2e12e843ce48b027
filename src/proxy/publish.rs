//! Publishing the proxy document to a running nginx container.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::ProxySection;
use crate::errors::ProxyError;
use crate::ledger::store::atomic_write;
use crate::runtime::{
    ContainerFilter, ContainerHandle, ContainerRuntime, ContainerSpec, MountSpec, PortMapping,
};

/// Where nginx picks up the site configuration inside the container.
const CONTAINER_CONFIG_PATH: &str = "/etc/nginx/conf.d/default.conf";
const CONTAINER_HTTP_PORT: u16 = 80;

pub struct ProxyPublisher<'a> {
    runtime: &'a dyn ContainerRuntime,
    section: &'a ProxySection,
}

impl<'a> ProxyPublisher<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, section: &'a ProxySection) -> Self {
        Self { runtime, section }
    }

    /// Write `document` and replace the running proxy instance with one bound
    /// to the new file. A missing previous instance is not an error.
    pub async fn publish(&self, document: &str) -> Result<ContainerHandle, ProxyError> {
        let config_path = self.write_document(document)?;

        // An exited instance still holds the name, so it has to go as well.
        let previous = self
            .runtime
            .list(&ContainerFilter::by_name(&self.section.container_name).including_stopped())
            .await?;
        for container in &previous {
            info!(
                name = %self.section.container_name,
                id = %container.handle,
                running = container.running,
                "replacing proxy container"
            );
            if container.running {
                self.runtime.stop(&container.handle).await?;
            }
            self.runtime.remove(&container.handle).await?;
        }
        if previous.is_empty() {
            debug!(name = %self.section.container_name, "no previous proxy container");
        }

        let spec = ContainerSpec {
            image: self.section.image.clone(),
            name: Some(self.section.container_name.clone()),
            ports: vec![PortMapping::tcp(CONTAINER_HTTP_PORT, self.section.listen_port)],
            mounts: vec![MountSpec {
                source: config_path,
                target: CONTAINER_CONFIG_PATH.to_string(),
                read_only: true,
            }],
            ..Default::default()
        };
        let handle = self.runtime.run(&spec).await?;
        info!(id = %handle, port = self.section.listen_port, "proxy published");
        Ok(handle)
    }

    /// Bind mounts need an absolute source path.
    fn write_document(&self, document: &str) -> Result<PathBuf, ProxyError> {
        let write_err = |source| ProxyError::WriteFailed {
            path: self.section.config_path.clone(),
            source,
        };
        let path = std::path::absolute(&self.section.config_path).map_err(write_err)?;
        atomic_write(&path, document.as_bytes()).map_err(write_err)?;
        debug!(path = %path.display(), bytes = document.len(), "proxy config written");
        Ok(path)
    }
}

/// Host the proxy forwards to: the configured value, or the gateway address
/// of the running CI server container.
pub async fn resolve_upstream_host(
    runtime: &dyn ContainerRuntime,
    section: &ProxySection,
    server_image: &str,
) -> Result<String, ProxyError> {
    if let Some(host) = &section.upstream_host {
        return Ok(host.clone());
    }
    let unknown = || ProxyError::UpstreamUnknown {
        image: server_image.to_string(),
    };
    let servers = runtime.list(&ContainerFilter::by_image(server_image)).await?;
    let server = servers.first().ok_or_else(unknown)?;
    let address = runtime.inspect(&server.handle).await?;
    let gateway = address.gateway.ok_or_else(unknown)?;
    debug!(gateway = %gateway, server = %server.handle, "upstream host from CI server gateway");
    Ok(gateway)
}
