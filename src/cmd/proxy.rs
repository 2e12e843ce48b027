//! `branchyard proxy`.

use anyhow::{Context, Result};
use std::path::Path;

use branchyard::config::Overrides;
use branchyard::ledger::LedgerStore;
use branchyard::proxy::{render, resolve_upstream_host};
use branchyard::runtime::DockerRuntime;

use super::super::ProxyCommands;
use super::load_config;

pub async fn cmd_proxy(
    project_dir: &Path,
    config_path: Option<&Path>,
    command: ProxyCommands,
) -> Result<()> {
    match command {
        ProxyCommands::Render {
            state_file,
            upstream_host,
        } => {
            let config = load_config(
                project_dir,
                config_path,
                Overrides {
                    ledger_path: state_file,
                    upstream_host,
                    ..Default::default()
                },
            )?;
            let ledger = LedgerStore::new(&config.ledger.path, config.ledger.base_port).load()?;

            let host = match &config.proxy.upstream_host {
                Some(host) => host.clone(),
                None => {
                    let runtime = DockerRuntime::connect()
                        .context("Failed to connect to the Docker daemon")?;
                    resolve_upstream_host(
                        &runtime,
                        &config.proxy,
                        config.bootstrap.server_image_name(),
                    )
                    .await
                    .context("Pass --upstream-host or set proxy.upstream_host")?
                }
            };
            print!("{}", render(&ledger.routes(), &host));
        }
    }
    Ok(())
}
