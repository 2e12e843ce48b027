//! Reconciliation driver.
//!
//! One pass, strictly sequential:
//!
//! ```text
//! LOCK -> LOAD_LEDGER -> [BOOTSTRAP] -> DISCOVER_BRANCHES
//!      -> (ALLOCATE -> BUILD_PIPELINE)* -> PERSIST_LEDGER -> [PUBLISH_PROXY]
//! ```
//!
//! Discovery failure aborts before the ledger is touched. A failing branch is
//! recorded and the loop moves on. Once the CI control plane has stayed
//! unreachable for a whole readiness budget, the remaining branches still get
//! their ports but are failed without another wait. The ledger is persisted
//! once, before the proxy is published, so a proxy failure never loses port
//! allocations.

pub mod report;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::bootstrap::Bootstrap;
use crate::config::YardConfig;
use crate::discovery::BranchSource;
use crate::errors::{ProvisionError, ProxyError, ReconcileError};
use crate::ledger::{Ledger, LedgerStore};
use crate::pipeline::{CiControlPlane, PipelineBuilder};
use crate::proxy::{self, ProxyPublisher, resolve_upstream_host};
use crate::runtime::ContainerRuntime;

pub use report::{BranchFailure, ProvisionedBranch, ProxyOutcome, RunReport};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub skip_bootstrap: bool,
    pub skip_proxy: bool,
}

pub struct Reconciler<'a> {
    config: &'a YardConfig,
    branches: &'a dyn BranchSource,
    ci: &'a dyn CiControlPlane,
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        config: &'a YardConfig,
        branches: &'a dyn BranchSource,
        ci: &'a dyn CiControlPlane,
        runtime: &'a dyn ContainerRuntime,
    ) -> Self {
        Self {
            config,
            branches,
            ci,
            runtime,
        }
    }

    /// Reconcile pipelines, ports and proxy routes for every branch of
    /// `git_url` using the build `script` template.
    pub async fn run(
        &self,
        script: &str,
        git_url: &str,
        options: &RunOptions,
    ) -> Result<RunReport, ReconcileError> {
        let started_at = Utc::now();
        let store = LedgerStore::new(&self.config.ledger.path, self.config.ledger.base_port);
        let _lock = store.lock()?;
        let mut ledger = store.load()?;
        let initial_next_port = ledger.next_port;

        if options.skip_bootstrap {
            debug!("skipping CI bootstrap");
        } else {
            Bootstrap::new(self.runtime, &self.config.bootstrap, self.config.ci.readiness)
                .run()
                .await?;
        }

        let branches = self.branches.list_branches(git_url).await?;
        info!(count = branches.len(), git_url, "discovered branches");

        let builder = PipelineBuilder::new(self.ci, self.config.ci.readiness);
        let mut provisioned = Vec::new();
        let mut failed = Vec::new();
        let mut ci_down: Option<String> = None;
        for branch in &branches {
            let pipeline = self.config.pipeline.pipeline_name(branch);
            let allocation = match ledger.allocate(&pipeline, branch) {
                Ok(allocation) => allocation,
                Err(e) => {
                    error!(branch = %branch, pipeline = %pipeline, error = %e, "port allocation failed");
                    failed.push(BranchFailure {
                        branch: branch.clone(),
                        pipeline,
                        port: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            info!(
                branch = %branch,
                pipeline = %pipeline,
                port = allocation.port,
                fresh = allocation.fresh,
                "provisioning branch"
            );

            if let Some(reason) = &ci_down {
                debug!(branch = %branch, pipeline = %pipeline, "CI control plane down; not submitting");
                failed.push(BranchFailure {
                    branch: branch.clone(),
                    pipeline,
                    port: Some(allocation.port),
                    reason: format!("not submitted: {}", reason),
                });
                continue;
            }

            match builder
                .provision(script, branch, allocation.port, &pipeline, git_url)
                .await
            {
                Ok(_) => provisioned.push(ProvisionedBranch {
                    branch: branch.clone(),
                    pipeline,
                    port: allocation.port,
                    fresh: allocation.fresh,
                }),
                Err(e) => {
                    warn!(branch = %branch, pipeline = %pipeline, error = %e, "branch provisioning failed");
                    if let ProvisionError::NotReady(not_ready) = &e {
                        ci_down = Some(not_ready.to_string());
                    }
                    failed.push(BranchFailure {
                        branch: branch.clone(),
                        pipeline,
                        port: Some(allocation.port),
                        reason: e.to_string(),
                    });
                }
            }
        }

        store.save(&ledger)?;
        debug!(
            path = %store.path().display(),
            state = %serde_json::to_string(&ledger).unwrap_or_default(),
            "ledger persisted"
        );

        let proxy = if options.skip_proxy {
            debug!("skipping proxy publication");
            ProxyOutcome::Skipped
        } else {
            match self.publish_proxy(&ledger).await {
                Ok(routes) => ProxyOutcome::Published { routes },
                Err(e) => {
                    error!(error = %e, "proxy publication failed; ledger is saved");
                    ProxyOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        info!(
            "Manually enable the CI agent at {}/go/agents",
            self.config.ci.base_url()
        );

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            provisioned,
            failed,
            newly_allocated: usize::from(ledger.next_port - initial_next_port),
            next_port: ledger.next_port,
            proxy,
        })
    }

    async fn publish_proxy(&self, ledger: &Ledger) -> Result<usize, ProxyError> {
        let upstream = resolve_upstream_host(
            self.runtime,
            &self.config.proxy,
            self.config.bootstrap.server_image_name(),
        )
        .await?;
        let routes = ledger.routes();
        let document = proxy::render(&routes, &upstream);
        ProxyPublisher::new(self.runtime, &self.config.proxy)
            .publish(&document)
            .await?;
        Ok(routes.len())
    }
}
