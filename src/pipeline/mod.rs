//! Pipeline spec builder.
//!
//! A [`PipelineSpec`] is the declarative CI definition for one branch: its
//! source, tracked branch, `{BRANCH, PORT}` environment and the build-stage
//! task list rendered from the script template. [`PipelineBuilder`] submits
//! specs to a [`CiControlPlane`] with replace-not-merge upsert semantics.

pub mod gocd;

use async_trait::async_trait;

use crate::errors::{CiError, ProvisionError};
use crate::readiness::{Probe, ReadinessPolicy};
use crate::script::{Environment, render_commands};

pub use gocd::GoCdClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub name: String,
    pub git_url: String,
    pub branch: String,
    pub environment: Environment,
    /// One entry per exec task; each is `[command, args...]`.
    pub commands: Vec<Vec<String>>,
}

impl PipelineSpec {
    /// Render `script` for `branch`/`port` into a pipeline definition.
    pub fn build(
        script: &str,
        branch: &str,
        port: u16,
        name: &str,
        git_url: &str,
    ) -> Result<Self, ProvisionError> {
        let environment = Environment::for_branch(branch, port);
        let commands = render_commands(script, &environment);
        if commands.is_empty() {
            return Err(ProvisionError::EmptyTaskList {
                pipeline: name.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            git_url: git_url.to_string(),
            branch: branch.to_string(),
            environment,
            commands,
        })
    }
}

/// CI server control plane.
#[async_trait]
pub trait CiControlPlane: Send + Sync {
    /// Create the pipeline, or fully replace an existing one of the same name.
    ///
    /// Transport failures must be reported as `CiError::Unreachable`; any
    /// answer from a reachable server that is not success is `Rejected`.
    async fn upsert_pipeline(&self, spec: &PipelineSpec) -> Result<(), CiError>;
}

pub struct PipelineBuilder<'a> {
    ci: &'a dyn CiControlPlane,
    readiness: ReadinessPolicy,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(ci: &'a dyn CiControlPlane, readiness: ReadinessPolicy) -> Self {
        Self { ci, readiness }
    }

    /// Submit `spec`, waiting for the control plane while it is unreachable.
    pub async fn submit(&self, spec: &PipelineSpec) -> Result<(), ProvisionError> {
        tracing::info!(
            pipeline = %spec.name,
            branch = %spec.branch,
            git_url = %spec.git_url,
            "submitting pipeline"
        );
        for command in &spec.commands {
            tracing::debug!(pipeline = %spec.name, ?command, "task");
        }
        self.readiness
            .wait_for("CI control plane", || async move {
                match self.ci.upsert_pipeline(spec).await {
                    Ok(()) => Ok(Probe::Ready(())),
                    Err(CiError::Unreachable(reason)) => Ok(Probe::Pending(reason)),
                    Err(other) => Err(ProvisionError::from(other)),
                }
            })
            .await
    }

    /// Build and submit in one step.
    pub async fn provision(
        &self,
        script: &str,
        branch: &str,
        port: u16,
        name: &str,
        git_url: &str,
    ) -> Result<PipelineSpec, ProvisionError> {
        let spec = PipelineSpec::build(script, branch, port, name, git_url)?;
        self.submit(&spec).await?;
        Ok(spec)
    }
}
