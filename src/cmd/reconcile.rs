//! `branchyard reconcile`.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use branchyard::config::Overrides;
use branchyard::discovery::GitRemote;
use branchyard::pipeline::GoCdClient;
use branchyard::reconcile::{Reconciler, RunOptions};
use branchyard::runtime::DockerRuntime;

use super::load_config;

pub struct ReconcileArgs {
    pub job: PathBuf,
    pub git_url: String,
    pub ci_host: Option<String>,
    pub pipeline_prefix: Option<String>,
    pub state_file: Option<PathBuf>,
    pub skip_bootstrap: bool,
    pub skip_proxy: bool,
}

pub async fn cmd_reconcile(
    project_dir: &Path,
    config_path: Option<&Path>,
    args: ReconcileArgs,
) -> Result<()> {
    let script = std::fs::read_to_string(&args.job)
        .with_context(|| format!("Failed to read job script: {}", args.job.display()))?;
    let config = load_config(
        project_dir,
        config_path,
        Overrides {
            ci_host: args.ci_host,
            pipeline_prefix: args.pipeline_prefix,
            ledger_path: args.state_file,
            upstream_host: None,
        },
    )?;

    let runtime = DockerRuntime::connect().context("Failed to connect to the Docker daemon")?;
    let ci = GoCdClient::new(&config.ci).context("Failed to set up the CI client")?;
    let branches = GitRemote::new();
    let options = RunOptions {
        skip_bootstrap: args.skip_bootstrap,
        skip_proxy: args.skip_proxy,
    };

    let report = Reconciler::new(&config, &branches, &ci, &runtime)
        .run(&script, &args.git_url, &options)
        .await
        .context("Reconciliation aborted")?;

    println!("{}", report.summary());
    for failure in &report.failed {
        println!("  failed {} ({}): {}", failure.branch, failure.pipeline, failure.reason);
    }
    if !report.is_success() {
        bail!(
            "{} branch(es) failed; ledger saved to {}",
            report.failed.len(),
            config.ledger.path.display()
        );
    }
    Ok(())
}
