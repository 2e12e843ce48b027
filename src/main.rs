use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "branchyard")]
#[command(version, about = "Per-branch CI pipelines, ports and proxy routes")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Path to branchyard.toml. Defaults to ./branchyard.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a pipeline, port and proxy route for every remote branch
    Reconcile {
        /// Build script template; $BRANCH and $PORT are substituted per branch
        #[arg(long)]
        job: PathBuf,

        /// Repository whose branches are provisioned
        #[arg(long)]
        git_url: String,

        /// CI server host, with or without scheme
        #[arg(long, env = "BRANCHYARD_CI_HOST")]
        ci_host: Option<String>,

        /// Pipelines are named <prefix>_<branch>
        #[arg(long)]
        pipeline_prefix: Option<String>,

        /// Ledger file path
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Do not start the CI server and agent containers
        #[arg(long)]
        skip_bootstrap: bool,

        /// Do not regenerate or republish the proxy
        #[arg(long)]
        skip_proxy: bool,

        /// Update pipelines against an already running CI server
        #[arg(long)]
        update: bool,
    },
    /// Inspect the port ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Work with the reverse-proxy document
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum LedgerCommands {
    /// Print every pipeline/branch/port assignment
    Show {
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Print the raw ledger as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProxyCommands {
    /// Print the proxy document for the current ledger without publishing it
    Render {
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Host the routes forward to
        #[arg(long)]
        upstream_host: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default branchyard.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose {
        "branchyard=debug"
    } else {
        "branchyard=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Reconcile {
            job,
            git_url,
            ci_host,
            pipeline_prefix,
            state_file,
            skip_bootstrap,
            skip_proxy,
            update,
        } => {
            let args = cmd::ReconcileArgs {
                job: job.clone(),
                git_url: git_url.clone(),
                ci_host: ci_host.clone(),
                pipeline_prefix: pipeline_prefix.clone(),
                state_file: state_file.clone(),
                skip_bootstrap: *skip_bootstrap || *update,
                skip_proxy: *skip_proxy,
            };
            cmd::cmd_reconcile(&project_dir, cli.config.as_deref(), args).await?;
        }
        Commands::Ledger { command } => {
            cmd::cmd_ledger(&project_dir, cli.config.as_deref(), command.clone())?
        }
        Commands::Proxy { command } => {
            cmd::cmd_proxy(&project_dir, cli.config.as_deref(), command.clone()).await?
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
