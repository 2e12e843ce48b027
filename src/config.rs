//! Configuration for branchyard.
//!
//! Settings are layered: built-in defaults, then an optional
//! `branchyard.toml`, then environment and CLI flags (applied by the
//! command layer through [`Overrides`]). The resulting [`YardConfig`] is
//! passed explicitly into the reconciler; nothing reads ambient state.
//!
//! # Configuration File Format
//!
//! ```toml
//! [ci]
//! host = "localhost:8153"
//! pipeline_group = "defaultGroup"
//! stage = "deploy"
//! job = "build"
//! request_timeout_secs = 30
//!
//! [ci.readiness]
//! max_attempts = 300
//! interval_ms = 1000
//!
//! [pipeline]
//! prefix = "http_service"
//!
//! [ledger]
//! path = ".build_server_state.json"
//! base_port = 9000
//!
//! [proxy]
//! config_path = "nginx.conf"
//! container_name = "branchyard_nginx"
//! image = "nginx:latest"
//! listen_port = 80
//! # upstream_host = "172.17.0.1"
//!
//! [bootstrap]
//! server_image = "gocd/gocd-server:v20.1.0"
//! agent_image = "gocd-agent"
//! agent_dockerfile = "go_agent.dockerfile"
//! agent_context = "."
//! godata_dir = "godata"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::readiness::ReadinessPolicy;

pub const CONFIG_FILE_NAME: &str = "branchyard.toml";

/// CI control plane settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiSection {
    /// Host of the CI server, with or without scheme.
    #[serde(default = "default_ci_host")]
    pub host: String,
    #[serde(default = "default_pipeline_group")]
    pub pipeline_group: String,
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default = "default_job")]
    pub job: String,
    /// Upper bound on a single API request, connect through response body.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub readiness: ReadinessPolicy,
}

fn default_ci_host() -> String {
    "localhost:8153".to_string()
}

fn default_pipeline_group() -> String {
    "defaultGroup".to_string()
}

fn default_stage() -> String {
    "deploy".to_string()
}

fn default_job() -> String {
    "build".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            host: default_ci_host(),
            pipeline_group: default_pipeline_group(),
            stage: default_stage(),
            job: default_job(),
            request_timeout_secs: default_request_timeout_secs(),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl CiSection {
    /// Base URL of the CI server. Hosts without a scheme get `http://`.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("https://") || host.starts_with("http://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Pipelines are named `{prefix}_{branch}`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "http_service".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl PipelineSection {
    pub fn pipeline_name(&self, branch: &str) -> String {
        format!("{}_{}", self.prefix, branch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".build_server_state.json")
}

fn default_base_port() -> u16 {
    9000
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            base_port: default_base_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_proxy_config_path")]
    pub config_path: PathBuf,
    #[serde(default = "default_proxy_container")]
    pub container_name: String,
    #[serde(default = "default_proxy_image")]
    pub image: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Host the proxy forwards to. When unset, the gateway of the running
    /// CI server container is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_host: Option<String>,
}

fn default_proxy_config_path() -> PathBuf {
    PathBuf::from("nginx.conf")
}

fn default_proxy_container() -> String {
    "branchyard_nginx".to_string()
}

fn default_proxy_image() -> String {
    "nginx:latest".to_string()
}

fn default_listen_port() -> u16 {
    80
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            config_path: default_proxy_config_path(),
            container_name: default_proxy_container(),
            image: default_proxy_image(),
            listen_port: default_listen_port(),
            upstream_host: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSection {
    #[serde(default = "default_server_image")]
    pub server_image: String,
    #[serde(default = "default_agent_image")]
    pub agent_image: String,
    #[serde(default = "default_agent_dockerfile")]
    pub agent_dockerfile: String,
    #[serde(default = "default_agent_context")]
    pub agent_context: PathBuf,
    #[serde(default = "default_godata_dir")]
    pub godata_dir: PathBuf,
}

fn default_server_image() -> String {
    "gocd/gocd-server:v20.1.0".to_string()
}

fn default_agent_image() -> String {
    "gocd-agent".to_string()
}

fn default_agent_dockerfile() -> String {
    "go_agent.dockerfile".to_string()
}

fn default_agent_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_godata_dir() -> PathBuf {
    PathBuf::from("godata")
}

impl Default for BootstrapSection {
    fn default() -> Self {
        Self {
            server_image: default_server_image(),
            agent_image: default_agent_image(),
            agent_dockerfile: default_agent_dockerfile(),
            agent_context: default_agent_context(),
            godata_dir: default_godata_dir(),
        }
    }
}

impl BootstrapSection {
    /// Image name without its tag, used to find the running server.
    pub fn server_image_name(&self) -> &str {
        match self.server_image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => name,
            _ => &self.server_image,
        }
    }
}

/// Complete branchyard configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YardConfig {
    #[serde(default)]
    pub ci: CiSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub bootstrap: BootstrapSection,
}

/// Values supplied on the command line or via the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ci_host: Option<String>,
    pub pipeline_prefix: Option<String>,
    pub ledger_path: Option<PathBuf>,
    pub upstream_host: Option<String>,
}

impl YardConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse branchyard configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load an explicit config file, or `branchyard.toml` in `dir` if it
    /// exists, or fall back to defaults.
    pub fn load_or_default(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Apply CLI/environment values on top of file values.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.ci_host {
            self.ci.host = host;
        }
        if let Some(prefix) = overrides.pipeline_prefix {
            self.pipeline.prefix = prefix;
        }
        if let Some(path) = overrides.ledger_path {
            self.ledger.path = path;
        }
        if let Some(upstream) = overrides.upstream_host {
            self.proxy.upstream_host = Some(upstream);
        }
    }

    /// Return human-readable warnings about suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ledger.base_port < 1024 {
            warnings.push(format!(
                "ledger.base_port {} is in the privileged range",
                self.ledger.base_port
            ));
        }
        if self.pipeline.prefix.is_empty() {
            warnings.push("pipeline.prefix is empty; pipelines will be named '_<branch>'".into());
        }
        if self.ci.readiness.max_attempts == 0 {
            warnings.push("ci.readiness.max_attempts is 0; a single probe will be made".into());
        }
        if self.ci.request_timeout_secs == 0 {
            warnings.push("ci.request_timeout_secs is 0; every CI request will time out".into());
        }
        if self.proxy.listen_port == 0 {
            warnings.push("proxy.listen_port is 0".into());
        }
        warnings
    }
}
