//! Outcome of one reconciliation run.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedBranch {
    pub branch: String,
    pub pipeline: String,
    pub port: u16,
    /// Port was assigned during this run.
    pub fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchFailure {
    pub branch: String,
    pub pipeline: String,
    /// Set when a port was allocated before provisioning failed.
    pub port: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProxyOutcome {
    Skipped,
    Published { routes: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provisioned: Vec<ProvisionedBranch>,
    pub failed: Vec<BranchFailure>,
    /// Ports assigned during this run, failed branches included.
    pub newly_allocated: usize,
    pub next_port: u16,
    pub proxy: ProxyOutcome,
}

impl RunReport {
    /// Every branch provisioned and the proxy not failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !matches!(self.proxy, ProxyOutcome::Failed { .. })
    }

    pub fn summary(&self) -> String {
        let elapsed = self.finished_at - self.started_at;
        let proxy = match &self.proxy {
            ProxyOutcome::Skipped => "proxy skipped".to_string(),
            ProxyOutcome::Published { routes } => format!("proxy published ({} routes)", routes),
            ProxyOutcome::Failed { reason } => format!("proxy failed: {}", reason),
        };
        format!(
            "{} provisioned, {} failed, {} new ports, next port {}, {} in {:.1}s",
            self.provisioned.len(),
            self.failed.len(),
            self.newly_allocated,
            self.next_port,
            proxy,
            elapsed.num_milliseconds() as f64 / 1000.0
        )
    }
}
