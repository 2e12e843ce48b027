//! Port allocation ledger.
//!
//! The ledger maps `(pipeline, branch)` to a port and carries a monotonic
//! `next_port` counter. It is the single source of truth for two guarantees:
//! no two entries share a port, and an assigned port never changes.
//!
//! ## Concurrency
//!
//! [`Ledger::allocate`] is a read-modify-write on `next_port` and is only
//! safe for a single writer. The reconciler runs it sequentially and holds
//! the process-external run lock from [`store::LedgerStore::lock`] for the
//! whole run. Anything that calls `allocate` from more than one task must
//! serialize those calls behind a lock of its own.
//!
//! ## Durable shape
//!
//! ```json
//! {"next_port": 9002, "svc_main": {"port_map": {"main": 9000}}}
//! ```
//!
//! Older records may carry top-level scalars next to the pipeline records.
//! Those load as [`LedgerEntry::Legacy`] and are ignored by route
//! aggregation; new data is never written in that shape.

pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::LedgerError;

pub use store::{LedgerStore, RunLock};

/// Port-to-branch assignments for one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub port_map: BTreeMap<String, u16>,
}

/// A top-level ledger value: a pipeline record, or a legacy value kept
/// verbatim so it survives a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LedgerEntry {
    Record(PipelineRecord),
    Legacy(serde_json::Value),
}

impl LedgerEntry {
    pub fn as_record(&self) -> Option<&PipelineRecord> {
        match self {
            LedgerEntry::Record(record) => Some(record),
            LedgerEntry::Legacy(_) => None,
        }
    }
}

/// Outcome of [`Ledger::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub port: u16,
    /// `true` when the port was assigned by this call.
    pub fresh: bool,
}

/// One reverse-proxy route derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyRoute {
    pub branch: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub next_port: u16,
    #[serde(flatten)]
    pub pipelines: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    /// An empty ledger whose first allocation will be `base_port`.
    pub fn new(base_port: u16) -> Self {
        Self {
            next_port: base_port,
            pipelines: BTreeMap::new(),
        }
    }

    /// Return the port for `(pipeline, branch)`, assigning `next_port` if the
    /// pair has none yet. Existing assignments are returned unchanged and do
    /// not touch the counter.
    pub fn allocate(&mut self, pipeline: &str, branch: &str) -> Result<Allocation, LedgerError> {
        if let Some(port) = self.port_of(pipeline, branch) {
            return Ok(Allocation { port, fresh: false });
        }

        let port = self.next_port;
        let next = port
            .checked_add(1)
            .ok_or(LedgerError::PortsExhausted { next_port: port })?;

        let entry = self
            .pipelines
            .entry(pipeline.to_string())
            .or_insert_with(|| LedgerEntry::Record(PipelineRecord::default()));
        if let LedgerEntry::Legacy(value) = entry {
            tracing::warn!(
                pipeline,
                legacy = %value,
                "replacing legacy ledger value with a pipeline record"
            );
            *entry = LedgerEntry::Record(PipelineRecord::default());
        }
        if let LedgerEntry::Record(record) = entry {
            record.port_map.insert(branch.to_string(), port);
        }

        self.next_port = next;
        Ok(Allocation { port, fresh: true })
    }

    pub fn port_of(&self, pipeline: &str, branch: &str) -> Option<u16> {
        self.pipelines
            .get(pipeline)
            .and_then(LedgerEntry::as_record)
            .and_then(|record| record.port_map.get(branch).copied())
    }

    /// Every `(pipeline, branch, port)` assignment, legacy values skipped.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &str, u16)> {
        self.pipelines.iter().flat_map(|(name, entry)| {
            entry.as_record().into_iter().flat_map(move |record| {
                record
                    .port_map
                    .iter()
                    .map(move |(branch, port)| (name.as_str(), branch.as_str(), *port))
            })
        })
    }

    /// Aggregate proxy routes across all pipeline records, sorted by branch.
    ///
    /// Routes are keyed by branch. If two pipelines carry the same branch the
    /// pipeline whose name sorts last wins, matching how the routing table
    /// has always been built.
    pub fn routes(&self) -> Vec<ProxyRoute> {
        let mut by_branch: BTreeMap<&str, u16> = BTreeMap::new();
        for (pipeline, branch, port) in self.assignments() {
            if let Some(previous) = by_branch.insert(branch, port)
                && previous != port
            {
                tracing::debug!(
                    pipeline,
                    branch,
                    shadowed_port = previous,
                    port,
                    "branch routed by more than one pipeline"
                );
            }
        }
        by_branch
            .into_iter()
            .map(|(branch, port)| ProxyRoute {
                branch: branch.to_string(),
                port,
            })
            .collect()
    }

    /// Check global port uniqueness and that every port is below `next_port`.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut seen: HashMap<u16, (&str, &str)> = HashMap::new();
        for (pipeline, branch, port) in self.assignments() {
            if let Some((other_pipeline, other_branch)) = seen.insert(port, (pipeline, branch)) {
                return Err(LedgerError::Inconsistent(format!(
                    "port {} assigned to both {}/{} and {}/{}",
                    port, other_pipeline, other_branch, pipeline, branch
                )));
            }
            if port >= self.next_port {
                return Err(LedgerError::Inconsistent(format!(
                    "port {} of {}/{} is not below next_port {}",
                    port, pipeline, branch, self.next_port
                )));
            }
        }
        Ok(())
    }
}
