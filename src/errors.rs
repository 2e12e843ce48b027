//! Typed error hierarchy for branchyard.
//!
//! Each subsystem owns one enum; `ReconcileError` is the driver's fatal error
//! and only wraps the failures that abort a whole run:
//! - `LedgerError`: ledger load/persist, run lock, port exhaustion
//! - `DiscoveryError`: remote branch enumeration
//! - `ProvisionError`: per-branch pipeline submission (never fatal to a run)
//! - `ProxyError`: proxy document publication
//! - `RuntimeError` and `BootstrapError`: container runtime and CI bring-up

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the port allocation ledger and its durable record.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ledger at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write ledger at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize ledger: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("Another reconciliation run holds the lock at {path}")]
    Locked { path: PathBuf },

    #[error("Failed to acquire run lock at {path}: {source}")]
    LockFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Port space exhausted: next_port {next_port} cannot be advanced")]
    PortsExhausted { next_port: u16 },

    #[error("Ledger is inconsistent: {0}")]
    Inconsistent(String),
}

/// Errors from enumerating the branches of a remote repository.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to list branches of {url}: {source}")]
    Remote {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Repository {url} has no branches")]
    NoBranches { url: String },

    #[error("Branch discovery task failed: {0}")]
    TaskFailed(String),
}

/// An external collaborator never became ready within the polling budget.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("{what} not ready after {attempts} attempts (last: {last})")]
    NotReady {
        what: String,
        attempts: u32,
        last: String,
    },
}

/// Errors reported by a CI control plane client.
#[derive(Debug, Error)]
pub enum CiError {
    /// No usable answer yet: transport failure or a gateway status while booting.
    #[error("CI control plane unreachable: {0}")]
    Unreachable(String),

    #[error("CI control plane rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected CI control plane response: {0}")]
    Protocol(String),

    #[error("Failed to build CI HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Per-branch provisioning failures. Isolated to the branch that raised them.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Script produced no commands for pipeline {pipeline}")]
    EmptyTaskList { pipeline: String },

    #[error(transparent)]
    Ci(#[from] CiError),

    #[error(transparent)]
    NotReady(#[from] ReadinessError),
}

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Image build for {tag} failed: {message}")]
    ImageBuild { tag: String, message: String },

    #[error("Failed to invoke image builder: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from publishing the reverse-proxy configuration.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to write proxy config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No upstream host configured and no running container from image {image}")]
    UpstreamUnknown { image: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors from bringing up the CI server and agent containers.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Failed to resolve CI agent data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    NotReady(#[from] ReadinessError),
}

/// Failures that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_error_write_failed_carries_path() {
        let path = PathBuf::from("/var/lib/branchyard/ledger.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err = LedgerError::WriteFailed {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            LedgerError::WriteFailed { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected WriteFailed"),
        }
        assert!(err.to_string().contains("ledger.json"));
    }

    #[test]
    fn provision_error_converts_from_ci_error() {
        let inner = CiError::Rejected {
            operation: "create".into(),
            status: 422,
            body: "invalid material".into(),
        };
        let err: ProvisionError = inner.into();
        match &err {
            ProvisionError::Ci(CiError::Rejected { status, .. }) => assert_eq!(*status, 422),
            _ => panic!("Expected ProvisionError::Ci(Rejected)"),
        }
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn readiness_error_names_the_collaborator() {
        let err = ReadinessError::NotReady {
            what: "CI control plane".into(),
            attempts: 3,
            last: "connection refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("CI control plane"));
        assert!(text.contains("3 attempts"));
    }

    #[test]
    fn reconcile_error_wraps_discovery() {
        let err: ReconcileError = DiscoveryError::NoBranches {
            url: "git@example.com:svc.git".into(),
        }
        .into();
        assert!(matches!(
            err,
            ReconcileError::Discovery(DiscoveryError::NoBranches { .. })
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LedgerError::Inconsistent("dup".into()));
        assert_std_error(&CiError::Unreachable("refused".into()));
        assert_std_error(&ProvisionError::EmptyTaskList {
            pipeline: "svc_main".into(),
        });
        assert_std_error(&ProxyError::UpstreamUnknown {
            image: "gocd/gocd-server".into(),
        });
    }
}
