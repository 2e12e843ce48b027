//! Branch discovery against a remote repository.
//!
//! Discovery is a pure read: it lists the remote's advertised refs without
//! cloning, fetching or writing anything locally.

use async_trait::async_trait;
use git2::{Cred, CredentialType, Direction, Remote, RemoteCallbacks};

use crate::errors::DiscoveryError;

const HEADS_PREFIX: &str = "refs/heads/";

/// Source of the current branch set of a repository.
#[async_trait]
pub trait BranchSource: Send + Sync {
    /// Branch names currently on the remote, remote prefix stripped, sorted.
    async fn list_branches(&self, url: &str) -> Result<Vec<String>, DiscoveryError>;
}

/// `ls-remote` style discovery via libgit2.
#[derive(Debug, Clone, Default)]
pub struct GitRemote;

impl GitRemote {
    pub fn new() -> Self {
        Self
    }

    fn list_blocking(url: &str) -> Result<Vec<String>, DiscoveryError> {
        let remote_err = |source| DiscoveryError::Remote {
            url: url.to_string(),
            source,
        };

        let mut remote = Remote::create_detached(url).map_err(remote_err)?;
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = CredentialAttempts::default();
        callbacks.credentials(move |_url, username, allowed| {
            let username = username.unwrap_or("git");
            match attempts.next(allowed)? {
                CredentialKind::Username => Cred::username(username),
                CredentialKind::SshAgent => Cred::ssh_key_from_agent(username),
                CredentialKind::Default => Cred::default(),
            }
        });

        let connection = remote
            .connect_auth(Direction::Fetch, Some(callbacks), None)
            .map_err(remote_err)?;
        let ref_names: Vec<String> = connection
            .list()
            .map_err(remote_err)?
            .iter()
            .map(|head| head.name().to_string())
            .collect();

        let branches = branch_names(ref_names.iter().map(String::as_str));
        if branches.is_empty() {
            return Err(DiscoveryError::NoBranches {
                url: url.to_string(),
            });
        }
        Ok(branches)
    }
}

#[async_trait]
impl BranchSource for GitRemote {
    async fn list_branches(&self, url: &str) -> Result<Vec<String>, DiscoveryError> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || Self::list_blocking(&url))
            .await
            .map_err(|e| DiscoveryError::TaskFailed(e.to_string()))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialKind {
    Username,
    SshAgent,
    Default,
}

/// libgit2 asks again every time the server turns a credential down. Each
/// kind is handed out once, so a rejected key fails discovery instead of
/// retrying forever.
#[derive(Debug, Default)]
struct CredentialAttempts {
    username: bool,
    ssh_agent: bool,
    default: bool,
}

impl CredentialAttempts {
    fn next(&mut self, allowed: CredentialType) -> Result<CredentialKind, git2::Error> {
        if allowed.contains(CredentialType::USERNAME) && !self.username {
            self.username = true;
            return Ok(CredentialKind::Username);
        }
        if allowed.contains(CredentialType::SSH_KEY) && !self.ssh_agent {
            self.ssh_agent = true;
            return Ok(CredentialKind::SshAgent);
        }
        if allowed.contains(CredentialType::DEFAULT) && !self.default {
            self.default = true;
            return Ok(CredentialKind::Default);
        }
        if self.username || self.ssh_agent || self.default {
            Err(git2::Error::from_str("remote rejected every available credential"))
        } else {
            Err(git2::Error::from_str("no supported credential type"))
        }
    }
}

/// Reduce advertised ref names to sorted, de-duplicated branch names.
///
/// Only `refs/heads/*` count; the symbolic `HEAD` and tags are dropped.
pub fn branch_names<'a>(refs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut branches: Vec<String> = refs
        .into_iter()
        .filter_map(|name| name.strip_prefix(HEADS_PREFIX))
        .filter(|name| !name.is_empty() && *name != "HEAD")
        .map(str::to_string)
        .collect();
    branches.sort();
    branches.dedup();
    branches
}
