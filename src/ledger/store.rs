//! Durable ledger record and the run-level lock.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use super::Ledger;
use crate::errors::LedgerError;

pub struct LedgerStore {
    path: PathBuf,
    base_port: u16,
}

/// Exclusive advisory lock held for the duration of a run. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>, base_port: u16) -> Self {
        Self {
            path: path.into(),
            base_port,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock file guarding this ledger: `<ledger>.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Take the run lock without blocking. A second concurrent run gets
    /// `LedgerError::Locked`.
    pub fn lock(&self) -> Result<RunLock, LedgerError> {
        let path = self.lock_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| LedgerError::LockFailed {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LedgerError::LockFailed {
                path: path.clone(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(RunLock { file, path }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                Err(LedgerError::Locked { path })
            }
            Err(source) => Err(LedgerError::LockFailed { path, source }),
        }
    }

    /// Load the ledger. A missing record yields an empty ledger at the base
    /// port; a present one must parse and satisfy [`Ledger::validate`].
    pub fn load(&self) -> Result<Ledger, LedgerError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), base_port = self.base_port, "no ledger on disk, starting empty");
            return Ok(Ledger::new(self.base_port));
        }

        let content = fs::read_to_string(&self.path).map_err(|source| LedgerError::ReadFailed {
            path: self.path.clone(),
            source,
        })?;
        let ledger: Ledger =
            serde_json::from_str(&content).map_err(|source| LedgerError::ParseFailed {
                path: self.path.clone(),
                source,
            })?;
        ledger.validate()?;
        Ok(ledger)
    }

    /// Write the whole ledger, replacing the previous record atomically.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let bytes = serde_json::to_vec_pretty(ledger).map_err(LedgerError::SerializeFailed)?;
        atomic_write(&self.path, &bytes).map_err(|source| LedgerError::WriteFailed {
            path: self.path.clone(),
            source,
        })
    }
}

/// Write `bytes` to a sibling temp file, sync it, then rename over `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        use std::io::Write;
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
