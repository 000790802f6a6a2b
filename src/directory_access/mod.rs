//! DirectoryAccess - Save Location Access Control
//!
//! ## Responsibilities
//!
//! - Verify a save directory is usable before a capture run starts
//! - Hold the directory for the whole run (one writer per directory)
//! - Release on every exit path (the lease is released on Drop)

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// Opaque save-location access provider
#[async_trait]
pub trait DirectoryAccess: Send + Sync {
    /// Acquire the directory; fails with `ResourceUnavailable`
    async fn acquire(&self, path: &Path) -> Result<DirectoryLease>;
}

/// Directory access lease - released on Drop
pub struct DirectoryLease {
    path: PathBuf,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl DirectoryLease {
    /// Lease without exclusivity (for providers that need none)
    pub fn unguarded(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _guard: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the leased directory
    pub fn join(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "Directory access released");
    }
}

/// Plain filesystem implementation: existence, type and write permission
/// checks plus one lease per directory at a time
pub struct FsDirectoryAccess {
    /// Canonical directory -> lock
    locks: RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsDirectoryAccess {
    /// Create new FsDirectoryAccess
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(path) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn check_writable(path: &Path) -> Result<()> {
        let marker = path.join(format!(".obscam-write-check-{}", Uuid::new_v4()));
        tokio::fs::write(&marker, b"").await.map_err(|e| {
            Error::ResourceUnavailable(format!("{} is not writable: {}", path.display(), e))
        })?;
        if let Err(e) = tokio::fs::remove_file(&marker).await {
            tracing::warn!(marker = %marker.display(), error = %e, "Failed to remove write-check file");
        }
        Ok(())
    }
}

impl Default for FsDirectoryAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryAccess for FsDirectoryAccess {
    async fn acquire(&self, path: &Path) -> Result<DirectoryLease> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            Error::ResourceUnavailable(format!("{} is not accessible: {}", path.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(Error::ResourceUnavailable(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
            Error::ResourceUnavailable(format!("{} cannot be resolved: {}", path.display(), e))
        })?;

        let lock = self.get_or_create_lock(&canonical).await;
        let guard = lock.try_lock_owned().map_err(|_| {
            tracing::warn!(path = %canonical.display(), "Directory access denied - in use");
            Error::ResourceUnavailable(format!("{} is in use by another run", canonical.display()))
        })?;

        Self::check_writable(&canonical).await?;

        tracing::debug!(path = %canonical.display(), "Directory access acquired");
        Ok(DirectoryLease {
            path: canonical,
            _guard: Some(guard),
        })
    }
}
