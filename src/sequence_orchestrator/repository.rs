//! Sequence checkpoint persistence (JSON file)

use super::types::SequenceCheckpoint;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Persists the checkpoint of the run in flight
#[derive(Debug, Clone)]
pub struct CheckpointRepository {
    path: PathBuf,
}

impl CheckpointRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no run was in flight
    pub async fn load(&self) -> Result<Option<SequenceCheckpoint>> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, checkpoint: &SequenceCheckpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(checkpoint)?).await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "Sequence checkpoint saved");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
