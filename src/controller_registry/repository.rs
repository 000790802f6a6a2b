//! ControllerRegistry persistence (JSON file)

use super::types::RegistrySnapshot;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Loads and saves the controller list + role pins
#[derive(Debug, Clone)]
pub struct ControllerRepository {
    path: PathBuf,
}

impl ControllerRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; a missing file is an empty registry
    pub async fn load(&self) -> Result<RegistrySnapshot> {
        match fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No controller file, starting empty");
                Ok(RegistrySnapshot::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save via temp file + rename
    pub async fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            controllers = snapshot.controllers.len(),
            "Controller registry saved"
        );
        Ok(())
    }
}
