//! ControllerRegistry - Remote Controller Inventory
//!
//! ## Responsibilities
//!
//! - Ordered list of remote controllers and their capability roles
//! - "Active controller for role" resolution with pins and fallback
//! - Persistence of the list and pins across restarts
//!
//! `ControllerStore` is the shared, persisted entry point; every mutation is
//! written through to the repository before it returns.

mod registry;
mod repository;
mod types;

pub use registry::ControllerRegistry;
pub use repository::ControllerRepository;
pub use types::*;

use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// ControllerStore instance
pub struct ControllerStore {
    registry: RwLock<ControllerRegistry>,
    repository: Option<ControllerRepository>,
}

impl ControllerStore {
    /// Load from the repository
    pub async fn load(repository: ControllerRepository, known_roles: BTreeSet<Role>) -> Result<Self> {
        let snapshot = repository.load().await?;
        let registry = ControllerRegistry::from_snapshot(snapshot, known_roles);
        tracing::info!(
            controllers = registry.list().len(),
            path = %repository.path().display(),
            "Controller registry loaded"
        );
        Ok(Self {
            registry: RwLock::new(registry),
            repository: Some(repository),
        })
    }

    /// Unpersisted store
    pub fn in_memory(registry: ControllerRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
            repository: None,
        }
    }

    async fn persist(&self, registry: &ControllerRegistry) -> Result<()> {
        if let Some(repository) = &self.repository {
            repository.save(&registry.snapshot()).await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<ControllerEndpoint> {
        self.registry.read().await.list().to_vec()
    }

    pub async fn get(&self, id: &ControllerId) -> Option<ControllerEndpoint> {
        self.registry.read().await.get(id).cloned()
    }

    pub async fn resolve(&self, role: &Role) -> Option<ControllerEndpoint> {
        self.registry.read().await.resolve(role).cloned()
    }

    pub async fn resolved(&self) -> BTreeMap<Role, Option<ControllerId>> {
        self.registry.read().await.resolved()
    }

    pub async fn with_role(&self, role: &Role) -> Vec<ControllerEndpoint> {
        self.registry.read().await.with_role(role).cloned().collect()
    }

    pub async fn add(&self, request: NewController) -> Result<ControllerEndpoint> {
        let mut registry = self.registry.write().await;
        let endpoint = registry.add(request)?;
        self.persist(&registry).await?;
        Ok(endpoint)
    }

    pub async fn update(&self, id: &ControllerId, patch: ControllerPatch) -> Result<ControllerEndpoint> {
        let mut registry = self.registry.write().await;
        let endpoint = registry.update(id, patch)?;
        self.persist(&registry).await?;
        Ok(endpoint)
    }

    pub async fn remove(&self, id: &ControllerId) -> Result<BTreeMap<Role, Option<ControllerId>>> {
        let mut registry = self.registry.write().await;
        let resolved = registry.remove(id)?;
        self.persist(&registry).await?;
        Ok(resolved)
    }

    pub async fn set_active(&self, role: &Role, id: &ControllerId) -> Result<()> {
        let mut registry = self.registry.write().await;
        registry.set_active(role, id)?;
        self.persist(&registry).await
    }

    pub async fn clear_pin(&self, role: &Role) -> Result<bool> {
        let mut registry = self.registry.write().await;
        let cleared = registry.clear_pin(role);
        if cleared {
            self.persist(&registry).await?;
        }
        Ok(cleared)
    }
}
