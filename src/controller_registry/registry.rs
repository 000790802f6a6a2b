//! Controller list and role resolution
//!
//! Resolution for role R: the controller pinned for R if it still exists and
//! still declares R, else the first controller in list order declaring R,
//! else nothing.

use super::types::*;
use crate::camera_client::normalize_base_url;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// In-memory registry
#[derive(Debug, Clone)]
pub struct ControllerRegistry {
    controllers: Vec<ControllerEndpoint>,
    pins: BTreeMap<Role, ControllerId>,
    known_roles: BTreeSet<Role>,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new([Role::cameras()].into_iter().collect())
    }
}

impl ControllerRegistry {
    /// Empty registry with the given known roles
    pub fn new(known_roles: BTreeSet<Role>) -> Self {
        Self {
            controllers: Vec::new(),
            pins: BTreeMap::new(),
            known_roles,
        }
    }

    /// Rebuild from persisted state. Pins pointing at unknown controllers are dropped.
    pub fn from_snapshot(snapshot: RegistrySnapshot, known_roles: BTreeSet<Role>) -> Self {
        let mut registry = Self::new(known_roles);
        for controller in &snapshot.controllers {
            registry.known_roles.extend(controller.roles.iter().cloned());
        }
        registry.controllers = snapshot.controllers;
        registry.pins = snapshot
            .pins
            .into_iter()
            .filter(|(role, id)| {
                let exists = registry.get(id).is_some();
                if !exists {
                    tracing::warn!(role = %role, controller_id = %id, "Dropping stale role pin");
                }
                exists
            })
            .collect();
        registry
    }

    /// Persistable copy
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            controllers: self.controllers.clone(),
            pins: self.pins.clone(),
        }
    }

    pub fn known_roles(&self) -> &BTreeSet<Role> {
        &self.known_roles
    }

    /// Controllers in list order
    pub fn list(&self) -> &[ControllerEndpoint] {
        &self.controllers
    }

    pub fn get(&self, id: &ControllerId) -> Option<&ControllerEndpoint> {
        self.controllers.iter().find(|c| &c.id == id)
    }

    /// Controllers declaring `role`, in list order
    pub fn with_role<'a>(&'a self, role: &Role) -> impl Iterator<Item = &'a ControllerEndpoint> + 'a {
        let role = role.clone();
        self.controllers.iter().filter(move |c| c.declares(&role))
    }

    /// Register a controller. An empty role set grants every known role.
    pub fn add(&mut self, request: NewController) -> Result<ControllerEndpoint> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("controller name must not be empty".to_string()));
        }
        let base_url = normalize_base_url(&request.base_url)?;

        let roles = if request.roles.is_empty() {
            self.known_roles.clone()
        } else {
            self.known_roles.extend(request.roles.iter().cloned());
            request.roles
        };

        let endpoint = ControllerEndpoint {
            id: Uuid::new_v4(),
            name,
            base_url,
            token: request.token.filter(|t| !t.trim().is_empty()),
            roles,
        };
        self.controllers.push(endpoint.clone());

        tracing::info!(
            controller_id = %endpoint.id,
            name = %endpoint.name,
            base_url = %endpoint.base_url,
            roles = ?endpoint.roles,
            "Controller added"
        );
        Ok(endpoint)
    }

    /// Edit a controller in place
    pub fn update(&mut self, id: &ControllerId, patch: ControllerPatch) -> Result<ControllerEndpoint> {
        let base_url = patch
            .base_url
            .as_deref()
            .map(normalize_base_url)
            .transpose()?;
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("controller name must not be empty".to_string()));
            }
        }
        if let Some(roles) = &patch.roles {
            self.known_roles.extend(roles.iter().cloned());
        }
        let known_roles = self.known_roles.clone();

        let controller = self
            .controllers
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| Error::NotFound(format!("controller {}", id)))?;

        if let Some(name) = patch.name {
            controller.name = name.trim().to_string();
        }
        if let Some(base_url) = base_url {
            controller.base_url = base_url;
        }
        if let Some(token) = patch.token {
            controller.token = token.filter(|t| !t.trim().is_empty());
        }
        if let Some(roles) = patch.roles {
            controller.roles = if roles.is_empty() { known_roles } else { roles };
        }

        tracing::info!(controller_id = %id, roles = ?controller.roles, "Controller updated");
        Ok(controller.clone())
    }

    /// Remove a controller and any pin referencing it. Returns the
    /// resulting role assignment.
    pub fn remove(&mut self, id: &ControllerId) -> Result<BTreeMap<Role, Option<ControllerId>>> {
        let index = self
            .controllers
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| Error::NotFound(format!("controller {}", id)))?;
        let removed = self.controllers.remove(index);

        self.pins.retain(|role, pinned| {
            let keep = pinned != id;
            if !keep {
                tracing::info!(role = %role, controller_id = %id, "Role pin cleared");
            }
            keep
        });

        let resolved = self.resolved();
        tracing::info!(
            controller_id = %id,
            name = %removed.name,
            resolved = ?resolved,
            "Controller removed"
        );
        Ok(resolved)
    }

    /// Pin `id` as the active controller for `role`
    pub fn set_active(&mut self, role: &Role, id: &ControllerId) -> Result<()> {
        let controller = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("controller {}", id)))?;
        if !controller.declares(role) {
            return Err(Error::Validation(format!(
                "controller {} does not declare role {}",
                controller.name, role
            )));
        }
        self.pins.insert(role.clone(), *id);
        tracing::info!(role = %role, controller_id = %id, "Active controller pinned");
        Ok(())
    }

    /// Drop the pin for `role`; resolution falls back to list order
    pub fn clear_pin(&mut self, role: &Role) -> bool {
        self.pins.remove(role).is_some()
    }

    /// Explicit pin for `role`, if any (may be stale until resolution)
    pub fn pinned(&self, role: &Role) -> Option<&ControllerId> {
        self.pins.get(role)
    }

    /// Active controller for `role`
    pub fn resolve(&self, role: &Role) -> Option<&ControllerEndpoint> {
        if let Some(pinned) = self.pins.get(role) {
            if let Some(controller) = self.get(pinned).filter(|c| c.declares(role)) {
                return Some(controller);
            }
        }
        self.with_role(role).next()
    }

    /// Current assignment for every known role
    pub fn resolved(&self) -> BTreeMap<Role, Option<ControllerId>> {
        self.known_roles
            .iter()
            .map(|role| (role.clone(), self.resolve(role).map(|c| c.id)))
            .collect()
    }
}
