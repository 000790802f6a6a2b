//! ControllerRegistry data types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Opaque controller identity
pub type ControllerId = Uuid;

/// Capability role tag. Open set: older controller builds also declared
/// roof / sensors / sidewall.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub const CAMERAS: &'static str = "cameras";

    /// Role tags are trimmed and lower-cased
    pub fn new(tag: &str) -> Self {
        Self(tag.trim().to_ascii_lowercase())
    }

    pub fn cameras() -> Self {
        Self::new(Self::CAMERAS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// A registered remote controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    pub id: ControllerId,
    pub name: String,
    /// Normalized base URL
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
}

impl ControllerEndpoint {
    pub fn declares(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

/// Add request
#[derive(Debug, Clone, Default)]
pub struct NewController {
    pub name: String,
    pub base_url: String,
    pub token: Option<String>,
    /// Empty means every known role
    pub roles: BTreeSet<Role>,
}

/// Update request; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct ControllerPatch {
    pub name: Option<String>,
    pub base_url: Option<String>,
    /// `Some(None)` clears the token
    pub token: Option<Option<String>>,
    pub roles: Option<BTreeSet<Role>>,
}

/// Persisted form of the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub controllers: Vec<ControllerEndpoint>,
    /// Explicit role -> controller pins
    #[serde(default)]
    pub pins: BTreeMap<Role, ControllerId>,
}
