//! Type-keyed plugin collections per protocol kind
//!
//! Each protocol kind maps to an immutable, reference-counted plugin list.
//! Mutations build a new list and swap it in, so a snapshot taken by a running
//! chain is never changed underneath it.

use crate::error::{ApiError, Result};
use crate::plugin::ApiPlugin;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

static GLOBAL_REGISTRY: Lazy<Arc<PluginRegistry>> = Lazy::new(|| Arc::new(PluginRegistry::new()));

/// Transport category a plugin chain is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Rest,
    Sse,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 2] = [ProtocolKind::Rest, ProtocolKind::Sse];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Rest => "rest",
            ProtocolKind::Sse => "sse",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ApiError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rest" => Ok(ProtocolKind::Rest),
            "sse" => Ok(ProtocolKind::Sse),
            other => Err(ApiError::Validation(format!(
                "Unknown protocol kind '{other}'"
            ))),
        }
    }
}

/// What `add` does when a plugin of the same type is already registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `ApiError::DuplicatePlugin`
    #[default]
    Reject,
    /// Swap the new plugin into the old one's position and destroy the old one
    Replace,
}

/// A registered plugin together with its type token
#[derive(Clone)]
pub struct PluginEntry {
    id: TypeId,
    name: &'static str,
    plugin: Arc<dyn ApiPlugin>,
}

impl PluginEntry {
    fn new<P: ApiPlugin>(plugin: Arc<P>) -> Self {
        let name = plugin.name();
        Self {
            id: TypeId::of::<P>(),
            name,
            plugin,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn plugin(&self) -> &Arc<dyn ApiPlugin> {
        &self.plugin
    }

    pub fn is<P: ApiPlugin>(&self) -> bool {
        self.id == TypeId::of::<P>()
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry").field("name", &self.name).finish()
    }
}

/// Read-only view of one protocol kind's plugins at a point in time
pub type PluginSnapshot = Arc<Vec<PluginEntry>>;

/// Ordered plugin collections keyed by protocol kind.
///
/// `PluginRegistry::global()` is the process-wide default that engines use
/// unless given another one. Engines also own a private registry for their
/// instance-scoped plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    kinds: DashMap<ProtocolKind, PluginSnapshot>,
    policy: DuplicatePolicy,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            kinds: DashMap::new(),
            policy,
        }
    }

    /// The shared default registry
    pub fn global() -> Arc<PluginRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Append a plugin to the end of the kind's chain
    pub fn add<P: ApiPlugin>(&self, kind: ProtocolKind, plugin: Arc<P>) -> Result<()> {
        let entry = PluginEntry::new(plugin);
        let id = entry.id;
        let name = entry.name;

        let replaced = {
            let mut slot = self.kinds.entry(kind).or_default();
            let mut plugins = slot.as_ref().clone();
            let replaced = match plugins.iter().position(|e| e.id == id) {
                Some(index) => match self.policy {
                    DuplicatePolicy::Reject => {
                        return Err(ApiError::DuplicatePlugin { kind, name });
                    }
                    DuplicatePolicy::Replace => Some(std::mem::replace(&mut plugins[index], entry)),
                },
                None => {
                    plugins.push(entry);
                    None
                }
            };
            *slot = Arc::new(plugins);
            replaced
        };

        if let Some(old) = replaced {
            debug!(plugin = name, kind = %kind, "Replaced existing plugin");
            old.plugin.destroy();
        } else {
            debug!(plugin = name, kind = %kind, "Registered plugin");
        }

        Ok(())
    }

    /// Remove the plugin of type `P`, destroying it. Returns whether one was present.
    pub fn remove<P: ApiPlugin>(&self, kind: ProtocolKind) -> bool {
        let removed = {
            let Some(mut slot) = self.kinds.get_mut(&kind) else {
                return false;
            };
            let Some(index) = slot.iter().position(|e| e.is::<P>()) else {
                return false;
            };
            let mut plugins = slot.as_ref().clone();
            let removed = plugins.remove(index);
            *slot = Arc::new(plugins);
            removed
        };

        debug!(plugin = removed.name, kind = %kind, "Removed plugin");
        removed.plugin.destroy();
        true
    }

    pub fn has<P: ApiPlugin>(&self, kind: ProtocolKind) -> bool {
        self.kinds
            .get(&kind)
            .map(|plugins| plugins.iter().any(|e| e.is::<P>()))
            .unwrap_or(false)
    }

    /// Snapshot of the kind's plugins in registration order
    pub fn get_all(&self, kind: ProtocolKind) -> PluginSnapshot {
        self.kinds
            .get(&kind)
            .map(|plugins| plugins.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, kind: ProtocolKind) -> usize {
        self.kinds.get(&kind).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, kind: ProtocolKind) -> bool {
        self.len(kind) == 0
    }

    /// Remove and destroy every plugin of one kind
    pub fn clear(&self, kind: ProtocolKind) {
        if let Some((_, plugins)) = self.kinds.remove(&kind) {
            info!(kind = %kind, count = plugins.len(), "Clearing plugins");
            destroy_all(&plugins);
        }
    }

    /// Remove and destroy every plugin of every kind
    pub fn reset_all(&self) {
        let kinds: Vec<ProtocolKind> = self.kinds.iter().map(|e| *e.key()).collect();
        for kind in kinds {
            self.clear(kind);
        }
    }
}

fn destroy_all(plugins: &[PluginEntry]) {
    for entry in plugins {
        entry.plugin.destroy();
    }
}
