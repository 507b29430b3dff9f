//! Contexts and the config store seam
//!
//! A context is a logged-in server of some [`ContextType`]; at most one context
//! per type is active. The plugin manager only reads and updates contexts
//! through [`ConfigStore`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoverySource;
use crate::error::Result;
use crate::target::ContextType;

/// A server the CLI is logged in to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    pub context_type: ContextType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Plugin groups whose context-scoped plugins this context wants
    #[serde(default)]
    pub groups: Vec<String>,
    /// Free-form server metadata matched by inventory recommendations
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Context {
    pub fn new(name: &str, context_type: ContextType) -> Self {
        Self {
            name: name.to_string(),
            context_type,
            endpoint: None,
            groups: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Persisted configuration as seen by the plugin manager
pub trait ConfigStore: Send + Sync {
    fn contexts(&self) -> Result<Vec<Context>>;

    fn context(&self, name: &str) -> Result<Option<Context>> {
        Ok(self.contexts()?.into_iter().find(|c| c.name == name))
    }

    fn active_context(&self, context_type: ContextType) -> Result<Option<Context>>;

    /// Active contexts, at most one per type
    fn active_contexts(&self) -> Result<Vec<Context>> {
        let mut active = Vec::new();
        for context_type in ContextType::ALL {
            if let Some(ctx) = self.active_context(context_type)? {
                active.push(ctx);
            }
        }
        Ok(active)
    }

    fn add_context(&self, context: Context) -> Result<()>;

    fn set_active_context(&self, name: &str) -> Result<()>;

    /// Remove a context, deactivating it first when active
    fn delete_context(&self, name: &str) -> Result<Context>;

    fn discovery_sources(&self) -> Result<Vec<DiscoverySource>>;

    fn feature_enabled(&self, feature: &str) -> bool;

    /// Configured default version constraint for a group (`vendor-publisher/name`)
    fn group_default(&self, group: &str) -> Option<String>;
}
