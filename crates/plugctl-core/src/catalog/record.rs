//! Installed plugin records

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::{ContextType, PluginIdentifier, Target};

/// Who owns an installed plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallScope {
    /// Installed explicitly by the user
    Standalone,
    /// Installed by context sync
    Context,
}

impl std::fmt::Display for InstallScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Context => write!(f, "context"),
        }
    }
}

/// A plugin present on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPluginRecord {
    pub name: String,
    pub target: Target,
    pub version: String,
    pub installation_path: PathBuf,
    pub scope: InstallScope,
    /// Owning context of context-scoped records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub supported_context_types: Vec<ContextType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstalledPluginRecord {
    pub fn new(
        name: &str,
        target: Target,
        version: &str,
        installation_path: PathBuf,
        scope: InstallScope,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            target,
            version: version.to_string(),
            installation_path,
            scope,
            context_name: None,
            aliases: Vec::new(),
            hidden: false,
            supported_context_types: Vec::new(),
            digest: None,
            installed_at: now,
            updated_at: now,
        }
    }

    pub fn for_context(mut self, context: &str) -> Self {
        self.scope = InstallScope::Context;
        self.context_name = Some(context.to_string());
        self
    }

    pub fn identifier(&self) -> PluginIdentifier {
        PluginIdentifier::new(self.name.clone(), self.target)
    }

    pub fn is_context_scoped(&self) -> bool {
        self.scope == InstallScope::Context
    }
}

/// Record query; `None` fields match anything
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub name: Option<String>,
    pub target: Option<Target>,
    pub scope: Option<InstallScope>,
    pub context: Option<String>,
}

impl CatalogFilter {
    pub fn named(name: &str, target: Option<Target>) -> Self {
        Self {
            name: Some(name.to_string()),
            target,
            ..Default::default()
        }
    }

    pub fn standalone() -> Self {
        Self {
            scope: Some(InstallScope::Standalone),
            ..Default::default()
        }
    }

    pub fn context(name: &str) -> Self {
        Self {
            scope: Some(InstallScope::Context),
            context: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &InstalledPluginRecord) -> bool {
        self.name.as_deref().map_or(true, |n| n == record.name)
            && self.target.map_or(true, |t| t == record.target)
            && self.scope.map_or(true, |s| s == record.scope)
            && self
                .context
                .as_deref()
                .map_or(true, |c| record.context_name.as_deref() == Some(c))
    }
}
