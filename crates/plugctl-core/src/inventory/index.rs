//! Plugin Inventory Index
//!
//! Queryable view of one discovery source's payload.

use std::collections::BTreeMap;

use crate::error::{PluginError, Result};
use crate::inventory::types::{
    Artifact, InventoryPayload, PluginEntry, PluginGroup, PluginVersionEntry, Recommendation,
};
use crate::target::{ContextType, PluginIdentifier, Target};
use crate::version;

/// Plugin query; `None` fields match anything
#[derive(Debug, Clone, Default)]
pub struct PluginCriteria {
    pub name: Option<String>,
    pub target: Option<Target>,
    pub include_hidden: bool,
}

impl PluginCriteria {
    pub fn named(name: &str, target: Option<Target>) -> Self {
        Self {
            name: Some(name.to_string()),
            target,
            include_hidden: true,
        }
    }

    fn matches(&self, plugin: &IndexedPlugin) -> bool {
        self.name.as_deref().map_or(true, |n| n == plugin.id.name)
            && self.target.map_or(true, |t| t == plugin.id.target)
            && (self.include_hidden || !plugin.hidden)
    }
}

/// Group query; `version` is a constraint handed to the version selector
#[derive(Debug, Clone, Default)]
pub struct GroupCriteria {
    pub vendor: Option<String>,
    pub publisher: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub include_hidden: bool,
}

impl GroupCriteria {
    fn matches(&self, group: &PluginGroup) -> bool {
        self.vendor.as_deref().map_or(true, |v| v == group.vendor)
            && self.publisher.as_deref().map_or(true, |p| p == group.publisher)
            && self.name.as_deref().map_or(true, |n| n == group.name)
            && (self.include_hidden || !group.hidden)
    }
}

/// A plugin with all of its published versions
#[derive(Debug, Clone)]
pub struct IndexedPlugin {
    pub id: PluginIdentifier,
    pub description: String,
    pub vendor: String,
    pub publisher: String,
    pub hidden: bool,
    /// Ascending semver order
    pub versions: Vec<String>,
    entries: BTreeMap<String, PluginVersionEntry>,
}

impl IndexedPlugin {
    pub fn version_entry(&self, version: &str) -> Option<&PluginVersionEntry> {
        self.entries.get(version)
    }

    /// Artifact of `version` for the given platform
    pub fn artifact_for(&self, version: &str, os: &str, arch: &str) -> Option<&Artifact> {
        self.entries
            .get(version)?
            .artifacts
            .iter()
            .find(|a| a.matches_platform(os, arch))
    }

    fn add_versions(&mut self, entries: Vec<PluginVersionEntry>) {
        for entry in entries {
            self.entries.entry(entry.version.clone()).or_insert(entry);
        }
        let keys: Vec<&String> = self.entries.keys().collect();
        self.versions = version::sort_versions(&keys);
    }
}

/// In-memory index of plugins, groups and context recommendations
#[derive(Debug, Clone, Default)]
pub struct PluginInventory {
    source_name: String,
    plugins: BTreeMap<PluginIdentifier, IndexedPlugin>,
    groups: Vec<PluginGroup>,
    recommendations: Vec<Recommendation>,
}

impl PluginInventory {
    /// Decode a JSON payload
    pub fn from_slice(source_name: &str, bytes: &[u8]) -> Result<Self> {
        let payload: InventoryPayload =
            serde_json::from_slice(bytes).map_err(|e| PluginError::InventoryCorrupt {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        Self::from_payload(source_name, payload)
    }

    pub fn from_str(source_name: &str, content: &str) -> Result<Self> {
        Self::from_slice(source_name, content.as_bytes())
    }

    /// Build the index, rejecting payloads with missing required fields
    pub fn from_payload(source_name: &str, payload: InventoryPayload) -> Result<Self> {
        validate(source_name, &payload)?;

        let mut plugins: BTreeMap<PluginIdentifier, IndexedPlugin> = BTreeMap::new();
        for entry in payload.plugins {
            let PluginEntry {
                name,
                target,
                description,
                vendor,
                publisher,
                hidden,
                versions,
            } = entry;
            let id = PluginIdentifier::new(name, target);
            plugins
                .entry(id.clone())
                .or_insert_with(|| IndexedPlugin {
                    id,
                    description,
                    vendor,
                    publisher,
                    hidden,
                    versions: Vec::new(),
                    entries: BTreeMap::new(),
                })
                .add_versions(versions);
        }

        let mut groups: Vec<PluginGroup> = Vec::new();
        for entry in payload.groups {
            let group = PluginGroup::from_entry(entry);
            match groups.iter_mut().find(|g| g.id() == group.id()) {
                Some(existing) => existing.merge(&group),
                None => groups.push(group),
            }
        }
        groups.sort_by_key(|g| g.id().base());

        Ok(Self {
            source_name: source_name.to_string(),
            plugins,
            groups,
            recommendations: payload.recommendations,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty() && self.groups.is_empty()
    }

    pub fn plugin(&self, id: &PluginIdentifier) -> Option<&IndexedPlugin> {
        self.plugins.get(id)
    }

    /// Plugins matching `criteria`, ordered by (name, target)
    pub fn find_plugins(&self, criteria: &PluginCriteria) -> Vec<&IndexedPlugin> {
        self.plugins
            .values()
            .filter(|p| criteria.matches(p))
            .collect()
    }

    /// Groups matching `criteria`.
    ///
    /// With a version constraint, each group keeps only the selected version and
    /// groups without a matching version are dropped.
    pub fn find_groups(&self, criteria: &GroupCriteria) -> Vec<PluginGroup> {
        self.groups
            .iter()
            .filter(|g| criteria.matches(g))
            .filter_map(|g| match &criteria.version {
                None => Some(g.clone()),
                Some(constraint) => {
                    let keys: Vec<&String> = g.versions.keys().collect();
                    let selected = version::select_version(&keys, constraint).ok()?;
                    let mut narrowed = g.clone();
                    narrowed.versions.retain(|v, _| *v == selected);
                    Some(narrowed)
                }
            })
            .collect()
    }

    /// Version of `id` chosen by the version selector
    pub fn recommended_version_for(
        &self,
        id: &PluginIdentifier,
        constraint: &str,
    ) -> Result<String> {
        let plugin = self.plugins.get(id).ok_or_else(|| PluginError::PluginNotFound {
            name: id.name.clone(),
            target: Some(id.target),
        })?;
        version::select_version_for(&id.to_string(), &plugin.versions, constraint)
    }

    /// Recommendations applying to a context of `context_type` with `metadata`
    pub fn recommendations_for(
        &self,
        context_type: ContextType,
        metadata: &BTreeMap<String, String>,
    ) -> Vec<&Recommendation> {
        self.recommendations
            .iter()
            .filter(|r| r.applies_to(context_type, metadata))
            .collect()
    }

    /// Rewrite artifact references, e.g. to resolve paths of a local manifest
    pub(crate) fn map_artifacts(&mut self, f: impl Fn(&str) -> String) {
        for plugin in self.plugins.values_mut() {
            for entry in plugin.entries.values_mut() {
                for artifact in &mut entry.artifacts {
                    artifact.reference = f(&artifact.reference);
                }
            }
        }
    }
}

fn validate(source_name: &str, payload: &InventoryPayload) -> Result<()> {
    let corrupt = |message: String| PluginError::InventoryCorrupt {
        source_name: source_name.to_string(),
        message,
    };

    for plugin in &payload.plugins {
        if plugin.name.trim().is_empty() {
            return Err(corrupt("plugin entry without a name".into()));
        }
        if plugin.versions.is_empty() {
            return Err(corrupt(format!("plugin '{}' has no versions", plugin.name)));
        }
        for entry in &plugin.versions {
            if entry.version.trim().is_empty() {
                return Err(corrupt(format!(
                    "plugin '{}' has a version without a version string",
                    plugin.name
                )));
            }
            if entry.artifacts.iter().any(|a| a.reference.trim().is_empty()) {
                return Err(corrupt(format!(
                    "plugin '{}' {} has an artifact without a reference",
                    plugin.name, entry.version
                )));
            }
        }
    }

    for group in &payload.groups {
        if [&group.vendor, &group.publisher, &group.name]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(corrupt("plugin group without vendor, publisher or name".into()));
        }
        for entry in &group.versions {
            if entry.version.trim().is_empty() {
                return Err(corrupt(format!(
                    "group '{}' has a version without a version string",
                    group.name
                )));
            }
            if entry.plugins.is_empty() {
                return Err(corrupt(format!(
                    "group '{}' {} lists no plugins",
                    group.name, entry.version
                )));
            }
            let incomplete = entry
                .plugins
                .iter()
                .any(|p| p.name.trim().is_empty() || p.version.trim().is_empty());
            if incomplete {
                return Err(corrupt(format!(
                    "group '{}' {} lists a plugin without name or version",
                    group.name, entry.version
                )));
            }
        }
    }

    for rec in &payload.recommendations {
        if rec.plugins.iter().any(|p| p.name.trim().is_empty()) {
            return Err(corrupt(format!(
                "recommendation for {} lists a plugin without a name",
                rec.context_type
            )));
        }
    }

    Ok(())
}
