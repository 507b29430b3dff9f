//! Discovered and installed plugin listings

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::catalog::{CatalogFilter, InstalledPluginRecord};
use crate::discovery::{Discovered, FetchOptions};
use crate::error::Result;
use crate::inventory::PluginCriteria;
use crate::manager::PluginManager;
use crate::target::{PluginIdentifier, Target};
use crate::version::{self, LATEST};

/// Per-call discovery knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverOptions {
    pub fetch: FetchOptions,
    pub include_hidden: bool,
}

/// Standalone install state of a discovered plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginStatus {
    NotInstalled,
    Installed,
    UpdateAvailable,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Installed => write!(f, "installed"),
            Self::UpdateAvailable => write!(f, "update available"),
        }
    }
}

/// A plugin as seen across all discovery sources
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub target: Target,
    pub description: String,
    /// First source publishing the plugin
    pub source: String,
    /// Ascending semver order
    pub supported_versions: Vec<String>,
    pub recommended_version: String,
    pub installed_version: Option<String>,
    pub status: PluginStatus,
}

impl DiscoveredPlugin {
    pub fn identifier(&self) -> PluginIdentifier {
        PluginIdentifier::new(self.name.clone(), self.target)
    }
}

impl PluginManager {
    /// Plugins matching `criteria` across all sources, sorted by name and target
    pub fn discover_standalone_plugins(
        &self,
        criteria: &PluginCriteria,
        opts: &DiscoverOptions,
    ) -> Result<Discovered<DiscoveredPlugin>> {
        let discovered = self.indexes(&opts.fetch)?;
        let criteria = PluginCriteria {
            include_hidden: criteria.include_hidden || opts.include_hidden || self.show_hidden(),
            ..criteria.clone()
        };

        let mut merged: BTreeMap<PluginIdentifier, DiscoveredPlugin> = BTreeMap::new();
        for index in &discovered.items {
            for plugin in index.find_plugins(&criteria) {
                let entry = merged
                    .entry(plugin.id.clone())
                    .or_insert_with(|| DiscoveredPlugin {
                        name: plugin.id.name.clone(),
                        target: plugin.id.target,
                        description: plugin.description.clone(),
                        source: index.source_name().to_string(),
                        supported_versions: Vec::new(),
                        recommended_version: String::new(),
                        installed_version: None,
                        status: PluginStatus::NotInstalled,
                    });
                entry.supported_versions.extend(plugin.versions.iter().cloned());
            }
        }

        let installed: BTreeMap<PluginIdentifier, InstalledPluginRecord> = self
            .catalog
            .list(&CatalogFilter::standalone())?
            .into_iter()
            .map(|r| (r.identifier(), r))
            .collect();

        let mut items = Vec::with_capacity(merged.len());
        for (id, mut plugin) in merged {
            plugin.supported_versions = version::sort_versions(&plugin.supported_versions);
            plugin.recommended_version = version::select_version(&plugin.supported_versions, LATEST)
                .ok()
                .or_else(|| plugin.supported_versions.last().cloned())
                .unwrap_or_default();

            if let Some(record) = installed.get(&id) {
                plugin.installed_version = Some(record.version.clone());
                plugin.status = if version::is_newer(&plugin.recommended_version, &record.version) {
                    PluginStatus::UpdateAvailable
                } else {
                    PluginStatus::Installed
                };
            }
            items.push(plugin);
        }

        Ok(Discovered {
            items,
            failures: discovered.failures,
        })
    }

    /// Every catalog record, standalone and context-scoped
    pub fn get_installed_plugins(&self) -> Result<Vec<InstalledPluginRecord>> {
        self.catalog.list(&CatalogFilter::default())
    }

    /// Whether an installed plugin is usable in the current configuration
    pub fn is_active(&self, record: &InstalledPluginRecord) -> Result<bool> {
        self.catalog.is_active(record, self.config.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::testing::*;
    use crate::manager::InstallOptions;

    fn discover(fx: &Fixture) -> Vec<DiscoveredPlugin> {
        fx.manager
            .discover_standalone_plugins(&PluginCriteria::default(), &DiscoverOptions::default())
            .unwrap()
            .items
    }

    #[test]
    fn test_discover_status() {
        let fx = fixture(&payload(
            &[
                plugin_json("package", "kubernetes", &["v0.5.0"]),
                plugin_json("cluster", "kubernetes", &["v1.10.0", "v1.2.0", "v2.0.0-rc.1"]),
            ],
            "",
        ));

        let plugins = discover(&fx);
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].name, "cluster");
        assert_eq!(
            plugins[0].supported_versions,
            vec!["v1.2.0", "v1.10.0", "v2.0.0-rc.1"]
        );
        assert_eq!(plugins[0].recommended_version, "v1.10.0");
        assert!(plugins
            .iter()
            .all(|p| p.status == PluginStatus::NotInstalled));

        fx.manager
            .install_standalone_plugin("cluster", "v1.2.0", None, &InstallOptions::default())
            .unwrap();
        fx.manager
            .install_standalone_plugin("package", LATEST, None, &InstallOptions::default())
            .unwrap();

        let plugins = discover(&fx);
        assert_eq!(plugins[0].status, PluginStatus::UpdateAvailable);
        assert_eq!(plugins[0].installed_version.as_deref(), Some("v1.2.0"));
        assert_eq!(plugins[1].status, PluginStatus::Installed);
    }

    #[test]
    fn test_recommended_version_is_supported() {
        let fx = fixture(&payload(
            &[plugin_json("preview", "global", &["v0.1.0-alpha.1", "v0.1.0-alpha.2"])],
            "",
        ));

        let plugins = discover(&fx);
        assert_eq!(plugins[0].recommended_version, "v0.1.0-alpha.2");
        assert!(plugins[0]
            .supported_versions
            .contains(&plugins[0].recommended_version));
    }

    #[test]
    fn test_hidden_plugins() {
        let hidden = r#"{"name": "debug", "hidden": true, "versions": [{"version": "v1.0.0"}]}"#;
        let fx = fixture(&payload(
            &[
                plugin_json("cluster", "kubernetes", &["v1.0.0"]),
                hidden.to_string(),
            ],
            "",
        ));

        assert_eq!(discover(&fx).len(), 1);

        let all = fx
            .manager
            .discover_standalone_plugins(
                &PluginCriteria::default(),
                &DiscoverOptions {
                    include_hidden: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(all.items.len(), 2);
    }
}
