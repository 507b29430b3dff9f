//! Plugin groups

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::discovery::{Discovered, FetchOptions};
use crate::error::{PluginError, Result};
use crate::inventory::{GroupCriteria, GroupId, GroupPluginEntry, PluginGroup, PluginInventory};
use crate::manager::install::{InstallOptions, InstallOutcome};
use crate::manager::PluginManager;
use crate::target::{PluginIdentifier, Target};
use crate::version::{self, LATEST};

/// Name that selects every plugin of a group
pub const ALL_PLUGINS: &str = "all";

/// Result of a group install
#[derive(Debug)]
pub struct GroupInstallReport {
    /// Group id including the resolved version
    pub group: GroupId,
    pub installed: Vec<InstallOutcome>,
    /// Context-scoped entries left to context sync
    pub deferred: Vec<PluginIdentifier>,
    /// Optional entries that failed
    pub failures: Vec<(PluginIdentifier, PluginError)>,
}

impl PluginManager {
    /// Groups matching `criteria`, merged across sources
    pub fn discover_plugin_groups(
        &self,
        criteria: &GroupCriteria,
        fetch: &FetchOptions,
    ) -> Result<Discovered<PluginGroup>> {
        let discovered = self.indexes(fetch)?;
        let criteria = GroupCriteria {
            include_hidden: criteria.include_hidden || self.show_hidden(),
            ..criteria.clone()
        };

        let groups = merge_groups(&discovered.items, &criteria);
        Ok(Discovered {
            items: groups,
            failures: discovered.failures,
        })
    }

    /// A group narrowed to one version.
    ///
    /// Without a version in `id` the configured default for the group applies,
    /// then the highest stable version.
    pub fn get_plugin_group(&self, id: &GroupId, fetch: &FetchOptions) -> Result<PluginGroup> {
        let discovered = self.indexes(fetch)?;
        let (group, _) = self.resolve_group(&discovered.items, id)?;
        Ok(group)
    }

    /// Install one plugin of a group, or all of them with `"all"`.
    ///
    /// Plugins are installed at the version the group pins. A failing mandatory
    /// plugin aborts the install; optional failures are reported.
    pub fn install_plugins_from_group(
        &self,
        plugin_name: &str,
        group_id: &GroupId,
        target: Option<Target>,
        opts: &InstallOptions,
    ) -> Result<GroupInstallReport> {
        let discovered = self.indexes(&opts.fetch)?;
        let (group, group_version) = self.resolve_group(&discovered.items, group_id)?;
        let resolved_id = group.id().with_version(group_version.clone());
        let entries = group.plugins(&group_version).unwrap_or_default();

        let mut report = GroupInstallReport {
            group: resolved_id.clone(),
            installed: Vec::new(),
            deferred: Vec::new(),
            failures: Vec::new(),
        };

        if plugin_name == ALL_PLUGINS {
            for entry in entries
                .iter()
                .filter(|e| target.map_or(true, |t| t == e.target))
            {
                let id = PluginIdentifier::new(entry.name.clone(), entry.target);
                if entry.context_scoped {
                    tracing::debug!(plugin = %id, group = %resolved_id, "deferring context-scoped plugin");
                    report.deferred.push(id);
                    continue;
                }

                let mandatory = is_mandatory(&discovered.items, entry);
                match self.install_group_entry(&discovered.items, entry, opts) {
                    Ok(outcome) => report.installed.push(outcome),
                    Err(e) if mandatory => {
                        return Err(PluginError::GroupInstallFailed {
                            group: resolved_id.to_string(),
                            plugin: entry.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(plugin = %id, group = %resolved_id, error = %e, "optional plugin failed to install");
                        report.failures.push((id, e));
                    }
                }
            }
            return Ok(report);
        }

        let matching: Vec<&GroupPluginEntry> = entries
            .iter()
            .filter(|e| e.name == plugin_name && target.map_or(true, |t| t == e.target))
            .collect();

        let entry = match matching.as_slice() {
            [] => {
                return Err(PluginError::PluginNotFoundInGroup {
                    name: plugin_name.to_string(),
                    group: resolved_id.to_string(),
                })
            }
            [entry] => *entry,
            many => {
                let targets: BTreeSet<Target> = many.iter().map(|e| e.target).collect();
                return Err(PluginError::AmbiguousPlugin {
                    name: plugin_name.to_string(),
                    targets: targets.into_iter().collect(),
                });
            }
        };

        if entry.context_scoped {
            return Err(PluginError::ContextScopedPlugin {
                name: entry.name.clone(),
                group: resolved_id.to_string(),
            });
        }

        let outcome = self.install_group_entry(&discovered.items, entry, opts)?;
        report.installed.push(outcome);
        Ok(report)
    }

    // ========== Internals ==========

    fn install_group_entry(
        &self,
        indexes: &[Arc<PluginInventory>],
        entry: &GroupPluginEntry,
        opts: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let resolved =
            self.resolve_plugin(indexes, &entry.name, Some(entry.target), &entry.version)?;
        self.install_resolved(&resolved, None, opts.reinstall)
    }

    /// The group named by `id` and the version to use
    pub(crate) fn resolve_group(
        &self,
        indexes: &[Arc<PluginInventory>],
        id: &GroupId,
    ) -> Result<(PluginGroup, String)> {
        let criteria = GroupCriteria {
            vendor: Some(id.vendor.clone()),
            publisher: Some(id.publisher.clone()),
            name: Some(id.name.clone()),
            version: None,
            include_hidden: true,
        };
        let base = id.base();

        let mut group = merge_groups(indexes, &criteria)
            .into_iter()
            .next()
            .ok_or_else(|| PluginError::GroupNotFound {
                group: base.clone(),
            })?;

        let constraint = id
            .version
            .clone()
            .or_else(|| self.config.group_default(&base))
            .unwrap_or_else(|| LATEST.to_string());

        let keys: Vec<&String> = group.versions.keys().collect();
        let selected = version::select_version(&keys, &constraint).map_err(|_| {
            PluginError::GroupVersionNotFound {
                group: base.clone(),
                version: constraint.clone(),
            }
        })?;

        group.versions.retain(|v, _| *v == selected);
        tracing::debug!(group = %base, version = %selected, "resolved plugin group");
        Ok((group, selected))
    }
}

/// Groups of all indexes matching `criteria`; the same group published by
/// several sources is merged, earlier sources winning per version
fn merge_groups(indexes: &[Arc<PluginInventory>], criteria: &GroupCriteria) -> Vec<PluginGroup> {
    let mut merged: Vec<PluginGroup> = Vec::new();
    for group in indexes.iter().flat_map(|index| index.find_groups(criteria)) {
        match merged.iter_mut().find(|g| g.id() == group.id()) {
            Some(existing) => existing.merge(&group),
            None => merged.push(group),
        }
    }
    merged.sort_by_key(|g| g.id().base());
    merged
}

/// A group entry is mandatory when the group or the pinned plugin version says so
fn is_mandatory(indexes: &[Arc<PluginInventory>], entry: &GroupPluginEntry) -> bool {
    if entry.mandatory {
        return true;
    }
    let id = PluginIdentifier::new(entry.name.clone(), entry.target);
    indexes
        .iter()
        .filter_map(|index| index.plugin(&id))
        .filter_map(|plugin| plugin.version_entry(&entry.version))
        .any(|version| version.mandatory)
}
