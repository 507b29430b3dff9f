//! Standalone install and upgrade

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use crate::catalog::{CatalogFilter, InstallScope, InstalledPluginRecord};
use crate::discovery::fetcher::{compute_file_digest, verify_digest};
use crate::discovery::FetchOptions;
use crate::error::{PluginError, Result};
use crate::inventory::{Artifact, IndexedPlugin, PluginCriteria, PluginInventory};
use crate::manager::PluginManager;
use crate::target::{ContextType, PluginIdentifier, Target};
use crate::version::{self, LATEST};

/// Per-call install knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub fetch: FetchOptions,
    /// Fetch again even when the requested version is installed
    pub reinstall: bool,
}

/// What an install did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallAction {
    Installed,
    Upgraded { from: String },
    Downgraded { from: String },
    AlreadyInstalled,
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub id: PluginIdentifier,
    pub version: String,
    pub action: InstallAction,
}

impl InstallOutcome {
    pub fn changed(&self) -> bool {
        self.action != InstallAction::AlreadyInstalled
    }
}

/// A plugin version picked out of the inventories
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPlugin {
    pub id: PluginIdentifier,
    pub version: String,
    pub artifact: Artifact,
    pub hidden: bool,
    pub source: String,
}

impl PluginManager {
    /// Install a plugin from the discovery sources.
    ///
    /// Installing the version already present is a no-op that fetches nothing.
    pub fn install_standalone_plugin(
        &self,
        name: &str,
        version_constraint: &str,
        target: Option<Target>,
        opts: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let mut discovered = self.indexes(&opts.fetch)?;
        let lookup = self.resolve_plugin(&discovered.items, name, target, version_constraint);
        let resolved = match lookup {
            Err(PluginError::PluginNotFound { name, target }) => {
                for failure in &discovered.failures {
                    tracing::warn!(
                        source = %failure.source,
                        error = %failure.error,
                        "discovery source unavailable while looking up plugin"
                    );
                }
                return Err(discovered
                    .failure_error()
                    .filter(|_| discovered.items.is_empty())
                    .unwrap_or(PluginError::PluginNotFound { name, target }));
            }
            other => other?,
        };

        self.install_resolved(&resolved, None, opts.reinstall)
    }

    /// Move a standalone plugin to the latest version
    pub fn upgrade_plugin(
        &self,
        name: &str,
        target: Option<Target>,
        opts: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let records = self.catalog.list(&CatalogFilter {
            scope: Some(InstallScope::Standalone),
            ..CatalogFilter::named(name, target)
        })?;

        let targets: BTreeSet<Target> = records.iter().map(|r| r.target).collect();
        let target = match targets.len() {
            0 => {
                return Err(PluginError::NotInstalled {
                    name: name.to_string(),
                    target,
                })
            }
            1 => targets.into_iter().next(),
            _ => {
                return Err(PluginError::AmbiguousPlugin {
                    name: name.to_string(),
                    targets: targets.into_iter().collect(),
                })
            }
        };

        self.install_standalone_plugin(name, LATEST, target, opts)
    }

    // ========== Resolution ==========

    /// Pick the plugin and version matching a request across all `indexes`.
    ///
    /// Sources are consulted in the given order; the first one publishing the
    /// selected version provides the artifact.
    pub(crate) fn resolve_plugin(
        &self,
        indexes: &[Arc<PluginInventory>],
        name: &str,
        target: Option<Target>,
        constraint: &str,
    ) -> Result<ResolvedPlugin> {
        let criteria = PluginCriteria::named(name, target);
        let matches: Vec<(&str, &IndexedPlugin)> = indexes
            .iter()
            .flat_map(|index| {
                index
                    .find_plugins(&criteria)
                    .into_iter()
                    .map(move |p| (index.source_name(), p))
            })
            .collect();

        let targets: BTreeSet<Target> = matches.iter().map(|(_, p)| p.id.target).collect();
        let id = match targets.len() {
            0 => {
                return Err(PluginError::PluginNotFound {
                    name: name.to_string(),
                    target,
                })
            }
            1 => matches[0].1.id.clone(),
            _ => {
                return Err(PluginError::AmbiguousPlugin {
                    name: name.to_string(),
                    targets: targets.into_iter().collect(),
                })
            }
        };

        let available: Vec<&String> = matches.iter().flat_map(|(_, p)| &p.versions).collect();
        let selected = version::select_version_for(&id.to_string(), &available, constraint)?;

        let (source, plugin) = matches
            .iter()
            .find(|(_, p)| p.version_entry(&selected).is_some())
            .ok_or_else(|| PluginError::VersionNotFound {
                subject: id.to_string(),
                constraint: constraint.to_string(),
                available: version::sort_versions(&available),
            })?;

        let artifact = plugin
            .artifact_for(&selected, &self.os, &self.arch)
            .cloned()
            .ok_or_else(|| PluginError::NoArtifactForPlatform {
                name: id.name.clone(),
                version: selected.clone(),
                os: self.os.clone(),
                arch: self.arch.clone(),
            })?;

        tracing::debug!(plugin = %id, version = %selected, source = %source, "resolved plugin");

        Ok(ResolvedPlugin {
            hidden: plugin.hidden,
            source: source.to_string(),
            id,
            version: selected,
            artifact,
        })
    }

    // ========== Installation ==========

    /// Fetch, verify and register a resolved plugin, standalone or for `context`.
    ///
    /// The binary is written next to its final location and renamed into place
    /// while the catalog lock is held, so the record and the binary on disk
    /// change together.
    pub(crate) fn install_resolved(
        &self,
        resolved: &ResolvedPlugin,
        context: Option<&str>,
        reinstall: bool,
    ) -> Result<InstallOutcome> {
        let id = &resolved.id;
        let dest = self.paths.install_path(id, context);
        let existing = self.catalog.get(id, context)?;

        if let Some(record) = &existing {
            if !reinstall && record.version == resolved.version && record.installation_path.exists()
            {
                tracing::debug!(plugin = %id, version = %record.version, "already installed");
                return Ok(InstallOutcome {
                    id: id.clone(),
                    version: record.version.clone(),
                    action: InstallAction::AlreadyInstalled,
                });
            }
        }

        let parent = dest.parent().unwrap_or(self.paths.plugin_root.as_path());
        fs::create_dir_all(parent)?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        self.fetcher.fetch_plugin(&resolved.artifact, tmp.path())?;
        if let Some(expected) = &resolved.artifact.digest {
            verify_digest(tmp.path(), expected, &resolved.artifact.reference)?;
        }
        let digest = compute_file_digest(tmp.path())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755))?;
        }

        let mut record = InstalledPluginRecord::new(
            &id.name,
            id.target,
            &resolved.version,
            dest.clone(),
            InstallScope::Standalone,
        );
        if let Some(ctx) = context {
            record = record.for_context(ctx);
        }
        record.hidden = resolved.hidden;
        record.digest = Some(digest);
        record.supported_context_types = ContextType::ALL
            .into_iter()
            .filter(|ct| ct.target() == id.target)
            .collect();
        self.catalog.upsert_with(record, move || {
            tmp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })?;

        let action = match existing {
            None => InstallAction::Installed,
            Some(prev) if version::is_newer(&resolved.version, &prev.version) => {
                InstallAction::Upgraded { from: prev.version }
            }
            Some(prev) if version::is_newer(&prev.version, &resolved.version) => {
                InstallAction::Downgraded { from: prev.version }
            }
            Some(_) => InstallAction::Installed,
        };

        tracing::info!(
            plugin = %id,
            version = %resolved.version,
            source = %resolved.source,
            context = context.unwrap_or("-"),
            "installed plugin"
        );

        Ok(InstallOutcome {
            id: id.clone(),
            version: resolved.version.clone(),
            action,
        })
    }
}
