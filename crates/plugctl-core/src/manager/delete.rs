//! Plugin deletion and clean

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;

use crate::catalog::store::LOCK_FILE;
use crate::catalog::{CatalogFilter, InstallScope, InstalledPluginRecord};
use crate::error::{PluginError, Result};
use crate::manager::group::ALL_PLUGINS;
use crate::manager::PluginManager;
use crate::target::Target;

/// Per-call delete knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Also delete copies installed by context sync
    pub force_delete: bool,
    /// Delete every plugin of the given target
    pub all: bool,
}

impl PluginManager {
    /// Delete installed plugins.
    ///
    /// The catalog record is always removed; a binary that is already gone is
    /// not an error.
    pub fn delete_plugin(
        &self,
        name: &str,
        target: Option<Target>,
        opts: &DeleteOptions,
    ) -> Result<Vec<InstalledPluginRecord>> {
        let all = opts.all || name == ALL_PLUGINS;
        if all && target.is_none() {
            return Err(PluginError::AllRequiresTarget);
        }

        let filter = CatalogFilter {
            name: (!all).then(|| name.to_string()),
            target,
            scope: (!opts.force_delete).then_some(InstallScope::Standalone),
            context: None,
        };
        let records = self.catalog.list(&filter)?;

        if records.is_empty() {
            return Err(PluginError::NotInstalled {
                name: name.to_string(),
                target,
            });
        }

        if !all {
            let targets: BTreeSet<Target> = records.iter().map(|r| r.target).collect();
            if targets.len() > 1 {
                return Err(PluginError::AmbiguousPlugin {
                    name: name.to_string(),
                    targets: targets.into_iter().collect(),
                });
            }
        }

        for record in &records {
            self.remove_installed(record)?;
        }
        Ok(records)
    }

    /// Remove all plugins, the catalog and the inventory caches
    pub fn clean(&self) -> Result<()> {
        self.catalog.clear()?;

        let root = &self.paths.plugin_root;
        if root.exists() {
            for entry in fs::read_dir(root)? {
                let entry = entry?;
                if entry.file_name() == LOCK_FILE {
                    continue;
                }
                let path = entry.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }

        self.client.clear()?;
        tracing::info!(root = %root.display(), "removed all plugins and caches");
        Ok(())
    }

    /// Drop a record and its binary
    pub(crate) fn remove_installed(&self, record: &InstalledPluginRecord) -> Result<()> {
        self.catalog
            .delete(&record.identifier(), record.context_name.as_deref())?;

        match fs::remove_file(&record.installation_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %record.installation_path.display(), "plugin binary already gone");
            }
            Err(e) => {
                tracing::warn!(path = %record.installation_path.display(), error = %e, "failed to remove plugin binary");
            }
        }

        tracing::info!(
            plugin = %record.identifier(),
            version = %record.version,
            context = record.context_name.as_deref().unwrap_or("-"),
            "deleted plugin"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FetchOptions;
    use crate::manager::testing::*;
    use crate::manager::InstallOptions;
    use crate::version::LATEST;

    fn two_target_fixture() -> Fixture {
        let fx = fixture(&payload(
            &[
                plugin_json("apply", "kubernetes", &["v1.0.0"]),
                plugin_json("apply", "mission-control", &["v1.0.0"]),
                plugin_json("cluster", "kubernetes", &["v1.0.0"]),
            ],
            "",
        ));
        let opts = InstallOptions::default();
        for (name, target) in [
            ("apply", Target::Kubernetes),
            ("apply", Target::MissionControl),
            ("cluster", Target::Kubernetes),
        ] {
            fx.manager
                .install_standalone_plugin(name, LATEST, Some(target), &opts)
                .unwrap();
        }
        fx
    }

    #[test]
    fn test_ambiguous_delete_names_targets() {
        let fx = two_target_fixture();

        let err = fx
            .manager
            .delete_plugin("apply", None, &DeleteOptions::default())
            .unwrap_err();
        match err {
            PluginError::AmbiguousPlugin { targets, .. } => {
                assert_eq!(targets, vec![Target::Kubernetes, Target::MissionControl]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.manager.get_installed_plugins().unwrap().len(), 3);

        let removed = fx
            .manager
            .delete_plugin("apply", Some(Target::Kubernetes), &DeleteOptions::default())
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!removed[0].installation_path.exists());
        assert_eq!(fx.manager.get_installed_plugins().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_with_missing_binary() {
        let fx = two_target_fixture();
        let record = fx
            .manager
            .catalog()
            .list(&CatalogFilter::named("cluster", None))
            .unwrap()
            .remove(0);
        fs::remove_file(&record.installation_path).unwrap();

        fx.manager
            .delete_plugin("cluster", None, &DeleteOptions::default())
            .unwrap();
        assert!(fx
            .manager
            .catalog()
            .list(&CatalogFilter::named("cluster", None))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_not_installed() {
        let fx = two_target_fixture();
        let err = fx
            .manager
            .delete_plugin("missing", None, &DeleteOptions::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::NotInstalled { .. }));
    }

    #[test]
    fn test_delete_all_requires_target() {
        let fx = two_target_fixture();
        let opts = DeleteOptions {
            all: true,
            ..Default::default()
        };

        let err = fx.manager.delete_plugin("", None, &opts).unwrap_err();
        assert!(matches!(err, PluginError::AllRequiresTarget));

        let removed = fx
            .manager
            .delete_plugin("", Some(Target::Kubernetes), &opts)
            .unwrap();
        assert_eq!(removed.len(), 2);

        let left = fx.manager.get_installed_plugins().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].target, Target::MissionControl);
    }

    #[test]
    fn test_clean() {
        let fx = two_target_fixture();
        fx.manager.clean().unwrap();

        assert!(fx.manager.get_installed_plugins().unwrap().is_empty());
        let leftovers: Vec<_> = fs::read_dir(&fx.manager.paths().plugin_root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != LOCK_FILE)
            .collect();
        assert!(leftovers.is_empty());

        let offline = fx
            .manager
            .discover_standalone_plugins(
                &Default::default(),
                &crate::manager::DiscoverOptions {
                    fetch: FetchOptions::offline(),
                    include_hidden: false,
                },
            )
            .unwrap();
        assert_eq!(offline.failures.len(), 1);
    }
}
