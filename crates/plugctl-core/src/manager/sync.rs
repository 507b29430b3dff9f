//! Context-driven sync
//!
//! Each active context gets the plugins recommended for it: inventory
//! recommendations matching the context, plus the context-scoped plugins of the
//! groups the context lists. Records of contexts that are no longer active are
//! removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;

use crate::catalog::{CatalogFilter, InstallScope, InstalledPluginRecord};
use crate::context::Context;
use crate::error::{PluginError, Result};
use crate::inventory::{GroupId, PluginInventory};
use crate::manager::install::{InstallOptions, InstallOutcome};
use crate::manager::PluginManager;
use crate::target::PluginIdentifier;

/// Result of a sync
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Installs and upgrades per context
    pub installed: Vec<(String, InstallOutcome)>,
    pub removed: Vec<InstalledPluginRecord>,
    /// Failures keyed by `plugin@context` or source name
    pub failures: Vec<(String, PluginError)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_noop(&self) -> bool {
        self.installed.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }

    /// Turn collected failures into an aggregate error
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(PluginError::Aggregate {
                errors: self.failures,
            })
        }
    }
}

/// Result of deleting a context
#[derive(Debug)]
pub struct ContextDeletion {
    pub context: Context,
    pub removed: Vec<InstalledPluginRecord>,
}

impl PluginManager {
    /// Converge context-scoped plugins to what the active contexts need.
    ///
    /// Running it twice in a row performs no actions the second time.
    pub fn sync_plugins(&self, opts: &InstallOptions) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let active = self.config.active_contexts()?;

        if !active.is_empty() {
            let discovered = self.indexes(&opts.fetch)?;
            let complete = discovered.is_complete();
            for failure in discovered.failures {
                report.failures.push((failure.source, failure.error));
            }

            for context in &active {
                self.sync_context(&discovered.items, context, complete, opts, &mut report)?;
            }
        }

        let active_names: BTreeSet<&str> = active.iter().map(|c| c.name.as_str()).collect();
        let stale: Vec<InstalledPluginRecord> = self
            .catalog
            .list(&CatalogFilter {
                scope: Some(InstallScope::Context),
                ..Default::default()
            })?
            .into_iter()
            .filter(|r| {
                r.context_name
                    .as_deref()
                    .map_or(true, |c| !active_names.contains(c))
            })
            .collect();
        for record in stale {
            match self.remove_installed(&record) {
                Ok(()) => report.removed.push(record),
                Err(e) => {
                    let subject = format!(
                        "{}@{}",
                        record.identifier(),
                        record.context_name.as_deref().unwrap_or("-")
                    );
                    tracing::warn!(plugin = %subject, error = %e, "stale plugin not removed");
                    report.failures.push((subject, e));
                }
            }
        }

        tracing::info!(
            installed = report.installed.len(),
            removed = report.removed.len(),
            failed = report.failures.len(),
            "plugin sync finished"
        );
        Ok(report)
    }

    /// Remove a context and everything installed for it
    pub fn delete_context(&self, name: &str) -> Result<ContextDeletion> {
        let context = self.config.delete_context(name)?;

        let removed = self.catalog.delete_context(name)?;
        for record in &removed {
            if let Err(e) = fs::remove_file(&record.installation_path) {
                tracing::debug!(path = %record.installation_path.display(), error = %e, "binary not removed");
            }
        }

        let dir = self.paths.context_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }

        tracing::info!(context = %name, removed = removed.len(), "deleted context");
        Ok(ContextDeletion { context, removed })
    }

    // ========== Internals ==========

    /// Recommended plugins of a context with their version constraints, and
    /// whether every listed group could be resolved
    fn recommended_for(
        &self,
        indexes: &[Arc<PluginInventory>],
        context: &Context,
        report: &mut SyncReport,
    ) -> (BTreeMap<PluginIdentifier, String>, bool) {
        let mut resolved_all = true;
        let mut wanted: BTreeMap<PluginIdentifier, String> = BTreeMap::new();

        for index in indexes {
            let recommendations =
                index.recommendations_for(context.context_type, &context.metadata);
            for recommendation in recommendations {
                for request in &recommendation.plugins {
                    wanted
                        .entry(PluginIdentifier::new(request.name.clone(), request.target))
                        .or_insert_with(|| request.version.clone());
                }
            }
        }

        let target = context.context_type.target();
        for raw in &context.groups {
            let resolved = raw
                .parse::<GroupId>()
                .and_then(|id| self.resolve_group(indexes, &id));
            let (group, version) = match resolved {
                Ok(found) => found,
                Err(e) => {
                    report.failures.push((format!("{}@{}", raw, context.name), e));
                    resolved_all = false;
                    continue;
                }
            };
            for entry in group.plugins(&version).unwrap_or_default() {
                if entry.context_scoped && entry.target == target {
                    wanted
                        .entry(PluginIdentifier::new(entry.name.clone(), entry.target))
                        .or_insert_with(|| entry.version.clone());
                }
            }
        }

        (wanted, resolved_all)
    }

    fn sync_context(
        &self,
        indexes: &[Arc<PluginInventory>],
        context: &Context,
        complete: bool,
        opts: &InstallOptions,
        report: &mut SyncReport,
    ) -> Result<()> {
        let (wanted, resolved_all) = self.recommended_for(indexes, context, report);
        tracing::debug!(context = %context.name, plugins = wanted.len(), "syncing context");

        for (id, constraint) in &wanted {
            let result = self
                .resolve_plugin(indexes, &id.name, Some(id.target), constraint)
                .and_then(|resolved| {
                    self.install_resolved(&resolved, Some(context.name.as_str()), opts.reinstall)
                });
            match result {
                Ok(outcome) if outcome.changed() => {
                    report.installed.push((context.name.clone(), outcome));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(plugin = %id, context = %context.name, error = %e, "sync failed for plugin");
                    report.failures.push((format!("{}@{}", id, context.name), e));
                }
            }
        }

        // A plugin missing from an incomplete view may still be recommended.
        if !complete || !resolved_all {
            return Ok(());
        }

        for record in self.catalog.list(&CatalogFilter::context(&context.name))? {
            if wanted.contains_key(&record.identifier()) {
                continue;
            }
            match self.remove_installed(&record) {
                Ok(()) => report.removed.push(record),
                Err(e) => {
                    let subject = format!("{}@{}", record.identifier(), context.name);
                    tracing::warn!(plugin = %subject, error = %e, "plugin not removed");
                    report.failures.push((subject, e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FetchOptions;
    use crate::manager::testing::*;
    use crate::target::{ContextType, Target};

    const RECOMMENDATIONS: &str = r#""recommendations": [
        {"contextType": "kubernetes", "plugins": [
            {"name": "cluster", "target": "kubernetes", "version": "v1"}
        ]},
        {"contextType": "kubernetes", "match": {"edition": "enterprise"}, "plugins": [
            {"name": "secret", "target": "kubernetes"}
        ]},
        {"contextType": "mission-control", "plugins": [
            {"name": "apply", "target": "mission-control"}
        ]}
    ]"#;

    fn sync_payload(extra: &str) -> String {
        payload(
            &[
                plugin_json("cluster", "kubernetes", &["v1.0.0", "v1.1.0", "v2.0.0"]),
                plugin_json("secret", "kubernetes", &["v0.3.0"]),
                plugin_json("apply", "mission-control", &["v2.0.0"]),
                plugin_json("package", "kubernetes", &["v0.5.0"]),
            ],
            extra,
        )
    }

    fn activate(fx: &Fixture, context: Context) {
        let store = fx.manager.config_store();
        let name = context.name.clone();
        store.add_context(context).unwrap();
        store.set_active_context(&name).unwrap();
    }

    fn names(records: &[InstalledPluginRecord]) -> Vec<String> {
        records.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_sync_installs_recommendations() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(
            &fx,
            Context::new("prod", ContextType::Kubernetes).with_metadata("edition", "enterprise"),
        );
        activate(&fx, Context::new("tmc", ContextType::MissionControl));

        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.installed.len(), 3);

        let prod = fx.manager.catalog().list(&CatalogFilter::context("prod")).unwrap();
        assert_eq!(names(&prod), vec!["cluster", "secret"]);
        assert_eq!(prod[0].version, "v1.1.0");
        assert!(prod[0]
            .installation_path
            .starts_with(fx.manager.paths().context_dir("prod")));

        let tmc = fx.manager.catalog().list(&CatalogFilter::context("tmc")).unwrap();
        assert_eq!(names(&tmc), vec!["apply"]);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(&fx, Context::new("prod", ContextType::Kubernetes));

        let first = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert_eq!(first.installed.len(), 1);
        let fetches = fx.fetcher.fetches();

        let second = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert!(second.is_noop());
        assert_eq!(fx.fetcher.fetches(), fetches);
    }

    #[test]
    fn test_sync_removes_dropped_recommendations() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(
            &fx,
            Context::new("prod", ContextType::Kubernetes).with_metadata("edition", "enterprise"),
        );
        fx.manager.sync_plugins(&InstallOptions::default()).unwrap();

        fx.fetcher.set_payload(&sync_payload(
            r#""recommendations": [{"contextType": "kubernetes", "plugins": [{"name": "cluster", "target": "kubernetes"}]}]"#,
        ));
        let opts = InstallOptions {
            fetch: FetchOptions::refresh(),
            ..Default::default()
        };
        let report = fx.manager.sync_plugins(&opts).unwrap();

        assert_eq!(names(&report.removed), vec!["secret"]);
        assert_eq!(report.installed.len(), 1);
        assert_eq!(report.installed[0].1.version, "v2.0.0");

        let prod = fx.manager.catalog().list(&CatalogFilter::context("prod")).unwrap();
        assert_eq!(names(&prod), vec!["cluster"]);
    }

    #[test]
    fn test_sync_group_context_scoped_plugins() {
        let groups = r#""groups": [{"vendor": "vmware", "publisher": "tmc", "name": "default",
            "versions": [{"version": "v1.0.0", "plugins": [
                {"name": "apply", "target": "mission-control", "version": "v2.0.0", "contextScoped": true},
                {"name": "package", "target": "kubernetes", "version": "v0.5.0", "contextScoped": true}
            ]}]}]"#;
        let fx = fixture(&sync_payload(groups));
        activate(
            &fx,
            Context::new("tmc", ContextType::MissionControl).with_group("vmware-tmc/default"),
        );

        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert!(report.is_clean());

        let tmc = fx.manager.catalog().list(&CatalogFilter::context("tmc")).unwrap();
        assert_eq!(names(&tmc), vec!["apply"]);
        assert_eq!(tmc[0].target, Target::MissionControl);
    }

    #[test]
    fn test_sync_removes_inactive_contexts() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(&fx, Context::new("prod", ContextType::Kubernetes));
        fx.manager.sync_plugins(&InstallOptions::default()).unwrap();

        activate(&fx, Context::new("dev", ContextType::Kubernetes));
        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();

        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].context_name.as_deref(), Some("prod"));
        assert!(fx
            .manager
            .catalog()
            .list(&CatalogFilter::context("prod"))
            .unwrap()
            .is_empty());
        assert_eq!(
            fx.manager.catalog().list(&CatalogFilter::context("dev")).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_sync_keeps_going_when_stale_removal_fails() {
        use crate::catalog::PluginCatalog;
        use fs2::FileExt;
        use std::fs::OpenOptions;
        use std::time::Duration;

        let mut fx = fixture(&sync_payload(RECOMMENDATIONS));
        fx.manager.catalog = PluginCatalog::new(&fx.manager.paths().plugin_root)
            .with_lock_timeout(Duration::from_millis(100));
        activate(&fx, Context::new("prod", ContextType::Kubernetes));
        activate(&fx, Context::new("tmc", ContextType::MissionControl));
        fx.manager.sync_plugins(&InstallOptions::default()).unwrap();

        let store = fx.manager.config_store();
        store.delete_context("prod").unwrap();
        store.delete_context("tmc").unwrap();

        let holder = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(fx.manager.catalog().lock_path())
            .unwrap();
        holder.lock_exclusive().unwrap();

        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|(_, e)| matches!(e, PluginError::CatalogBusy { .. })));

        FileExt::unlock(&holder).unwrap();
        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 2);
    }

    #[test]
    fn test_sync_collects_failures() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(&fx, Context::new("prod", ContextType::Kubernetes).with_group("bad-id"));
        fx.fetcher
            .fail_on(&reference("cluster", "kubernetes", "v1.1.0"));

        let report = fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        assert_eq!(report.failures.len(), 2);

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, PluginError::Aggregate { .. }));
        assert_eq!(err.exit_code(), 9);
    }

    #[test]
    fn test_delete_context_cascades() {
        let fx = fixture(&sync_payload(RECOMMENDATIONS));
        activate(&fx, Context::new("prod", ContextType::Kubernetes));
        fx.manager.sync_plugins(&InstallOptions::default()).unwrap();
        fx.manager
            .install_standalone_plugin(
                "cluster",
                "latest",
                Some(Target::Kubernetes),
                &InstallOptions::default(),
            )
            .unwrap();
        assert_eq!(fx.manager.get_installed_plugins().unwrap().len(), 2);

        let deletion = fx.manager.delete_context("prod").unwrap();
        assert_eq!(deletion.context.name, "prod");
        assert_eq!(names(&deletion.removed), vec!["cluster"]);
        assert!(!deletion.removed[0].installation_path.exists());
        assert!(!fx.manager.paths().context_dir("prod").exists());

        let left = fx.manager.get_installed_plugins().unwrap();
        assert_eq!(names(&left), vec!["cluster"]);
        assert_eq!(left[0].target, Target::Kubernetes);
        assert!(left[0].context_name.is_none());
        assert_eq!(left[0].version, "v2.0.0");
        assert!(left[0].installation_path.exists());
        assert_ne!(left[0].installation_path, deletion.removed[0].installation_path);
        assert!(fx.manager.config_store().context("prod").unwrap().is_none());

        let err = fx.manager.delete_context("prod").unwrap_err();
        assert!(matches!(err, PluginError::ContextNotFound { .. }));
    }
}
