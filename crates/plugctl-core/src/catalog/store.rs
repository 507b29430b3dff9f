//! Installed Plugin Catalog
//!
//! `catalog.json` under the plugin root, one section for standalone installs
//! and one per context. Writers hold an exclusive advisory lock on
//! `catalog.lock` and replace the file atomically; readers re-open the file on
//! every call.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::catalog::record::{CatalogFilter, InstallScope, InstalledPluginRecord};
use crate::context::ConfigStore;
use crate::error::{PluginError, Result};
use crate::target::PluginIdentifier;

pub const CATALOG_FILE: &str = "catalog.json";
pub const LOCK_FILE: &str = "catalog.lock";

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    standalone: BTreeMap<String, InstalledPluginRecord>,
    #[serde(default)]
    contexts: BTreeMap<String, BTreeMap<String, InstalledPluginRecord>>,
}

impl CatalogData {
    fn section_mut(
        &mut self,
        context: Option<&str>,
    ) -> &mut BTreeMap<String, InstalledPluginRecord> {
        match context {
            None => &mut self.standalone,
            Some(ctx) => self.contexts.entry(ctx.to_string()).or_default(),
        }
    }

    fn section(&self, context: Option<&str>) -> Option<&BTreeMap<String, InstalledPluginRecord>> {
        match context {
            None => Some(&self.standalone),
            Some(ctx) => self.contexts.get(ctx),
        }
    }

    fn insert(&mut self, mut record: InstalledPluginRecord) {
        let context = match record.scope {
            InstallScope::Standalone => None,
            InstallScope::Context => record.context_name.clone(),
        };
        let section = self.section_mut(context.as_deref());
        let key = record_key(&record.identifier());
        if let Some(existing) = section.get(&key) {
            record.installed_at = existing.installed_at;
        }
        record.updated_at = Utc::now();
        section.insert(key, record);
    }

    fn records(&self) -> impl Iterator<Item = &InstalledPluginRecord> {
        self.standalone
            .values()
            .chain(self.contexts.values().flat_map(|s| s.values()))
    }
}

/// Exclusive lock held for the duration of a mutation
struct CatalogLock {
    file: File,
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// File-backed record store of installed plugins
#[derive(Debug, Clone)]
pub struct PluginCatalog {
    root: PathBuf,
    lock_timeout: Duration,
}

impl PluginCatalog {
    pub fn new(plugin_root: &Path) -> Self {
        Self {
            root: plugin_root.to_path_buf(),
            lock_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    // ========== Reads ==========

    /// Record of `id` in the standalone section, or in `context`'s section
    pub fn get(
        &self,
        id: &PluginIdentifier,
        context: Option<&str>,
    ) -> Result<Option<InstalledPluginRecord>> {
        let data = self.read()?;
        Ok(data
            .section(context)
            .and_then(|s| s.get(&record_key(id)))
            .cloned())
    }

    /// Records matching `filter`, ordered by name, target then context
    pub fn list(&self, filter: &CatalogFilter) -> Result<Vec<InstalledPluginRecord>> {
        let data = self.read()?;
        let mut records: Vec<InstalledPluginRecord> =
            data.records().filter(|r| filter.matches(r)).cloned().collect();
        records.sort_by(|a, b| {
            (&a.name, a.target, &a.context_name).cmp(&(&b.name, b.target, &b.context_name))
        });
        Ok(records)
    }

    /// Whether a record is usable: its binary exists and, for context records,
    /// the owning context is the active one of its type
    pub fn is_active(
        &self,
        record: &InstalledPluginRecord,
        store: &dyn ConfigStore,
    ) -> Result<bool> {
        if !record.installation_path.exists() {
            return Ok(false);
        }
        let Some(ctx_name) = record.context_name.as_deref() else {
            return Ok(true);
        };
        let Some(ctx) = store.context(ctx_name)? else {
            return Ok(false);
        };
        Ok(store
            .active_context(ctx.context_type)?
            .is_some_and(|active| active.name == ctx_name))
    }

    // ========== Mutations ==========

    /// Insert or replace a record, keeping the original install time
    pub fn upsert(&self, record: InstalledPluginRecord) -> Result<()> {
        self.upsert_with(record, || Ok(()))
    }

    /// Run `commit` while holding the catalog lock, then record `record`.
    ///
    /// Nothing is recorded when `commit` fails, and `commit` never runs when
    /// the lock cannot be taken.
    pub fn upsert_with(
        &self,
        record: InstalledPluginRecord,
        commit: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        self.modify(|data| {
            commit()?;
            data.insert(record);
            Ok(())
        })
    }

    /// Remove one record
    pub fn delete(
        &self,
        id: &PluginIdentifier,
        context: Option<&str>,
    ) -> Result<Option<InstalledPluginRecord>> {
        self.modify(|data| {
            let removed = data.section_mut(context).remove(&record_key(id));
            if let Some(ctx) = context {
                if data.contexts.get(ctx).is_some_and(BTreeMap::is_empty) {
                    data.contexts.remove(ctx);
                }
            }
            Ok(removed)
        })
    }

    /// Remove every record of a context
    pub fn delete_context(&self, context: &str) -> Result<Vec<InstalledPluginRecord>> {
        self.modify(|data| {
            Ok(data
                .contexts
                .remove(context)
                .map(|s| s.into_values().collect())
                .unwrap_or_default())
        })
    }

    /// Remove all records
    pub fn clear(&self) -> Result<()> {
        let _lock = self.lock()?;
        let path = self.path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    // ========== Internals ==========

    fn read(&self) -> Result<CatalogData> {
        let path = self.path();
        if !path.exists() {
            return Ok(CatalogData::default());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(CatalogData::default());
        }
        serde_json::from_str(&content).map_err(|e| PluginError::CatalogCorrupt {
            path,
            message: e.to_string(),
        })
    }

    fn write(&self, data: &CatalogData) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(self.path()).map_err(|e| e.error)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut CatalogData) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        let mut data = self.read()?;
        let out = f(&mut data)?;
        self.write(&data)?;
        Ok(out)
    }

    fn lock(&self) -> Result<CatalogLock> {
        fs::create_dir_all(&self.root)?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(CatalogLock { file }),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "catalog lock not acquired");
                    return Err(PluginError::CatalogBusy { path });
                }
            }
        }
    }
}

fn record_key(id: &PluginIdentifier) -> String {
    format!("{}:{}", id.name, id.target)
}
