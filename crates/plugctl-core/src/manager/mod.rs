//! Plugin Manager
//!
//! Computes and applies the actions needed to satisfy a request: single plugin
//! install, plugin-group install, context-driven sync and deletion.
//!
//! - `install`: standalone install and upgrade
//! - `group`: plugin-group queries and install
//! - `sync`: context-driven sync and context deletion
//! - `delete`: plugin deletion and clean
//! - `discover`: discovered and installed plugin listings

mod delete;
mod discover;
mod group;
mod install;
mod sync;

pub use delete::DeleteOptions;
pub use discover::{DiscoverOptions, DiscoveredPlugin, PluginStatus};
pub use group::GroupInstallReport;
pub use install::{InstallAction, InstallOptions, InstallOutcome};
pub use sync::{ContextDeletion, SyncReport};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::PluginCatalog;
use crate::config::Settings;
use crate::context::ConfigStore;
use crate::discovery::{ArtifactFetcher, Discovered, DiscoveryClient, FetchOptions};
use crate::error::{PluginError, Result};
use crate::inventory::PluginInventory;
use crate::target::PluginIdentifier;

/// Feature flag that makes hidden plugins and groups discoverable
pub const FEATURE_SHOW_HIDDEN: &str = "show-hidden-plugins";

const PLUGINS_DIR: &str = "plugins";
const CACHE_DIR: &str = "cache";
const CONTEXTS_DIR: &str = "contexts";

/// Directories the manager owns
#[derive(Debug, Clone)]
pub struct ManagerPaths {
    /// Plugin binaries and the catalog
    pub plugin_root: PathBuf,
    /// Inventory caches
    pub cache_dir: PathBuf,
}

impl ManagerPaths {
    pub fn from_base_dir(base_dir: &Path) -> Self {
        Self {
            plugin_root: base_dir.join(PLUGINS_DIR),
            cache_dir: base_dir.join(CACHE_DIR),
        }
    }

    /// Binary location of a plugin, standalone or owned by `context`
    pub fn install_path(&self, id: &PluginIdentifier, context: Option<&str>) -> PathBuf {
        let file_name = format!("{}_{}", id.name, id.target);
        match context {
            None => self.plugin_root.join(file_name),
            Some(ctx) => self.context_dir(ctx).join(file_name),
        }
    }

    pub fn context_dir(&self, context: &str) -> PathBuf {
        self.plugin_root.join(CONTEXTS_DIR).join(context)
    }
}

/// Operating system and architecture in inventory spelling (`darwin`, `amd64`)
pub fn current_platform() -> (String, String) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

/// Plugin Manager
pub struct PluginManager {
    paths: ManagerPaths,
    client: DiscoveryClient,
    catalog: PluginCatalog,
    fetcher: Arc<dyn ArtifactFetcher>,
    config: Box<dyn ConfigStore>,
    os: String,
    arch: String,
}

impl PluginManager {
    pub fn new(
        paths: ManagerPaths,
        settings: &Settings,
        fetcher: Arc<dyn ArtifactFetcher>,
        config: Box<dyn ConfigStore>,
    ) -> Self {
        let client = DiscoveryClient::new(fetcher.clone(), &paths.cache_dir)
            .with_ttl(settings.cache_ttl())
            .with_fetch_timeout(settings.fetch_timeout());
        let catalog =
            PluginCatalog::new(&paths.plugin_root).with_lock_timeout(settings.lock_timeout());
        let (os, arch) = current_platform();

        Self {
            paths,
            client,
            catalog,
            fetcher,
            config,
            os,
            arch,
        }
    }

    /// Install artifacts of another platform
    pub fn with_platform(mut self, os: &str, arch: &str) -> Self {
        self.os = os.to_string();
        self.arch = arch.to_string();
        self
    }

    pub fn paths(&self) -> &ManagerPaths {
        &self.paths
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn client(&self) -> &DiscoveryClient {
        &self.client
    }

    pub fn config_store(&self) -> &dyn ConfigStore {
        self.config.as_ref()
    }

    /// Force-refresh every configured source
    pub fn refresh_sources(&self) -> Result<Discovered<Arc<PluginInventory>>> {
        self.indexes(&FetchOptions::refresh())
    }

    // ========== Internals ==========

    /// Indexes of every configured source
    pub(crate) fn indexes(&self, opts: &FetchOptions) -> Result<Discovered<Arc<PluginInventory>>> {
        let sources = self.config.discovery_sources()?;
        if sources.is_empty() {
            return Err(PluginError::NoDiscoverySources);
        }
        Ok(self.client.get_indexes(&sources, opts))
    }

    pub(crate) fn show_hidden(&self) -> bool {
        self.config.feature_enabled(FEATURE_SHOW_HIDDEN)
    }
}
