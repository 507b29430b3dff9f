pub mod catalog;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod manager;
pub mod target;
pub mod version;

pub use catalog::{CatalogFilter, InstallScope, InstalledPluginRecord, PluginCatalog};
pub use config::{Config, FileConfigStore, Settings};
pub use context::{ConfigStore, Context};
pub use discovery::{
    ArtifactFetcher, DefaultFetcher, Discovered, DiscoveryClient, DiscoverySource, FetchOptions,
    SourceKind,
};
pub use error::{PluginError, Result};
pub use inventory::{
    GroupCriteria, GroupId, GroupPluginEntry, PluginCriteria, PluginGroup, PluginInventory,
};
pub use manager::{
    ContextDeletion, DeleteOptions, DiscoverOptions, DiscoveredPlugin, GroupInstallReport,
    InstallAction, InstallOptions, InstallOutcome, ManagerPaths, PluginManager, PluginStatus,
    SyncReport,
};
pub use target::{ContextType, PluginIdentifier, Target};
pub use version::{select_version, LATEST};
