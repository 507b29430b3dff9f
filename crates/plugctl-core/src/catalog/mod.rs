//! Installed Plugin Catalog

pub mod record;
pub mod store;

pub use record::{CatalogFilter, InstallScope, InstalledPluginRecord};
pub use store::{PluginCatalog, CATALOG_FILE};
