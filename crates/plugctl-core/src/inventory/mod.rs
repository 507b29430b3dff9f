//! Plugin Inventory
//!
//! What plugins and plugin groups exist, at which versions, for which targets.
//!
//! - `types`: payload schema and the plugin-group model
//! - `index`: the queryable index built from a payload
//! - `manifest`: loading local directory sources

pub mod index;
pub mod manifest;
pub mod types;

pub use index::{GroupCriteria, IndexedPlugin, PluginCriteria, PluginInventory};
pub use manifest::load_manifest;
pub use types::{
    Artifact, GroupEntry, GroupId, GroupPluginEntry, GroupVersionEntry, InventoryPayload,
    PluginEntry, PluginGroup, PluginRequest, PluginVersionEntry, Recommendation,
};
