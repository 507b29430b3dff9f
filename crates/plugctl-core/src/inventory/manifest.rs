//! Local directory manifests
//!
//! A local discovery source is a directory holding `plugin_manifest.json` (same
//! schema as a remote inventory) next to the plugin binaries it references.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PluginError, Result};
use crate::inventory::index::PluginInventory;

pub const MANIFEST_FILE: &str = "plugin_manifest.json";

/// Path of the manifest inside a local source directory
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Load a local source directory.
///
/// Relative artifact references are resolved against `dir`.
pub fn load_manifest(source_name: &str, dir: &Path) -> Result<PluginInventory> {
    let path = manifest_path(dir);

    if !path.exists() {
        return Err(PluginError::Fetch {
            locator: dir.display().to_string(),
            message: format!("{} not found", MANIFEST_FILE),
        });
    }

    let content = fs::read(&path)?;
    let mut inventory = PluginInventory::from_slice(source_name, &content)?;

    inventory.map_artifacts(|reference| {
        let stripped = reference.strip_prefix("file://").unwrap_or(reference);
        let candidate = Path::new(stripped);
        if candidate.is_absolute() {
            stripped.to_string()
        } else {
            dir.join(candidate).to_string_lossy().to_string()
        }
    });

    Ok(inventory)
}
