//! Discovery source definitions

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where an inventory is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// OCI image holding `inventory.json`
    Oci,
    /// Directory holding `plugin_manifest.json`
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oci => write!(f, "oci"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A configured discovery source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoverySource {
    /// Unique name
    pub name: String,
    pub kind: SourceKind,
    /// Image reference or directory path
    pub locator: String,
}

impl DiscoverySource {
    pub fn oci(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Oci,
            locator: image.to_string(),
        }
    }

    pub fn local(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Local,
            locator: path.to_string(),
        }
    }

    /// Infer the kind from a URI: existing paths and `file://` URIs are local
    pub fn from_uri(name: &str, uri: &str) -> Self {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if uri.starts_with("file://")
            || uri.starts_with('/')
            || uri.starts_with('.')
            || PathBuf::from(path).is_dir()
        {
            Self::local(name, path)
        } else {
            Self::oci(name, uri)
        }
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        match self.kind {
            SourceKind::Local => Some(PathBuf::from(&self.locator)),
            SourceKind::Oci => None,
        }
    }
}
