//! Inventory type definitions
//!
//! Types for the JSON inventory payload published by a discovery source, plus
//! the plugin-group model built from it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};
use crate::target::{ContextType, Target};
use crate::version::{self, LATEST};

/// Inventory payload (inventory.json / plugin_manifest.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryPayload {
    /// Available plugins
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
    /// Available plugin groups
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    /// Plugins recommended for contexts
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

/// Plugin entry in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Plugin name
    pub name: String,
    /// Target the plugin operates against
    #[serde(default = "default_target")]
    pub target: Target,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Vendor
    #[serde(default)]
    pub vendor: String,
    /// Publisher
    #[serde(default)]
    pub publisher: String,
    /// Hidden plugins are only listed on request
    #[serde(default)]
    pub hidden: bool,
    /// Published versions
    #[serde(default)]
    pub versions: Vec<PluginVersionEntry>,
}

fn default_target() -> Target {
    Target::Global
}

/// One published version of a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginVersionEntry {
    /// Semantic version
    pub version: String,
    /// Version-specific description
    #[serde(default)]
    pub description: Option<String>,
    /// Binaries, one per platform
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Must install successfully whenever a group lists this version
    #[serde(default)]
    pub mandatory: bool,
}

/// Fetchable plugin binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Operating system (any when absent)
    #[serde(default)]
    pub os: Option<String>,
    /// CPU architecture (any when absent)
    #[serde(default)]
    pub arch: Option<String>,
    /// OCI image reference or filesystem path
    pub reference: String,
    /// `sha256:<hex>` digest of the binary
    #[serde(default)]
    pub digest: Option<String>,
}

impl Artifact {
    /// Whether this artifact runs on `os`/`arch`
    pub fn matches_platform(&self, os: &str, arch: &str) -> bool {
        self.os.as_deref().map_or(true, |o| o == os)
            && self.arch.as_deref().map_or(true, |a| a == arch)
    }
}

/// Plugin group entry in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub versions: Vec<GroupVersionEntry>,
}

/// The plugin list of one group version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupVersionEntry {
    pub version: String,
    #[serde(default)]
    pub plugins: Vec<GroupPluginEntry>,
}

/// A plugin pinned by a group version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPluginEntry {
    pub name: String,
    #[serde(default = "default_target")]
    pub target: Target,
    pub version: String,
    /// Installed by context sync rather than group install
    #[serde(default)]
    pub context_scoped: bool,
    /// Group install fails when this plugin fails
    #[serde(default)]
    pub mandatory: bool,
}

/// Plugins a source recommends for contexts of a type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub context_type: ContextType,
    /// Context metadata that must be present for this recommendation to apply
    #[serde(default, rename = "match")]
    pub selector: BTreeMap<String, String>,
    #[serde(default)]
    pub plugins: Vec<PluginRequest>,
}

impl Recommendation {
    /// Whether this recommendation applies to a context
    pub fn applies_to(
        &self,
        context_type: ContextType,
        metadata: &BTreeMap<String, String>,
    ) -> bool {
        self.context_type == context_type
            && self
                .selector
                .iter()
                .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
    }
}

/// A requested plugin with a version constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub name: String,
    #[serde(default = "default_target")]
    pub target: Target,
    #[serde(default = "default_constraint")]
    pub version: String,
}

fn default_constraint() -> String {
    LATEST.to_string()
}

/// `vendor-publisher/name[:version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    pub version: Option<String>,
}

impl GroupId {
    pub fn new(vendor: &str, publisher: &str, name: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            publisher: publisher.to_string(),
            name: name.to_string(),
            version: None,
        }
    }

    /// Id without the version part
    pub fn base(&self) -> String {
        format!("{}-{}/{}", self.vendor, self.publisher, self.name)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}", self.base(), v),
            None => f.write_str(&self.base()),
        }
    }
}

impl FromStr for GroupId {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PluginError::InvalidGroupId { id: s.to_string() };

        let (path, version) = match s.split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_string())),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };
        let (vendor_publisher, name) = path.split_once('/').ok_or_else(invalid)?;
        let (vendor, publisher) = vendor_publisher.split_once('-').ok_or_else(invalid)?;

        if [vendor, publisher, name].iter().any(|p| p.is_empty()) || name.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            vendor: vendor.to_string(),
            publisher: publisher.to_string(),
            name: name.to_string(),
            version,
        })
    }
}

/// A plugin group and its versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginGroup {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    pub description: String,
    pub hidden: bool,
    /// group version -> pinned plugins, in publication order
    pub versions: BTreeMap<String, Vec<GroupPluginEntry>>,
}

impl PluginGroup {
    pub fn id(&self) -> GroupId {
        GroupId::new(&self.vendor, &self.publisher, &self.name)
    }

    /// Group versions in ascending semver order
    pub fn sorted_versions(&self) -> Vec<String> {
        let keys: Vec<&String> = self.versions.keys().collect();
        version::sort_versions(&keys)
    }

    /// Highest stable group version
    pub fn recommended_version(&self) -> Option<String> {
        let keys: Vec<&String> = self.versions.keys().collect();
        version::select_version(&keys, LATEST).ok()
    }

    /// Plugins of a group version
    pub fn plugins(&self, version: &str) -> Option<&[GroupPluginEntry]> {
        self.versions.get(version).map(Vec::as_slice)
    }

    pub(crate) fn from_entry(entry: GroupEntry) -> Self {
        let mut versions = BTreeMap::new();
        for v in entry.versions {
            versions.insert(v.version, v.plugins);
        }
        Self {
            vendor: entry.vendor,
            publisher: entry.publisher,
            name: entry.name,
            description: entry.description,
            hidden: entry.hidden,
            versions,
        }
    }

    /// Merge versions of the same group published by another source.
    /// Versions already present are kept.
    pub(crate) fn merge(&mut self, other: &PluginGroup) {
        for (version, plugins) in &other.versions {
            self.versions
                .entry(version.clone())
                .or_insert_with(|| plugins.clone());
        }
        if self.description.is_empty() {
            self.description = other.description.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let json = r#"{
            "plugins": [
                {
                    "name": "cluster",
                    "target": "k8s",
                    "description": "Kubernetes cluster operations",
                    "versions": [
                        {
                            "version": "v1.0.0",
                            "artifacts": [
                                {"os": "linux", "arch": "x86_64", "reference": "registry.example.com/cluster:v1.0.0"}
                            ]
                        }
                    ]
                }
            ],
            "groups": [
                {
                    "vendor": "vmware",
                    "publisher": "tkg",
                    "name": "default",
                    "versions": [
                        {"version": "v2.1.0", "plugins": [
                            {"name": "cluster", "target": "kubernetes", "version": "v1.0.0", "mandatory": true},
                            {"name": "feature", "target": "kubernetes", "version": "v1.0.0", "contextScoped": true}
                        ]}
                    ]
                }
            ]
        }"#;

        let payload: InventoryPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.plugins.len(), 1);
        assert_eq!(payload.plugins[0].target, Target::Kubernetes);
        assert!(payload.recommendations.is_empty());

        let group = &payload.groups[0].versions[0];
        assert!(group.plugins[0].mandatory);
        assert!(!group.plugins[0].context_scoped);
        assert!(group.plugins[1].context_scoped);
        assert!(!group.plugins[1].mandatory);
    }

    #[test]
    fn test_artifact_platform_match() {
        let any = Artifact {
            os: None,
            arch: None,
            reference: "/tmp/bin".into(),
            digest: None,
        };
        assert!(any.matches_platform("linux", "aarch64"));

        let linux = Artifact {
            os: Some("linux".into()),
            arch: Some("x86_64".into()),
            reference: "/tmp/bin".into(),
            digest: None,
        };
        assert!(linux.matches_platform("linux", "x86_64"));
        assert!(!linux.matches_platform("macos", "x86_64"));
    }

    #[test]
    fn test_group_id_parse() {
        let id: GroupId = "vmware-tkg/default:v2.1.0".parse().unwrap();
        assert_eq!(id.vendor, "vmware");
        assert_eq!(id.publisher, "tkg");
        assert_eq!(id.name, "default");
        assert_eq!(id.version.as_deref(), Some("v2.1.0"));
        assert_eq!(id.to_string(), "vmware-tkg/default:v2.1.0");

        let id: GroupId = "vmware-tanzu-platform/essentials".parse().unwrap();
        assert_eq!(id.publisher, "tanzu-platform");
        assert!(id.version.is_none());
    }

    #[test]
    fn test_group_id_invalid() {
        assert!("default".parse::<GroupId>().is_err());
        assert!("vmware/default".parse::<GroupId>().is_err());
        assert!("vmware-tkg/".parse::<GroupId>().is_err());
        assert!("vmware-tkg/default:".parse::<GroupId>().is_err());
    }

    #[test]
    fn test_group_recommended_version() {
        let entry = GroupEntry {
            vendor: "vmware".into(),
            publisher: "tkg".into(),
            name: "default".into(),
            description: String::new(),
            hidden: false,
            versions: vec![
                GroupVersionEntry {
                    version: "v2.1.0".into(),
                    plugins: vec![],
                },
                GroupVersionEntry {
                    version: "v2.10.0".into(),
                    plugins: vec![],
                },
                GroupVersionEntry {
                    version: "v3.0.0-beta.1".into(),
                    plugins: vec![],
                },
            ],
        };
        let group = PluginGroup::from_entry(entry);
        assert_eq!(group.recommended_version().as_deref(), Some("v2.10.0"));
        assert_eq!(
            group.sorted_versions(),
            vec!["v2.1.0", "v2.10.0", "v3.0.0-beta.1"]
        );
    }

    #[test]
    fn test_recommendation_selector() {
        let rec = Recommendation {
            context_type: ContextType::Kubernetes,
            selector: BTreeMap::from([("edition".to_string(), "tkg".to_string())]),
            plugins: vec![],
        };

        let mut metadata = BTreeMap::new();
        assert!(!rec.applies_to(ContextType::Kubernetes, &metadata));

        metadata.insert("edition".to_string(), "tkg".to_string());
        assert!(rec.applies_to(ContextType::Kubernetes, &metadata));
        assert!(!rec.applies_to(ContextType::MissionControl, &metadata));
    }
}
