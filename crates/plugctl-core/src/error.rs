use std::path::PathBuf;
use thiserror::Error;

use crate::target::Target;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Version '{constraint}' not found for {subject} (available: {available:?})")]
    VersionNotFound {
        subject: String,
        constraint: String,
        available: Vec<String>,
    },

    #[error("Plugin '{name}' exists for multiple targets: {targets:?}")]
    AmbiguousPlugin { name: String, targets: Vec<Target> },

    #[error("Inventory from '{source_name}' is corrupt: {message}")]
    InventoryCorrupt {
        source_name: String,
        message: String,
    },

    #[error("No cached inventory for discovery source '{source_name}'")]
    CacheEmpty { source_name: String },

    #[error("Plugin catalog is locked by another process: {path}")]
    CatalogBusy { path: PathBuf },

    #[error("Plugin catalog is corrupt: {path}: {message}")]
    CatalogCorrupt { path: PathBuf, message: String },

    #[error("Plugin '{name}' is not installed{}", target_suffix(.target))]
    NotInstalled {
        name: String,
        target: Option<Target>,
    },

    #[error("Timed out after {seconds}s fetching from '{locator}'")]
    FetchTimeout { locator: String, seconds: u64 },

    #[error("Plugin '{name}' is not part of plugin group '{group}'")]
    PluginNotFoundInGroup { name: String, group: String },

    #[error("Version '{version}' of plugin group '{group}' not found")]
    GroupVersionNotFound { group: String, version: String },

    #[error("Plugin '{name}'{} not found in any discovery source", target_suffix(.target))]
    PluginNotFound {
        name: String,
        target: Option<Target>,
    },

    #[error("Plugin group '{group}' not found")]
    GroupNotFound { group: String },

    #[error("Invalid plugin group id '{id}' - expected vendor-publisher/name[:version]")]
    InvalidGroupId { id: String },

    #[error("Invalid target: '{value}'")]
    InvalidTarget { value: String },

    #[error("Invalid context type: '{value}'")]
    InvalidContextType { value: String },

    #[error("Context not found: {name}")]
    ContextNotFound { name: String },

    #[error("Context already exists: {name}")]
    ContextAlreadyExists { name: String },

    #[error("Discovery source not found: {name}")]
    SourceNotFound { name: String },

    #[error("Discovery source already exists: {name}")]
    SourceAlreadyExists { name: String },

    #[error("No discovery sources configured")]
    NoDiscoverySources,

    #[error("Deleting 'all' plugins requires an explicit target")]
    AllRequiresTarget,

    #[error("Plugin '{name}' of group '{group}' is context-scoped and is installed by sync")]
    ContextScopedPlugin { name: String, group: String },

    #[error("Mandatory plugin '{plugin}' of group '{group}' failed to install: {reason}")]
    GroupInstallFailed {
        group: String,
        plugin: String,
        reason: String,
    },

    #[error("Digest mismatch for '{reference}': expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("Fetch failed for '{locator}': {message}")]
    Fetch { locator: String, message: String },

    #[error("No artifact of plugin '{name}' {version} for platform {os}/{arch}")]
    NoArtifactForPlatform {
        name: String,
        version: String,
        os: String,
        arch: String,
    },

    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Unknown config key: {key}")]
    ConfigKeyNotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidConfigValue { key: String, message: String },

    #[error("Home directory not found")]
    HomeNotFound,

    #[error("{} operation(s) failed:\n{}", .errors.len(), format_aggregate(.errors))]
    Aggregate { errors: Vec<(String, PluginError)> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;

fn target_suffix(target: &Option<Target>) -> String {
    target
        .map(|t| format!(" (target: {})", t))
        .unwrap_or_default()
}

fn format_aggregate(errors: &[(String, PluginError)]) -> String {
    errors
        .iter()
        .map(|(subject, e)| format!("  {}: {}", subject, e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PluginError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PluginNotFound { .. } | Self::GroupNotFound { .. } => 2,
            Self::VersionNotFound { .. } | Self::GroupVersionNotFound { .. } => 3,
            Self::AmbiguousPlugin { .. } | Self::AllRequiresTarget => 4,
            Self::NotInstalled { .. } => 5,
            Self::CatalogBusy { .. } => 6,
            Self::CatalogCorrupt { .. } => 7,
            Self::FetchTimeout { .. } => 8,
            Self::Aggregate { .. } => 9,
            _ => 1,
        }
    }

    /// Remediation shown under the error message, when there is one.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::AmbiguousPlugin { name, .. } => Some(format!(
                "specify the target with `--target`, e.g. `plugctl plugin install {} --target kubernetes`",
                name
            )),
            Self::VersionNotFound { .. } => {
                Some("run `plugctl plugin search --name <plugin>` to see available versions".into())
            }
            Self::PluginNotFound { .. } => Some(
                "run `plugctl plugin search` to see available plugins, or `plugctl plugin refresh` to update the inventory".into(),
            ),
            Self::GroupNotFound { .. } | Self::GroupVersionNotFound { .. } => Some(
                "the plugin-group for the specified name/version was not found - run `plugctl plugin group search` to see available groups".into(),
            ),
            Self::PluginNotFoundInGroup { group, .. } => Some(format!(
                "run `plugctl plugin group get {}` to list the plugins of the group",
                group
            )),
            Self::CacheEmpty { .. } => {
                Some("run `plugctl plugin refresh` while online to populate the cache".into())
            }
            Self::CatalogBusy { .. } => {
                Some("another plugctl process is modifying plugins; retry shortly".into())
            }
            Self::CatalogCorrupt { .. } => {
                Some("run `plugctl plugin clean` to reset the plugin catalog".into())
            }
            Self::NotInstalled { .. } => {
                Some("run `plugctl plugin list` to see installed plugins".into())
            }
            Self::NoDiscoverySources => {
                Some("add one with `plugctl plugin source add <name> --uri <image-or-path>`".into())
            }
            Self::FetchTimeout { .. } => {
                Some("check network connectivity or raise `settings.fetch_timeout_secs`".into())
            }
            Self::ContextScopedPlugin { .. } => {
                Some("create or activate a matching context and run `plugctl plugin sync`".into())
            }
            Self::HomeNotFound => Some("pass `--base-dir` or set PLUGCTL_HOME".into()),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CatalogBusy { .. } | Self::FetchTimeout { .. })
    }
}
