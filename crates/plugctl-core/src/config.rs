use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{ConfigStore, Context};
use crate::discovery::DiscoverySource;
use crate::error::{PluginError, Result};
use crate::target::ContextType;

const CONFIG_FILE: &str = "config.toml";
const BASE_DIR_NAME: &str = ".plugctl";

/// `~/.plugctl`
pub fn default_base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(BASE_DIR_NAME))
        .ok_or(PluginError::HomeNotFound)
}

/// Default config template with rich comments
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# plugctl configuration file
# Location: ~/.plugctl/config.toml

[settings]
# How long a downloaded plugin inventory is considered fresh
# Default: 1800 (30 minutes)
cache_ttl_secs = 1800

# Upper bound for a single inventory or plugin download
# Default: 60
fetch_timeout_secs = 60

# How long to wait for another plugctl process to release the plugin catalog
# Default: 5000
lock_timeout_ms = 5000

# Feature flags
# Example: show-hidden-plugins = true
[features]

# Default version constraint per plugin group (latest stable when unset)
# Example: "vmware-tkg/default" = "v2.1"
[group_defaults]

# Discovery sources are managed with `plugctl plugin source add`
# [[discovery_sources]]
# name = "default"
# kind = "oci"
# locator = "registry.example.com/plugctl/plugin-inventory:latest"
"#;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Feature flags
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    /// Group id (`vendor-publisher/name`) -> default version constraint
    #[serde(default)]
    pub group_defaults: BTreeMap<String, String>,

    /// Active context name per context type
    #[serde(default)]
    pub current_context: BTreeMap<ContextType, String>,

    #[serde(default)]
    pub discovery_sources: Vec<DiscoverySource>,

    #[serde(default)]
    pub contexts: Vec<Context>,
}

/// Tunables of the discovery client and catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_cache_ttl() -> u64 {
    1800
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_lock_timeout() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Load config from base directory
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content).map_err(|e| PluginError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Save config to base directory
    pub fn save(&self, base_dir: &Path) -> Result<()> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        let content = toml::to_string_pretty(self)?;

        fs::write(&path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE)
    }

    /// Initialize config with default template (rich comments)
    pub fn init(base_dir: &Path) -> Result<PathBuf> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        if !path.exists() {
            fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        }

        Ok(path)
    }

    /// Get a config value by dot-notation key
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "settings.cache_ttl_secs" => Some(self.settings.cache_ttl_secs.to_string()),
            "settings.fetch_timeout_secs" => Some(self.settings.fetch_timeout_secs.to_string()),
            "settings.lock_timeout_ms" => Some(self.settings.lock_timeout_ms.to_string()),
            _ => {
                if let Some(feature) = key.strip_prefix("features.") {
                    return Some(self.feature(feature).to_string());
                }
                if let Some(group) = key.strip_prefix("group_defaults.") {
                    return self.group_defaults.get(group).cloned();
                }
                None
            }
        }
    }

    /// Set a config value by dot-notation key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "settings.cache_ttl_secs" => {
                self.settings.cache_ttl_secs = parse_number(key, value)?;
                Ok(())
            }
            "settings.fetch_timeout_secs" => {
                self.settings.fetch_timeout_secs = parse_number(key, value)?;
                Ok(())
            }
            "settings.lock_timeout_ms" => {
                self.settings.lock_timeout_ms = parse_number(key, value)?;
                Ok(())
            }
            _ => {
                if let Some(feature) = key.strip_prefix("features.") {
                    let enabled = parse_bool(key, value)?;
                    self.features.insert(feature.to_string(), enabled);
                    return Ok(());
                }
                if let Some(group) = key.strip_prefix("group_defaults.") {
                    group.parse::<crate::inventory::GroupId>()?;
                    self.group_defaults
                        .insert(group.to_string(), value.trim().to_string());
                    return Ok(());
                }
                Err(PluginError::ConfigKeyNotFound {
                    key: key.to_string(),
                })
            }
        }
    }

    /// List all config keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            (
                "settings.cache_ttl_secs".to_string(),
                self.settings.cache_ttl_secs.to_string(),
            ),
            (
                "settings.fetch_timeout_secs".to_string(),
                self.settings.fetch_timeout_secs.to_string(),
            ),
            (
                "settings.lock_timeout_ms".to_string(),
                self.settings.lock_timeout_ms.to_string(),
            ),
        ];
        for (name, enabled) in &self.features {
            entries.push((format!("features.{}", name), enabled.to_string()));
        }
        for (group, constraint) in &self.group_defaults {
            entries.push((format!("group_defaults.{}", group), constraint.clone()));
        }
        entries
    }

    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    // ========== Discovery Sources ==========

    pub fn add_source(&mut self, source: DiscoverySource) -> Result<()> {
        if self.discovery_sources.iter().any(|s| s.name == source.name) {
            return Err(PluginError::SourceAlreadyExists { name: source.name });
        }
        self.discovery_sources.push(source);
        Ok(())
    }

    pub fn remove_source(&mut self, name: &str) -> Result<DiscoverySource> {
        let idx = self
            .discovery_sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| PluginError::SourceNotFound {
                name: name.to_string(),
            })?;
        Ok(self.discovery_sources.remove(idx))
    }

    pub fn source(&self, name: &str) -> Option<&DiscoverySource> {
        self.discovery_sources.iter().find(|s| s.name == name)
    }

    // ========== Contexts ==========

    pub fn add_context(&mut self, context: Context) -> Result<()> {
        if self.contexts.iter().any(|c| c.name == context.name) {
            return Err(PluginError::ContextAlreadyExists { name: context.name });
        }
        self.contexts.push(context);
        Ok(())
    }

    pub fn set_active_context(&mut self, name: &str) -> Result<()> {
        let context_type = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.context_type)
            .ok_or_else(|| PluginError::ContextNotFound {
                name: name.to_string(),
            })?;
        self.current_context.insert(context_type, name.to_string());
        Ok(())
    }

    pub fn active_context(&self, context_type: ContextType) -> Option<&Context> {
        let name = self.current_context.get(&context_type)?;
        self.contexts
            .iter()
            .find(|c| &c.name == name && c.context_type == context_type)
    }

    pub fn remove_context(&mut self, name: &str) -> Result<Context> {
        let idx = self
            .contexts
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| PluginError::ContextNotFound {
                name: name.to_string(),
            })?;
        let context = self.contexts.remove(idx);
        self.current_context.retain(|_, active| active != name);
        Ok(context)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| PluginError::InvalidConfigValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(PluginError::InvalidConfigValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

/// [`ConfigStore`] over `config.toml`, re-read on every call
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    base_dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<Config> {
        Config::load(&self.base_dir)
    }

    fn update<T>(&self, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let mut config = self.load()?;
        let out = f(&mut config)?;
        config.save(&self.base_dir)?;
        Ok(out)
    }
}

impl ConfigStore for FileConfigStore {
    fn contexts(&self) -> Result<Vec<Context>> {
        Ok(self.load()?.contexts)
    }

    fn active_context(&self, context_type: ContextType) -> Result<Option<Context>> {
        Ok(self.load()?.active_context(context_type).cloned())
    }

    fn add_context(&self, context: Context) -> Result<()> {
        self.update(|c| c.add_context(context))
    }

    fn set_active_context(&self, name: &str) -> Result<()> {
        self.update(|c| c.set_active_context(name))
    }

    fn delete_context(&self, name: &str) -> Result<Context> {
        self.update(|c| c.remove_context(name))
    }

    fn discovery_sources(&self) -> Result<Vec<DiscoverySource>> {
        Ok(self.load()?.discovery_sources)
    }

    fn feature_enabled(&self, feature: &str) -> bool {
        self.load().map(|c| c.feature(feature)).unwrap_or(false)
    }

    fn group_default(&self, group: &str) -> Option<String> {
        self.load().ok()?.group_defaults.get(group).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_get_set() {
        let mut config = Config::default();

        config.set("settings.cache_ttl_secs", "60").unwrap();
        assert_eq!(config.settings.cache_ttl_secs, 60);
        assert_eq!(config.get("settings.cache_ttl_secs").unwrap(), "60");

        config.set("features.show-hidden-plugins", "true").unwrap();
        assert!(config.feature("show-hidden-plugins"));

        config.set("group_defaults.vmware-tkg/default", "v2.1").unwrap();
        assert_eq!(
            config.get("group_defaults.vmware-tkg/default").unwrap(),
            "v2.1"
        );
    }

    #[test]
    fn test_config_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("settings.cache_ttl_secs", "soon").is_err());
        assert!(config.set("features.x", "maybe").is_err());
        assert!(config.set("group_defaults.not-a-group", "v1").is_err());
        assert!(matches!(
            config.set("nope", "1"),
            Err(PluginError::ConfigKeyNotFound { .. })
        ));
    }

    #[test]
    fn test_template_parses() {
        let temp = TempDir::new().unwrap();
        Config::init(temp.path()).unwrap();
        let config = Config::load(temp.path()).unwrap();
        assert_eq!(config.settings.cache_ttl_secs, 1800);
        assert!(config.discovery_sources.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config
            .add_source(DiscoverySource::oci("default", "registry.example.com/inv:latest"))
            .unwrap();
        config
            .add_context(
                Context::new("prod", ContextType::Kubernetes).with_metadata("edition", "tkg"),
            )
            .unwrap();
        config.set_active_context("prod").unwrap();
        config.save(temp.path()).unwrap();

        let loaded = Config::load(temp.path()).unwrap();
        assert_eq!(loaded.discovery_sources.len(), 1);
        assert_eq!(
            loaded.active_context(ContextType::Kubernetes).unwrap().name,
            "prod"
        );
    }

    #[test]
    fn test_one_active_context_per_type() {
        let temp = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp.path().to_path_buf());
        store
            .add_context(Context::new("a", ContextType::Kubernetes))
            .unwrap();
        store
            .add_context(Context::new("b", ContextType::Kubernetes))
            .unwrap();
        store
            .add_context(Context::new("tmc", ContextType::MissionControl))
            .unwrap();

        store.set_active_context("a").unwrap();
        store.set_active_context("b").unwrap();
        store.set_active_context("tmc").unwrap();

        let active = store.active_contexts().unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(
            store.active_context(ContextType::Kubernetes).unwrap().unwrap().name,
            "b"
        );
    }

    #[test]
    fn test_delete_context_deactivates() {
        let temp = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp.path().to_path_buf());
        store
            .add_context(Context::new("a", ContextType::Kubernetes))
            .unwrap();
        store.set_active_context("a").unwrap();

        store.delete_context("a").unwrap();
        assert!(store.active_context(ContextType::Kubernetes).unwrap().is_none());
        assert!(store.delete_context("a").is_err());
    }

    #[test]
    fn test_duplicate_source() {
        let mut config = Config::default();
        config
            .add_source(DiscoverySource::local("dev", "/tmp/dev"))
            .unwrap();
        assert!(config
            .add_source(DiscoverySource::local("dev", "/tmp/other"))
            .is_err());
        assert!(config.remove_source("dev").is_ok());
        assert!(config.remove_source("dev").is_err());
    }
}
