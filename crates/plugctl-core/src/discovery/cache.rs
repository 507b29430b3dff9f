//! Inventory Cache
//!
//! One JSON file per discovery source under `{cache_dir}/inventory/`, holding
//! the raw payload and the time it was fetched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::discovery::source::DiscoverySource;
use crate::error::Result;

const INVENTORY_DIR: &str = "inventory";
const NAME_HASH_LEN: usize = 8;

/// Cached payload of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCache {
    /// Locator the payload was fetched from
    pub locator: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: String,
}

impl InventoryCache {
    pub fn new(locator: &str, payload: &[u8]) -> Self {
        Self {
            locator: locator.to_string(),
            fetched_at: Utc::now(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Reads and writes cache files
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join(INVENTORY_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{sanitized name}-{hash of the name}.json`; the hash keeps names that
    /// sanitize alike apart
    pub fn path(&self, source: &DiscoverySource) -> PathBuf {
        let readable: String = source
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let hash = Sha256::digest(source.name.as_bytes());
        let suffix = hex::encode(&hash[..NAME_HASH_LEN]);
        self.dir.join(format!("{}-{}.json", readable, suffix))
    }

    /// Cached payload of `source`.
    ///
    /// Unreadable files and caches of a different locator count as absent.
    pub fn load(&self, source: &DiscoverySource) -> Result<Option<InventoryCache>> {
        let path = self.path(source);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let cache: InventoryCache = match serde_json::from_str(&content) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "discarding unreadable inventory cache"
                );
                return Ok(None);
            }
        };

        if cache.locator != source.locator {
            tracing::debug!(
                source = %source.name,
                "inventory cache belongs to a previous locator"
            );
            return Ok(None);
        }

        Ok(Some(cache))
    }

    /// Write the cache file atomically
    pub fn save(&self, source: &DiscoverySource, cache: &InventoryCache) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let content = serde_json::to_string(cache)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(self.path(source)).map_err(|e| e.error)?;

        Ok(())
    }

    pub fn remove(&self, source: &DiscoverySource) -> Result<()> {
        let path = self.path(source);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let source = DiscoverySource::oci("default", "registry.example.com/inv:latest");

        assert!(store.load(&source).unwrap().is_none());

        store
            .save(&source, &InventoryCache::new(&source.locator, b"{}"))
            .unwrap();
        let loaded = store.load(&source).unwrap().unwrap();
        assert_eq!(loaded.payload, "{}");
        assert!(loaded.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn test_locator_change_invalidates() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let source = DiscoverySource::oci("default", "registry.example.com/inv:v1");
        store
            .save(&source, &InventoryCache::new(&source.locator, b"{}"))
            .unwrap();

        let moved = DiscoverySource::oci("default", "registry.example.com/inv:v2");
        assert!(store.load(&moved).unwrap().is_none());
    }

    #[test]
    fn test_garbage_cache_is_absent() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let source = DiscoverySource::oci("default", "registry.example.com/inv:latest");
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path(&source), "garbage").unwrap();

        assert!(store.load(&source).unwrap().is_none());
    }

    #[test]
    fn test_expired() {
        let mut cache = InventoryCache::new("loc", b"{}");
        cache.fetched_at = Utc::now() - chrono::Duration::minutes(10);
        assert!(!cache.is_fresh(Duration::from_secs(5 * 60)));
        assert!(cache.age() >= Duration::from_secs(10 * 60 - 1));
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let store = CacheStore::new(Path::new("/cache"));
        let source = DiscoverySource::oci("team/dev sources", "x");
        let path = store.path(&source);

        assert_eq!(path.parent(), Some(Path::new("/cache/inventory")));
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("team_dev_sources-"));
        assert!(file_name.ends_with(".json"));
        assert_eq!(store.path(&source), path);
    }

    #[test]
    fn test_similar_names_do_not_share_a_file() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let dotted = DiscoverySource::oci("a.b", "registry.example.com/inv:latest");
        let underscored = DiscoverySource::oci("a_b", "registry.example.com/inv:latest");
        assert_ne!(store.path(&dotted), store.path(&underscored));

        store
            .save(&dotted, &InventoryCache::new(&dotted.locator, br#"{"plugins": []}"#))
            .unwrap();
        store
            .save(&underscored, &InventoryCache::new(&underscored.locator, b"{}"))
            .unwrap();

        assert_eq!(
            store.load(&dotted).unwrap().unwrap().payload,
            r#"{"plugins": []}"#
        );
        assert_eq!(store.load(&underscored).unwrap().unwrap().payload, "{}");
    }
}
