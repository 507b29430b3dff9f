//! Discovery Source Client
//!
//! Resolves a [`DiscoverySource`] to a [`PluginInventory`], going through the
//! inventory cache. Concurrent refreshes of the same source inside one process
//! share a single fetch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;

use crate::discovery::cache::{CacheStore, InventoryCache};
use crate::discovery::fetcher::ArtifactFetcher;
use crate::discovery::source::{DiscoverySource, SourceKind};
use crate::error::{PluginError, Result};
use crate::inventory::{load_manifest, PluginInventory};

/// Per-call cache policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Refetch regardless of cache age
    pub force_refresh: bool,
    /// Never touch the network
    pub local_cache_only: bool,
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            local_cache_only: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            force_refresh: false,
            local_cache_only: true,
        }
    }
}

/// A source that could not be queried
#[derive(Debug)]
pub struct SourceFailure {
    pub source: String,
    pub error: PluginError,
}

/// Partial results of a multi-source query
#[derive(Debug)]
pub struct Discovered<T> {
    pub items: Vec<T>,
    pub failures: Vec<SourceFailure>,
}

impl<T> Discovered<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold the failures into one aggregate error, if any
    pub fn failure_error(&mut self) -> Option<PluginError> {
        if self.failures.is_empty() {
            return None;
        }
        let errors = self
            .failures
            .drain(..)
            .map(|f| (f.source, f.error))
            .collect();
        Some(PluginError::Aggregate { errors })
    }
}

/// Clonable form of a fetch error, shared with single-flight waiters
#[derive(Debug, Clone)]
enum FetchFailure {
    Timeout { locator: String, seconds: u64 },
    Corrupt { source_name: String, message: String },
    Other { locator: String, message: String },
}

impl FetchFailure {
    fn from_error(source: &DiscoverySource, error: PluginError) -> Self {
        match error {
            PluginError::FetchTimeout { locator, seconds } => Self::Timeout { locator, seconds },
            PluginError::InventoryCorrupt {
                source_name,
                message,
            } => Self::Corrupt {
                source_name,
                message,
            },
            PluginError::Fetch { locator, message } => Self::Other { locator, message },
            other => Self::Other {
                locator: source.locator.clone(),
                message: other.to_string(),
            },
        }
    }
}

impl From<FetchFailure> for PluginError {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Timeout { locator, seconds } => {
                PluginError::FetchTimeout { locator, seconds }
            }
            FetchFailure::Corrupt {
                source_name,
                message,
            } => PluginError::InventoryCorrupt {
                source_name,
                message,
            },
            FetchFailure::Other { locator, message } => PluginError::Fetch { locator, message },
        }
    }
}

type SharedFetch = std::result::Result<Arc<PluginInventory>, FetchFailure>;

/// Parsed cache entry kept for the lifetime of the client
#[derive(Debug, Clone)]
struct Memo {
    locator: String,
    fetched_at: DateTime<Utc>,
    index: Arc<PluginInventory>,
}

impl Memo {
    fn is_fresh(&self, ttl: Duration) -> bool {
        (Utc::now() - self.fetched_at)
            .to_std()
            .map_or(true, |age| age < ttl)
    }
}

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Discovery Source Client
pub struct DiscoveryClient {
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: CacheStore,
    ttl: Duration,
    fetch_timeout: Duration,
    memo: Mutex<HashMap<String, Memo>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<SharedFetch>>>>,
}

impl DiscoveryClient {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, cache_dir: &Path) -> Self {
        Self {
            fetcher,
            cache: CacheStore::new(cache_dir),
            ttl: DEFAULT_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            memo: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn fetcher(&self) -> &Arc<dyn ArtifactFetcher> {
        &self.fetcher
    }

    /// Inventory of one source according to `opts`
    pub fn get_index(
        &self,
        source: &DiscoverySource,
        opts: &FetchOptions,
    ) -> Result<Arc<PluginInventory>> {
        if source.kind == SourceKind::Local {
            return Ok(Arc::new(load_manifest(
                &source.name,
                Path::new(&source.locator),
            )?));
        }

        let cached = self.cached(source)?;

        if opts.local_cache_only {
            return cached
                .map(|m| m.index)
                .ok_or_else(|| PluginError::CacheEmpty {
                    source_name: source.name.clone(),
                });
        }

        if !opts.force_refresh {
            if let Some(memo) = &cached {
                if memo.is_fresh(self.ttl) {
                    tracing::debug!(source = %source.name, "using cached inventory");
                    return Ok(memo.index.clone());
                }
            }
        }

        match self.refresh(source) {
            Ok(index) => Ok(index),
            Err(error) => match cached {
                Some(stale) if !opts.force_refresh => {
                    tracing::warn!(
                        source = %source.name,
                        fetched_at = %stale.fetched_at,
                        error = %error,
                        "refresh failed, using stale inventory cache"
                    );
                    Ok(stale.index)
                }
                _ => Err(error),
            },
        }
    }

    /// Inventories of all `sources`, fetched in parallel.
    ///
    /// Results are sorted by source name; failures of one source do not affect
    /// the others.
    pub fn get_indexes(
        &self,
        sources: &[DiscoverySource],
        opts: &FetchOptions,
    ) -> Discovered<Arc<PluginInventory>> {
        let mut results: Vec<(String, Result<Arc<PluginInventory>>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter()
                .map(|source| {
                    let handle = scope.spawn(move || self.get_index(source, opts));
                    (source.name.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(PluginError::Fetch {
                            locator: name.clone(),
                            message: "discovery worker panicked".to_string(),
                        })
                    });
                    (name, result)
                })
                .collect()
        });

        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut discovered = Discovered {
            items: Vec::new(),
            failures: Vec::new(),
        };
        for (name, result) in results {
            match result {
                Ok(index) => discovered.items.push(index),
                Err(error) => {
                    tracing::warn!(source = %name, error = %error, "discovery source failed");
                    discovered.failures.push(SourceFailure {
                        source: name,
                        error,
                    });
                }
            }
        }
        discovered
    }

    /// Drop cached data of one source
    pub fn invalidate(&self, source: &DiscoverySource) -> Result<()> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&source.name);
        self.cache.remove(source)
    }

    /// Drop all cached inventories
    pub fn clear(&self) -> Result<()> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.cache.clear()
    }

    // ========== Internals ==========

    fn cached(&self, source: &DiscoverySource) -> Result<Option<Memo>> {
        if let Some(memo) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source.name)
            .filter(|m| m.locator == source.locator)
        {
            return Ok(Some(memo.clone()));
        }

        let Some(cache) = self.cache.load(source)? else {
            return Ok(None);
        };

        let index = match PluginInventory::from_str(&source.name, &cache.payload) {
            Ok(index) => Arc::new(index),
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "ignoring corrupt inventory cache");
                return Ok(None);
            }
        };

        let memo = Memo {
            locator: cache.locator,
            fetched_at: cache.fetched_at,
            index,
        };
        self.remember(&source.name, memo.clone());
        Ok(Some(memo))
    }

    fn remember(&self, name: &str, memo: Memo) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), memo);
    }

    /// Single-flight refetch
    fn refresh(&self, source: &DiscoverySource) -> Result<Arc<PluginInventory>> {
        let key = format!("{}\u{0}{}", source.name, source.locator);

        let (cell, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(cell) => (cell.clone(), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    in_flight.insert(key.clone(), cell.clone());
                    (cell, true)
                }
            }
        };

        let result = cell
            .get_or_init(|| {
                self.fetch_and_store(source)
                    .map_err(|e| FetchFailure::from_error(source, e))
            })
            .clone();

        if leader {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }

        result.map_err(PluginError::from)
    }

    fn fetch_and_store(&self, source: &DiscoverySource) -> Result<Arc<PluginInventory>> {
        tracing::debug!(source = %source.name, locator = %source.locator, "fetching inventory");

        let payload = self.fetch_with_timeout(source)?;
        let index = Arc::new(PluginInventory::from_slice(&source.name, &payload)?);

        let cache = InventoryCache::new(&source.locator, &payload);
        if let Err(e) = self.cache.save(source, &cache) {
            tracing::warn!(source = %source.name, error = %e, "failed to write inventory cache");
        }
        self.remember(
            &source.name,
            Memo {
                locator: cache.locator,
                fetched_at: cache.fetched_at,
                index: index.clone(),
            },
        );

        Ok(index)
    }

    fn fetch_with_timeout(&self, source: &DiscoverySource) -> Result<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        let fetcher = self.fetcher.clone();
        let owned = source.clone();

        std::thread::spawn(move || {
            let _ = tx.send(fetcher.fetch_inventory(&owned));
        });

        match rx.recv_timeout(self.fetch_timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PluginError::FetchTimeout {
                locator: source.locator.clone(),
                seconds: self.fetch_timeout.as_secs(),
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PluginError::Fetch {
                locator: source.locator.clone(),
                message: "fetch worker exited without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Artifact, PluginCriteria};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tempfile::TempDir;

    const PAYLOAD_V1: &str =
        r#"{"plugins": [{"name": "cluster", "target": "kubernetes", "versions": [{"version": "v1.0.0"}]}]}"#;
    const PAYLOAD_V2: &str =
        r#"{"plugins": [{"name": "cluster", "target": "kubernetes", "versions": [{"version": "v1.0.0"}, {"version": "v2.0.0"}]}]}"#;

    /// Serves a fixed payload, optionally failing or sleeping
    struct ScriptedFetcher {
        payload: Mutex<String>,
        fail: Mutex<bool>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(payload: &str) -> Arc<Self> {
            Self::with_delay(payload, Duration::ZERO)
        }

        fn with_delay(payload: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                payload: Mutex::new(payload.to_string()),
                fail: Mutex::new(false),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn set_payload(&self, payload: &str) {
            *self.payload.lock().unwrap() = payload.to_string();
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtifactFetcher for ScriptedFetcher {
        fn fetch_inventory(&self, source: &DiscoverySource) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if *self.fail.lock().unwrap() {
                return Err(PluginError::Fetch {
                    locator: source.locator.clone(),
                    message: "network unreachable".into(),
                });
            }
            Ok(self.payload.lock().unwrap().clone().into_bytes())
        }

        fn fetch_plugin(&self, _artifact: &Artifact, _dest: &Path) -> Result<()> {
            unreachable!("not used by discovery tests")
        }
    }

    fn source() -> DiscoverySource {
        DiscoverySource::oci("default", "registry.example.com/inventory:latest")
    }

    fn versions(index: &PluginInventory) -> Vec<String> {
        index.find_plugins(&PluginCriteria::named("cluster", None))[0]
            .versions
            .clone()
    }

    #[test]
    fn test_fresh_cache_is_reused() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        let client = DiscoveryClient::new(fetcher.clone(), temp.path());

        client.get_index(&source(), &FetchOptions::default()).unwrap();
        client.get_index(&source(), &FetchOptions::default()).unwrap();
        assert_eq!(fetcher.calls(), 1);

        // A new client (new process) reads the cache file
        let client2 = DiscoveryClient::new(fetcher.clone(), temp.path());
        client2.get_index(&source(), &FetchOptions::default()).unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_force_refresh_bypasses_ttl() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        let client = DiscoveryClient::new(fetcher.clone(), temp.path());

        client.get_index(&source(), &FetchOptions::default()).unwrap();
        fetcher.set_payload(PAYLOAD_V2);

        let index = client.get_index(&source(), &FetchOptions::refresh()).unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(versions(&index), vec!["v1.0.0", "v2.0.0"]);
    }

    #[test]
    fn test_local_cache_only() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        let client = DiscoveryClient::new(fetcher.clone(), temp.path());

        let err = client
            .get_index(&source(), &FetchOptions::offline())
            .unwrap_err();
        assert!(matches!(err, PluginError::CacheEmpty { .. }));
        assert_eq!(fetcher.calls(), 0);

        client.get_index(&source(), &FetchOptions::default()).unwrap();
        client.get_index(&source(), &FetchOptions::offline()).unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_stale_cache_fallback_on_fetch_error() {
        let temp = TempDir::new().unwrap();
        let src = source();

        let mut cache = InventoryCache::new(&src.locator, PAYLOAD_V1.as_bytes());
        cache.fetched_at = Utc::now() - chrono::Duration::minutes(10);
        CacheStore::new(temp.path()).save(&src, &cache).unwrap();

        let fetcher = ScriptedFetcher::new(PAYLOAD_V2);
        fetcher.set_failing(true);
        let client = DiscoveryClient::new(fetcher.clone(), temp.path())
            .with_ttl(Duration::from_secs(5 * 60));

        let index = client.get_index(&src, &FetchOptions::default()).unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(versions(&index), vec!["v1.0.0"]);
    }

    #[test]
    fn test_first_run_fetch_error_propagates() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        fetcher.set_failing(true);
        let client = DiscoveryClient::new(fetcher, temp.path());

        let err = client
            .get_index(&source(), &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::Fetch { .. }));
    }

    #[test]
    fn test_expired_cache_is_refetched() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        let client = DiscoveryClient::new(fetcher.clone(), temp.path()).with_ttl(Duration::ZERO);

        client.get_index(&source(), &FetchOptions::default()).unwrap();
        fetcher.set_payload(PAYLOAD_V2);
        let index = client.get_index(&source(), &FetchOptions::default()).unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(versions(&index).len(), 2);
    }

    #[test]
    fn test_corrupt_payload_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new("{ broken");
        let client = DiscoveryClient::new(fetcher, temp.path());

        let err = client
            .get_index(&source(), &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::InventoryCorrupt { .. }));
        assert!(!client.cache().path(&source()).exists());
    }

    #[test]
    fn test_fetch_timeout() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::with_delay(PAYLOAD_V1, Duration::from_millis(500));
        let client = DiscoveryClient::new(fetcher, temp.path())
            .with_fetch_timeout(Duration::from_millis(50));

        let err = client
            .get_index(&source(), &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::FetchTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_concurrent_refresh_is_single_flight() {
        let temp = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::with_delay(PAYLOAD_V1, Duration::from_millis(300));
        let client = DiscoveryClient::new(fetcher.clone(), temp.path());
        let barrier = Barrier::new(4);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    barrier.wait();
                    client.get_index(&source(), &FetchOptions::refresh()).unwrap();
                });
            }
        });

        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_get_indexes_collects_failures() {
        let temp = TempDir::new().unwrap();
        let local_dir = temp.path().join("local");
        std::fs::create_dir_all(&local_dir).unwrap();
        std::fs::write(
            crate::inventory::manifest::manifest_path(&local_dir),
            PAYLOAD_V1,
        )
        .unwrap();

        let fetcher = ScriptedFetcher::new(PAYLOAD_V1);
        fetcher.set_failing(true);
        let client = DiscoveryClient::new(fetcher, &temp.path().join("cache"));

        let sources = vec![
            DiscoverySource::local("local", local_dir.to_str().unwrap()),
            source(),
        ];
        let discovered = client.get_indexes(&sources, &FetchOptions::default());

        assert_eq!(discovered.items.len(), 1);
        assert_eq!(discovered.items[0].source_name(), "local");
        assert_eq!(discovered.failures.len(), 1);
        assert_eq!(discovered.failures[0].source, "default");
    }
}
