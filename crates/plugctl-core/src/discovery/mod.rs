//! Discovery
//!
//! Locating plugin inventories: configured sources, the artifact fetcher, the
//! on-disk inventory cache and the client that ties them together.

pub mod cache;
pub mod client;
pub mod fetcher;
pub mod source;

pub use cache::{CacheStore, InventoryCache};
pub use client::{DiscoveryClient, Discovered, FetchOptions, SourceFailure};
pub use fetcher::{compute_digest, verify_digest, ArtifactFetcher, DefaultFetcher};
pub use source::{DiscoverySource, SourceKind};
