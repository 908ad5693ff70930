//! Versioned asset cache.
//!
//! Maps a key (absolute asset path or URL) to a binary blob. A miss goes to
//! the [`Fetcher`]; only a successful read is persisted, so a failed
//! download never leaves a partial entry behind.
//!
//! Every entry belongs to one version epoch. [`AssetCache::reconcile`]
//! compares the requested version against the stored one and clears the
//! whole store on mismatch. Until a reconcile has completed, `fetch`
//! refuses to serve anything.
//!
//! Concurrent fetches for the same key are allowed and may both hit the
//! network; the last write wins.

pub mod fetch;
pub mod store;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use fetch::{DirFetcher, Fetcher, HttpFetcher};
pub use store::{CacheStore, DirStore, EntryMetadata, MemoryStore};

use crate::vfs::{AssetSource, BoxFuture};

/// Key under which the current version epoch is recorded.
pub const VERSION_KEY: &str = "wasmplay:cache-version";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("asset cache used before its version was reconciled")]
    NotReconciled,
    #[error("network read of '{key}' failed: {reason}")]
    Network { key: String, reason: String },
    #[error("asset '{0}' does not exist")]
    NotFound(String),
    #[error("cache store unavailable: {0}")]
    Store(#[from] io::Error),
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),
}

/// Persistent fetch-with-fallback cache.
pub struct AssetCache {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    reconciled: AtomicBool,
}

impl AssetCache {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            fetcher,
            reconciled: AtomicBool::new(false),
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled.load(Ordering::Acquire)
    }

    /// Bring the store to `version`. Returns `true` when the store was
    /// cleared because the stored epoch differed (or was absent).
    pub async fn reconcile(&self, version: &str) -> Result<bool, CacheError> {
        let current = self.store.get(VERSION_KEY).await?;
        if current.as_deref() == Some(version.as_bytes()) {
            log::debug!("cache version '{}' current", version);
            self.reconciled.store(true, Ordering::Release);
            return Ok(false);
        }

        log::debug!(
            "cache version changed ({} -> '{}'), clearing",
            current
                .as_deref()
                .map(|v| format!("'{}'", String::from_utf8_lossy(v)))
                .unwrap_or_else(|| "none".to_string()),
            version
        );
        self.reconciled.store(false, Ordering::Release);
        self.store.clear().await?;
        self.store.put(VERSION_KEY, version.as_bytes()).await?;
        self.reconciled.store(true, Ordering::Release);
        Ok(true)
    }

    fn check_key(&self, key: &str) -> Result<(), CacheError> {
        if !self.is_reconciled() {
            return Err(CacheError::NotReconciled);
        }
        if key.is_empty() || key == VERSION_KEY {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Cached bytes for `key`, downloading and storing them on a miss.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.check_key(key)?;

        if let Some(bytes) = self.store.get(key).await? {
            log::debug!("cache hit: {} ({} bytes)", key, bytes.len());
            return Ok(bytes);
        }

        log::debug!("cache miss: {}", key);
        let bytes = self.fetcher.fetch(key).await?;
        self.store.put(key, &bytes).await?;
        log::debug!("cached {} ({} bytes)", key, bytes.len());
        Ok(bytes)
    }

    /// Whether `key` is stored, without touching the network.
    pub async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.check_key(key)?;
        Ok(self.store.get(key).await?.is_some())
    }

    /// Drop a single entry.
    pub async fn evict(&self, key: &str) -> Result<(), CacheError> {
        self.check_key(key)?;
        log::debug!("cache evict: {}", key);
        self.store.remove(key).await
    }
}

impl AssetSource for AssetCache {
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>> {
        Box::pin(AssetCache::fetch(self, key))
    }
}
