//! Persistent storage behind the asset cache.
//!
//! `MemoryStore` is an ephemeral map, handy for tests and one-shot runs.
//! `DirStore` persists entries on disk: each key becomes a sha256-named
//! `.bin` blob plus a `.meta.json` sidecar recording the original key.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use super::CacheError;
use crate::safe_io;
use crate::vfs::BoxFuture;

/// Key/value blob storage used by [`AssetCache`](super::AssetCache).
pub trait CacheStore: Send + Sync {
    /// Stored bytes for `key`, or `None` on a miss.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;

    /// Store (or replace) the bytes for `key`.
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Remove every entry.
    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        Box::pin(async move { Ok(self.entries().get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries().insert(key.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries().remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries().clear();
            Ok(())
        })
    }
}

/// Sidecar metadata written next to every blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub key: String,
    pub size_bytes: u64,
    pub stored_at: u64,
}

fn entry_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Directory-backed persistent store.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", entry_name(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", entry_name(key)))
    }

    /// Sidecar metadata for `key`, if present and readable.
    pub async fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        let bytes = fs::read(self.meta_path(key)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

impl CacheStore for DirStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        Box::pin(async move {
            match fs::read(self.blob_path(key)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Store(e)),
            }
        })
    }

    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let blob = self.blob_path(key);
            let meta = self.meta_path(key);
            let metadata = EntryMetadata {
                key: key.to_string(),
                size_bytes: data.len() as u64,
                stored_at: now_unix(),
            };
            // Clone data for the blocking closure (needs 'static)
            let data = data.to_vec();
            tokio::task::spawn_blocking(move || {
                safe_io::atomic_write(&blob, &data)?;
                safe_io::atomic_write_json(&meta, &metadata)
            })
            .await
            .map_err(|e| io::Error::other(format!("join error: {}", e)))??;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            for path in [self.blob_path(key), self.meta_path(key)] {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::Store(e)),
                }
            }
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            match fs::remove_dir_all(&self.root).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::Store(e)),
            }
            fs::create_dir_all(&self.root).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_entry_name_deterministic() {
        let a = entry_name("/prebuilt/fmt.a");
        assert_eq!(a, entry_name("/prebuilt/fmt.a"));
        assert_ne!(a, entry_name("/prebuilt/os.a"));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_memory_store_put_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dir_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        {
            let store = DirStore::open(root.clone()).unwrap();
            store.put("/toolchain/compile.wasm", b"\0asm").await.unwrap();
        }
        let store = DirStore::open(root).unwrap();
        assert_eq!(
            store.get("/toolchain/compile.wasm").await.unwrap(),
            Some(b"\0asm".to_vec())
        );
        let meta = store.metadata("/toolchain/compile.wasm").await.unwrap();
        assert_eq!(meta.key, "/toolchain/compile.wasm");
        assert_eq!(meta.size_bytes, 4);
    }

    #[tokio::test]
    async fn test_dir_store_clear_empties_root() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::open(dir.path().join("cache")).unwrap();
        store.put("a", b"1").await.unwrap();
        store.put("b", b"2").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.root().exists());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dir_store_concurrent_puts_of_one_key() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DirStore::open(dir.path().join("cache")).unwrap());
        for round in 0..10u8 {
            let puts: Vec<_> = (0..8u8)
                .map(|i| {
                    let store = store.clone();
                    tokio::spawn(async move {
                        store.put("/prebuilt/fmt.a", &vec![round ^ i; 256 * 1024]).await
                    })
                })
                .collect();
            for put in puts {
                put.await.unwrap().unwrap();
            }
            let data = store.get("/prebuilt/fmt.a").await.unwrap().unwrap();
            assert_eq!(data.len(), 256 * 1024);
            assert!(data.iter().all(|&b| b == data[0]));
        }
        // only the blob and its sidecar remain
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_dir_store_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::open(dir.path().to_path_buf()).unwrap();
        store.remove("never-stored").await.unwrap();
    }
}
