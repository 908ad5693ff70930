//! Read-through source for toolchain assets.
//!
//! The in-memory VFS is a pure store for user and generated files. Paths
//! under one of the configured asset prefixes (toolchain modules, package
//! archives, the manifest) are pulled from an `AssetSource` on first touch.
//!
//! # Dyn-compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of `impl Future` so that
//! `Arc<dyn AssetSource>` works and tests can swap in a fake source.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::path::VfsPath;
use crate::cache::CacheError;

/// Boxed, Send future, the return type for all async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where asset bytes come from on a VFS miss.
pub trait AssetSource: Send + Sync {
    /// Fetch the bytes stored under `key` (an absolute VFS path).
    fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>>;
}

/// Prefix predicate plus the source to read through to.
#[derive(Clone)]
pub struct ReadThrough {
    prefixes: Vec<String>,
    source: Arc<dyn AssetSource>,
}

impl ReadThrough {
    pub fn new(prefixes: Vec<String>, source: Arc<dyn AssetSource>) -> Self {
        Self { prefixes, source }
    }

    /// Whether `path` is a toolchain asset that may be fetched on miss.
    pub fn matches(&self, path: &VfsPath) -> bool {
        self.prefixes.iter().any(|p| path.has_prefix(p))
    }

    pub(crate) fn source(&self) -> &dyn AssetSource {
        self.source.as_ref()
    }
}
