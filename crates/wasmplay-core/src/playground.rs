//! High-level facade tying cache, VFS and pipeline together.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wasmplay_core::cache::{AssetCache, DirFetcher, MemoryStore};
//! use wasmplay_core::pipeline::{FrameHost, Toolchain};
//! use wasmplay_core::{CollectingSink, Playground, PlaygroundConfig};
//!
//! async fn demo(
//!     toolchain: Arc<dyn Toolchain>,
//!     frames: Arc<dyn FrameHost>,
//! ) -> Result<(), wasmplay_core::PipelineError> {
//!     let cache = Arc::new(AssetCache::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(DirFetcher::new("site".into())),
//!     ));
//!     let sink = Arc::new(CollectingSink::new());
//!     let playground =
//!         Playground::new(PlaygroundConfig::default(), cache, toolchain, frames, sink);
//!
//!     playground.load().await?;
//!     let session = playground.run("package main\nfunc main() {}\n").await?;
//!     println!("{}", session.state());
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::AssetCache;
use crate::config::PlaygroundConfig;
use crate::manifest::Manifest;
use crate::output::{EventSink, PipelineEvent};
use crate::pipeline::{BuildSession, FrameHost, Pipeline, PipelineError, Toolchain};
use crate::vfs::{ReadThrough, Vfs};

/// Clears the busy flag when the session future completes or is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, PipelineError> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Playground {
    config: PlaygroundConfig,
    cache: Arc<AssetCache>,
    pipeline: Pipeline,
    sink: Arc<dyn EventSink>,
    manifest: Mutex<Option<Arc<Manifest>>>,
    busy: AtomicBool,
}

impl Playground {
    /// Build a playground whose VFS reads toolchain assets through `cache`.
    pub fn new(
        config: PlaygroundConfig,
        cache: Arc<AssetCache>,
        toolchain: Arc<dyn Toolchain>,
        frames: Arc<dyn FrameHost>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let read_through = ReadThrough::new(config.asset_prefixes.clone(), cache.clone());
        let vfs = Arc::new(Vfs::with_read_through(read_through));
        let pipeline = Pipeline::new(config.clone(), vfs, toolchain, frames, sink.clone());
        Self {
            config,
            cache,
            pipeline,
            sink,
            manifest: Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        self.pipeline.vfs()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// The manifest from the last successful [`load`](Self::load).
    pub fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reconcile the cache version, then fetch and parse the manifest.
    ///
    /// Must succeed before [`run`](Self::run). Failures are environment
    /// errors and are also reported to the sink.
    pub async fn load(&self) -> Result<Arc<Manifest>, PipelineError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        match self.load_inner().await {
            Ok(manifest) => Ok(manifest),
            Err(e) => {
                log::warn!("playground load failed: {}", e);
                self.sink.emit(PipelineEvent::EnvironmentError {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn load_inner(&self) -> Result<Arc<Manifest>, PipelineError> {
        if self.cache.reconcile(&self.config.cache_version).await? {
            log::info!("asset cache reset to version {}", self.config.cache_version);
        }
        let bytes = self.cache.fetch(&self.config.manifest_path).await?;
        let manifest = Arc::new(Manifest::from_bytes(&bytes)?);
        log::debug!(
            "loaded manifest {} ({} packages)",
            self.config.manifest_path,
            manifest.len()
        );
        *self.manifest.lock().unwrap_or_else(|e| e.into_inner()) = Some(manifest.clone());
        Ok(manifest)
    }

    /// Format `source` in its own session.
    pub async fn format(&self, source: &str) -> Result<BuildSession, PipelineError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        self.pipeline.format(source).await
    }

    /// Format, build and execute `source`.
    pub async fn run(&self, source: &str) -> Result<BuildSession, PipelineError> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        let manifest = self.manifest().ok_or(PipelineError::NotLoaded)?;
        self.pipeline.run(source, &manifest).await
    }
}
