//! wasmplay-core: in-browser Go playground engine.
//!
//! Two halves share one artifact, the package manifest:
//!
//! - **precompile** (host, offline): builds packages for wasm and archives
//!   every dependency into a flat store plus manifest.
//! - **run time**: a versioned [`cache`] feeds an in-memory [`vfs`] that the
//!   opaque toolchain modules run against, and the [`pipeline`] drives
//!   format, compile, link and execution under a deadline.
//!
//! # Quick Start
//!
//! Most embedders use the [`Playground`] facade; see its docs for an
//! example. The individual modules are public for lower-level use.

pub mod cache;
pub mod config;
pub mod diagnostic;
pub mod importcfg;
pub mod manifest;
pub mod output;
pub mod pipeline;
mod playground;
pub mod precompile;
pub mod safe_io;
pub mod vfs;

pub use playground::Playground;

pub use cache::{AssetCache, CacheError};
pub use config::PlaygroundConfig;
pub use diagnostic::Diagnostic;
pub use importcfg::{ImportConfig, LinkScope};
pub use manifest::{Manifest, ManifestError, PackageRecord};
pub use output::{CollectingSink, EventSink, PipelineEvent};
pub use pipeline::{
    BuildSession, Failure, Pipeline, PipelineError, SessionKind, SessionOutcome, SessionState,
};
pub use precompile::{PrecompileError, PrecompileReport, PrecompileTarget, Precompiler};
pub use vfs::{FsError, Vfs};
