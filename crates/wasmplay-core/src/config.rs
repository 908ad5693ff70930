//! Playground configuration (`wasmplay.toml`).
//!
//! Every field has a serde default, so an empty or missing file yields the
//! stock configuration. Individual fields can be overridden per invocation
//! with `key=value` pairs (see [`PlaygroundConfig::set_field`]).

use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::importcfg::LinkScope;

/// File name looked up by [`PlaygroundConfig::load_from_dir`].
pub const CONFIG_FILE: &str = "wasmplay.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaygroundConfig {
    /// Wall-clock budget for one build session.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// VFS directory holding the source buffer and build outputs.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Name of the source file inside `work_dir`.
    #[serde(default = "default_source_file")]
    pub source_file: String,
    /// VFS path prefixes read through to the asset cache.
    #[serde(default = "default_asset_prefixes")]
    pub asset_prefixes: Vec<String>,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
    /// Cache version epoch; bump it whenever the toolchain or store changes.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,
    #[serde(default)]
    pub link_scope: LinkScope,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_work_dir() -> String {
    "/tmp".to_string()
}
fn default_source_file() -> String {
    "main.go".to_string()
}
fn default_asset_prefixes() -> Vec<String> {
    vec!["/prebuilt/".to_string(), "/toolchain/".to_string()]
}
fn default_manifest_path() -> String {
    "/prebuilt/manifest.txt".to_string()
}
fn default_cache_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            work_dir: default_work_dir(),
            source_file: default_source_file(),
            asset_prefixes: default_asset_prefixes(),
            manifest_path: default_manifest_path(),
            cache_version: default_cache_version(),
            link_scope: LinkScope::default(),
        }
    }
}

impl PlaygroundConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> io::Result<Self> {
        toml::from_str(text).map_err(|e| {
            io::Error::new(ErrorKind::InvalidData, format!("invalid config: {}", e))
        })
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(io::Error::new(
                e.kind(),
                format!("failed to read '{}': {}", path.display(), e),
            )),
        }
    }

    /// Load `<dir>/wasmplay.toml`.
    pub fn load_from_dir(dir: &Path) -> io::Result<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn work_path(&self, name: &str) -> String {
        format!("{}/{}", self.work_dir.trim_end_matches('/'), name)
    }

    /// VFS path of the source buffer.
    pub fn source_path(&self) -> String {
        self.work_path(&self.source_file)
    }

    pub fn compile_importcfg_path(&self) -> String {
        self.work_path("importcfg")
    }

    pub fn link_importcfg_path(&self) -> String {
        self.work_path("importcfg.link")
    }

    /// Archive produced by the compile stage.
    pub fn main_archive_path(&self) -> String {
        self.work_path("main.a")
    }

    /// Module produced by the link stage.
    pub fn module_path(&self) -> String {
        self.work_path("main.wasm")
    }

    /// Set a field by name from its string form.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "timeout_secs" => {
                self.timeout_secs = value
                    .parse()
                    .map_err(|_| format!("invalid u64 for '{}': {}", key, value))?;
            }
            "work_dir" => self.work_dir = value.to_string(),
            "source_file" => self.source_file = value.to_string(),
            "manifest_path" => self.manifest_path = value.to_string(),
            "cache_version" => self.cache_version = value.to_string(),
            "asset_prefixes" => {
                self.asset_prefixes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "link_scope" => {
                self.link_scope = match value {
                    "direct" => LinkScope::Direct,
                    "closure" => LinkScope::Closure,
                    _ => return Err(format!("invalid link_scope: {} (direct|closure)", value)),
                };
            }
            _ => return Err(format!("unknown config field: {}", key)),
        }
        Ok(())
    }

    /// Apply `key=value` overrides in order, stopping at the first error.
    pub fn apply_overrides(&mut self, pairs: &[(String, String)]) -> Result<(), String> {
        for (key, value) in pairs {
            self.set_field(key, value)?;
        }
        Ok(())
    }
}
