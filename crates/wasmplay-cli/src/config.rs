//! CLI configuration: the core playground settings plus host-side paths.
//!
//! Read from `wasmplay.toml` (or `--config <file>`); core fields sit at the
//! top level next to the CLI-only ones.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use wasmplay_core::PlaygroundConfig;
use wasmplay_core::config::CONFIG_FILE;

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub playground: PlaygroundConfig,
    /// Directory (or http(s) URL) serving the precompiled store and
    /// toolchain assets.
    #[serde(default = "default_asset_root")]
    pub asset_root: String,
    /// Persistent asset cache. Unset means an in-memory cache per run.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_go_bin")]
    pub go_bin: PathBuf,
    /// Where execution frames are written.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

fn default_asset_root() -> String {
    "site".to_string()
}

fn default_go_bin() -> PathBuf {
    PathBuf::from("go")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            playground: PlaygroundConfig::default(),
            asset_root: default_asset_root(),
            cache_dir: None,
            go_bin: default_go_bin(),
            out_dir: default_out_dir(),
        }
    }
}

impl CliConfig {
    /// Load `path`, or `./wasmplay.toml` when no path is given. An explicit
    /// path must exist; the implicit one may be absent.
    pub fn load(path: Option<&Path>) -> io::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid config '{}': {}", path.display(), e),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(e) => Err(io::Error::new(
                e.kind(),
                format!("failed to read config '{}': {}", path.display(), e),
            )),
        }
    }

    /// Apply `key=value` overrides. CLI-only keys are handled here, the rest
    /// go to the core config.
    pub fn apply_overrides(&mut self, pairs: &[(String, String)]) -> io::Result<()> {
        for (key, value) in pairs {
            match key.as_str() {
                "asset_root" => self.asset_root = value.clone(),
                "cache_dir" => self.cache_dir = Some(PathBuf::from(value)),
                "go_bin" => self.go_bin = PathBuf::from(value),
                "out_dir" => self.out_dir = PathBuf::from(value),
                _ => self
                    .playground
                    .set_field(key, value)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
            }
        }
        Ok(())
    }

    /// Whether assets come from a web server rather than a directory.
    pub fn asset_root_is_url(&self) -> bool {
        self.asset_root.starts_with("http://") || self.asset_root.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flattened_fields() {
        let cfg: CliConfig = toml::from_str(
            r#"
timeout_secs = 10
asset_root = "https://play.example/"
go_bin = "/usr/local/go/bin/go"
"#,
        )
        .unwrap();
        assert_eq!(cfg.playground.timeout_secs, 10);
        assert_eq!(cfg.playground.work_dir, "/tmp");
        assert!(cfg.asset_root_is_url());
        assert_eq!(cfg.go_bin, PathBuf::from("/usr/local/go/bin/go"));
        assert_eq!(cfg.out_dir, PathBuf::from("out"));
        assert!(cfg.cache_dir.is_none());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = CliConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_overrides_route_to_core_and_cli() {
        let mut cfg = CliConfig::default();
        cfg.apply_overrides(&[
            ("out_dir".to_string(), "/tmp/frames".to_string()),
            ("timeout_secs".to_string(), "3".to_string()),
        ])
        .unwrap();
        assert_eq!(cfg.out_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(cfg.playground.timeout_secs, 3);

        let err = cfg
            .apply_overrides(&[("bogus".to_string(), "1".to_string())])
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
