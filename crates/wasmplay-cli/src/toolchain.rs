//! Host toolchain: runs the real `gofmt` and `go tool compile/link` against
//! a scratch mirror of the VFS.
//!
//! Every argument that names a VFS path is exported to the mirror before the
//! tool runs, and whatever the tool wrote back (the `-o` target, or the file
//! rewritten by `gofmt -w`) is imported into the VFS afterwards. Import
//! configurations are rewritten so the archive paths point into the mirror.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tempfile::TempDir;
use wasmplay_core::ImportConfig;
use wasmplay_core::pipeline::{ToolExit, ToolKind, Toolchain, ToolchainError};
use wasmplay_core::vfs::{BoxFuture, HostMirror, STDERR, STDOUT, Vfs};

pub struct HostToolchain {
    go_bin: PathBuf,
    mirror: HostMirror,
    // keeps the scratch directory alive
    _scratch: TempDir,
}

impl HostToolchain {
    pub fn new(go_bin: PathBuf) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new().prefix("wasmplay-").tempdir()?;
        Ok(Self {
            go_bin,
            mirror: HostMirror::new(scratch.path().to_path_buf()),
            _scratch: scratch,
        })
    }

    /// `gofmt` ships next to `go`; fall back to `$PATH`.
    fn gofmt_bin(&self) -> PathBuf {
        match self.go_bin.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                let candidate = dir.join("gofmt");
                if candidate.exists() {
                    return candidate;
                }
                PathBuf::from("gofmt")
            }
            _ => PathBuf::from("gofmt"),
        }
    }

    fn command(&self, tool: ToolKind) -> tokio::process::Command {
        match tool {
            ToolKind::Format => tokio::process::Command::new(self.gofmt_bin()),
            ToolKind::Compile | ToolKind::Link => {
                let mut cmd = tokio::process::Command::new(&self.go_bin);
                cmd.arg("tool").arg(tool.as_ref());
                cmd
            }
        }
    }

    /// Export an import configuration and every archive it names.
    async fn export_importcfg(&self, vfs: &Vfs, raw: &str) -> Result<PathBuf, ToolchainError> {
        let text = String::from_utf8_lossy(&vfs.read_file(raw).await?).into_owned();
        let cfg = ImportConfig::parse(&text);

        let mut hosted = HashMap::new();
        for (_, archive) in cfg.entries() {
            if hosted.contains_key(archive) {
                continue;
            }
            let host = self.mirror.export(vfs, archive).await?;
            hosted.insert(archive.clone(), host.display().to_string());
        }
        let rewritten = cfg.map_archives(|a| hosted.get(a).cloned().unwrap_or_else(|| a.to_string()));

        let host_cfg = self.mirror.host_path(&vfs.resolve(raw)?);
        if let Some(parent) = host_cfg.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host_cfg, rewritten.to_string()).await?;
        Ok(host_cfg)
    }

    /// Translate VFS-path arguments into mirror paths. Returns the host
    /// argument list and the VFS paths to import back afterwards.
    async fn prepare_args(
        &self,
        tool: ToolKind,
        args: &[String],
        vfs: &Vfs,
    ) -> Result<(Vec<String>, Vec<String>), ToolchainError> {
        let mut host_args = Vec::with_capacity(args.len());
        let mut outputs = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "-importcfg" if i + 1 < args.len() => {
                    let host = self.export_importcfg(vfs, &args[i + 1]).await?;
                    host_args.push(arg.clone());
                    host_args.push(host.display().to_string());
                    i += 2;
                    continue;
                }
                "-o" if i + 1 < args.len() => {
                    let target = &args[i + 1];
                    let host = self.mirror.host_path(&vfs.resolve(target)?);
                    if let Some(parent) = host.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    host_args.push(arg.clone());
                    host_args.push(host.display().to_string());
                    outputs.push(target.clone());
                    i += 2;
                    continue;
                }
                _ => {}
            }
            if arg.starts_with('/') && vfs.exists(arg) {
                let host = self.mirror.export(vfs, arg).await?;
                host_args.push(host.display().to_string());
                // gofmt -w rewrites its inputs in place
                if tool == ToolKind::Format {
                    outputs.push(arg.clone());
                }
            } else {
                host_args.push(arg.clone());
            }
            i += 1;
        }
        Ok((host_args, outputs))
    }

    /// Map mirror paths in tool output back to VFS paths so diagnostics
    /// refer to the files the user knows about.
    fn unmirror(&self, text: &str) -> String {
        let root = self.mirror.root().display().to_string();
        text.replace(&root, "")
    }
}

impl Toolchain for HostToolchain {
    fn run<'a>(
        &'a self,
        tool: ToolKind,
        args: &'a [String],
        vfs: &'a Arc<Vfs>,
    ) -> BoxFuture<'a, Result<ToolExit, ToolchainError>> {
        Box::pin(async move {
            let (host_args, outputs) = self.prepare_args(tool, args, vfs).await?;

            let mut cmd = self.command(tool);
            cmd.args(&host_args)
                .current_dir(self.mirror.root())
                .env("GOOS", "js")
                .env("GOARCH", "wasm")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            log::debug!("host {}: {:?}", tool, host_args);

            let output = cmd.output().await.map_err(|e| ToolchainError::Unavailable {
                tool,
                reason: e.to_string(),
            })?;

            for path in &outputs {
                if !self.mirror.import(vfs, path).await? {
                    log::debug!("{} produced no {}", tool, path);
                }
            }

            let stdout = self.unmirror(&String::from_utf8_lossy(&output.stdout));
            let stderr = self.unmirror(&String::from_utf8_lossy(&output.stderr));
            if !stdout.is_empty() {
                vfs.write(STDOUT, stdout.as_bytes(), None)?;
            }
            if !stderr.is_empty() {
                vfs.write(STDERR, stderr.as_bytes(), None)?;
            }
            Ok(ToolExit::new(output.status.code().unwrap_or(-1)))
        })
    }
}

/// Locate `wasm_exec.js` via `go env GOROOT`. Newer toolchains keep it under
/// `lib/wasm`, older ones under `misc/wasm`.
pub async fn find_wasm_exec(go_bin: &Path) -> Option<PathBuf> {
    let output = tokio::process::Command::new(go_bin)
        .args(["env", "GOROOT"])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let goroot = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    ["lib/wasm/wasm_exec.js", "misc/wasm/wasm_exec.js"]
        .iter()
        .map(|rel| goroot.join(rel))
        .find(|p| p.exists())
}
