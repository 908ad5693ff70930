//! Host-directory mirror for the VFS.
//!
//! Maps `VfsPath` values to OS paths under a root directory so a toolchain
//! running as a host process can see (and produce) VFS files. The in-memory
//! VFS stays the source of truth; the mirror is a scratch copy.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use super::path::VfsPath;
use super::vfs::Vfs;

/// Copies files between a `Vfs` and a host directory.
pub struct HostMirror {
    root: PathBuf,
}

impl HostMirror {
    /// Create a mirror rooted at the given directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a VFS path to an OS path.
    pub fn host_path(&self, path: &VfsPath) -> PathBuf {
        // VfsPath always starts with '/'; strip it for joining
        let relative = &path.as_str()[1..];
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Ensure parent directory exists for a file path.
    async fn ensure_parent(&self, os_path: &Path) -> io::Result<()> {
        if let Some(parent) = os_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Copy a VFS file (reading through to assets) out to the host.
    pub async fn export(&self, vfs: &Vfs, raw: &str) -> io::Result<PathBuf> {
        let path = vfs.resolve(raw)?;
        let data = vfs.read_file(path.as_str()).await?;
        let os_path = self.host_path(&path);
        self.ensure_parent(&os_path).await?;
        fs::write(&os_path, data).await?;
        Ok(os_path)
    }

    /// Copy a host file back into the VFS. Returns `false` when the host
    /// side has no such file.
    pub async fn import(&self, vfs: &Vfs, raw: &str) -> io::Result<bool> {
        let path = vfs.resolve(raw)?;
        match fs::read(self.host_path(&path)).await {
            Ok(data) => {
                vfs.write_file(path.as_str(), &data)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
