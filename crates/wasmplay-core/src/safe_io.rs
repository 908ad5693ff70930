//! Safe host-file I/O: atomic writes and advisory locking.
//!
//! - [`atomic_write()`] / [`atomic_write_json()`] write to a unique temp
//!   file beside the target, fsync, then rename, so readers see either the old or the new file.
//! - [`FileLock`] serialises appends to the package manifest when several
//!   precompile runs share one store.

use fs2::FileExt;
use serde::Serialize;
use tempfile::NamedTempFile;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Atomically write bytes to a file, creating parent directories.
///
/// Each call stages through its own temp file in the target directory, so
/// concurrent writers of one path never share a staging file; the last
/// rename wins.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(contents)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Atomically write a value as pretty-printed JSON.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &json)
}

/// RAII exclusive advisory lock on a dedicated lock file.
///
/// Released when dropped.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire the lock, blocking until it is available.
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        file.lock_exclusive()?;

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
