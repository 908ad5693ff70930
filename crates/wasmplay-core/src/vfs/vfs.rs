//! Vfs: the in-memory filesystem the toolchain modules run against.
//!
//! Exposes the POSIX subset the toolchain expects (`open`, `read`, `write`,
//! `stat`, `mkdir`, `rename`, ...) over a flat node table keyed by absolute
//! path. Files are keyed `/a/b`, directories `/a/b/`. Descriptors 0-2 are the
//! process standard streams; everything else indexes the descriptor table.
//!
//! Only `open`, `stat`/`lstat` and `read_file` may suspend: those are the
//! operations that read through to the asset source on a miss.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::backend::ReadThrough;
use super::error::{Fd, FsError};
use super::path::VfsPath;
use super::types::{Node, OpenFlags, Stat, Times, VfsEntryKind};
use crate::cache::CacheError;

pub const STDIN: Fd = 0;
pub const STDOUT: Fd = 1;
pub const STDERR: Fd = 2;
/// First descriptor handed out by `open`.
pub const FIRST_FD: Fd = 3;

const MODE_CHAR_DEVICE: u32 = 0o020_620;

/// Largest file the VFS will grow to. Writes and truncations past it fail
/// with `EINVAL`.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug)]
struct OpenFile {
    path: VfsPath,
    flags: OpenFlags,
    cursor: u64,
    is_dir: bool,
}

struct FsState {
    nodes: HashMap<String, Node>,
    fds: HashMap<Fd, OpenFile>,
    next_fd: Fd,
    cwd: VfsPath,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl FsState {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::empty_dir());
        Self {
            nodes,
            fds: HashMap::new(),
            next_fd: FIRST_FD,
            cwd: VfsPath::root(),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Look up a node honouring the trailing-slash convention.
    fn find(&self, path: &VfsPath) -> Option<&Node> {
        if path.has_dir_hint() {
            return self
                .nodes
                .get(&path.dir_key())
                .filter(|n| matches!(n, Node::Directory { .. }));
        }
        match self.nodes.get(&path.file_key()) {
            Some(node @ Node::File { .. }) => Some(node),
            _ => self.nodes.get(&path.dir_key()),
        }
    }

    /// Look up a node ignoring any trailing-slash hint.
    fn find_any_key(&self, path: &VfsPath) -> Option<String> {
        let file_key = path.file_key();
        if matches!(self.nodes.get(&file_key), Some(Node::File { .. })) {
            return Some(file_key);
        }
        let dir_key = path.dir_key();
        self.nodes.contains_key(&dir_key).then_some(dir_key)
    }

    fn is_dir(&self, path: &VfsPath) -> bool {
        matches!(
            self.nodes.get(&path.dir_key()),
            Some(Node::Directory { .. })
        )
    }

    fn is_file(&self, path: &VfsPath) -> bool {
        matches!(self.nodes.get(&path.file_key()), Some(Node::File { .. }))
    }

    fn missing(&self, path: &VfsPath) -> FsError {
        if path.has_dir_hint() && self.is_file(path) {
            FsError::NotDirectory(path.to_string())
        } else {
            FsError::NotFound(path.to_string())
        }
    }

    fn ensure_parent_dir(&self, path: &VfsPath) -> Result<(), FsError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if self.is_dir(&parent) {
            Ok(())
        } else if self.is_file(&parent) {
            Err(FsError::NotDirectory(parent.to_string()))
        } else {
            Err(FsError::NotFound(parent.to_string()))
        }
    }

    fn link_child(&mut self, path: &VfsPath) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if let Some(Node::Directory { children, times }) = self.nodes.get_mut(&parent.dir_key())
        {
            if children.insert(name.to_string()) {
                times.mtime = Utc::now();
            }
        }
    }

    fn unlink_child(&mut self, path: &VfsPath) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if let Some(Node::Directory { children, times }) = self.nodes.get_mut(&parent.dir_key())
        {
            if children.shift_remove(name) {
                times.mtime = Utc::now();
            }
        }
    }

    /// `mkdir -p`: create every missing directory down to `path`.
    fn mkdir_p(&mut self, path: &VfsPath) -> Result<(), FsError> {
        let mut chain = path.ancestors();
        chain.push(path.clone());
        for dir in chain {
            if self.is_dir(&dir) {
                continue;
            }
            if self.is_file(&dir) {
                return Err(FsError::NotDirectory(dir.to_string()));
            }
            self.nodes.insert(dir.dir_key(), Node::empty_dir());
            self.link_child(&dir);
        }
        Ok(())
    }

    fn insert_file(&mut self, path: &VfsPath, data: Vec<u8>) {
        self.nodes.insert(
            path.file_key(),
            Node::File {
                data,
                times: Times::now(),
            },
        );
        self.link_child(path);
    }
}

/// End offset of `len` bytes placed at `offset`, bounded by
/// [`MAX_FILE_SIZE`].
fn bounded_end(offset: u64, len: usize) -> Result<usize, FsError> {
    u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .filter(|&end| end <= MAX_FILE_SIZE)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "file size past {} bytes (offset {}, length {})",
                MAX_FILE_SIZE, offset, len
            ))
        })
}

fn file_parts_mut<'a>(
    nodes: &'a mut HashMap<String, Node>,
    path: &VfsPath,
) -> Result<(&'a mut Vec<u8>, &'a mut Times), FsError> {
    match nodes.get_mut(&path.file_key()) {
        Some(Node::File { data, times }) => Ok((data, times)),
        Some(Node::Directory { .. }) => Err(FsError::IsDirectory(path.to_string())),
        None => Err(FsError::NotFound(path.to_string())),
    }
}

/// In-memory filesystem with optional read-through for toolchain assets.
pub struct Vfs {
    state: Mutex<FsState>,
    read_through: Option<ReadThrough>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// A pure in-memory filesystem containing only `/`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FsState::new()),
            read_through: None,
        }
    }

    /// A filesystem that fetches missing asset paths through `read_through`.
    pub fn with_read_through(read_through: ReadThrough) -> Self {
        Self {
            state: Mutex::new(FsState::new()),
            read_through: Some(read_through),
        }
    }

    fn state(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Normalize `raw` against the working directory.
    pub fn resolve(&self, raw: &str) -> Result<VfsPath, FsError> {
        let cwd = self.state().cwd.clone();
        VfsPath::resolve(&cwd, raw)
    }

    pub fn cwd(&self) -> VfsPath {
        self.state().cwd.clone()
    }

    pub fn chdir(&self, raw: &str) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        let mut state = self.state();
        if !state.is_dir(&path) {
            return Err(state.missing(&path));
        }
        state.cwd = path;
        Ok(())
    }

    /// Make sure `path` exists locally, fetching it if it is an asset.
    ///
    /// Returns whether the path now exists.
    async fn ensure_local(&self, path: &VfsPath) -> Result<bool, FsError> {
        if self.state().find(path).is_some() {
            return Ok(true);
        }
        let Some(read_through) = &self.read_through else {
            return Ok(false);
        };
        if path.has_dir_hint() || !read_through.matches(path) {
            return Ok(false);
        }
        let bytes = match read_through.source().fetch(path.as_str()).await {
            Ok(bytes) => bytes,
            Err(CacheError::NotFound(_)) => return Ok(false),
            Err(source) => {
                return Err(FsError::Fetch {
                    path: path.to_string(),
                    source,
                });
            }
        };
        log::debug!("vfs: populated {} ({} bytes) from asset cache", path, bytes.len());
        let mut state = self.state();
        if state.find(path).is_none() {
            if let Some(parent) = path.parent() {
                state.mkdir_p(&parent)?;
            }
            state.insert_file(path, bytes);
        }
        Ok(true)
    }

    // -- descriptor operations --

    pub async fn open(&self, raw: &str, flags: OpenFlags) -> Result<Fd, FsError> {
        let path = self.resolve(raw)?;
        self.ensure_local(&path).await?;

        let mut state = self.state();
        let exists = state.find(&path).is_some();
        if flags.contains(OpenFlags::CREATE) {
            if exists && flags.contains(OpenFlags::EXCL) {
                return Err(FsError::Exists(path.to_string()));
            }
            if !exists && !path.has_dir_hint() {
                state.ensure_parent_dir(&path)?;
                state.insert_file(&path, Vec::new());
            }
        }

        let is_dir = match state.find(&path) {
            None => return Err(state.missing(&path)),
            Some(Node::Directory { .. }) => true,
            Some(Node::File { .. }) => false,
        };
        if is_dir && (flags.writable() || flags.contains(OpenFlags::TRUNC)) {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        let mut cursor = 0;
        if !is_dir {
            let (data, times) = file_parts_mut(&mut state.nodes, &path)?;
            if flags.contains(OpenFlags::TRUNC) {
                data.clear();
                times.mtime = Utc::now();
            }
            if flags.contains(OpenFlags::APPEND) {
                cursor = data.len() as u64;
            }
        }

        let fd = state.next_fd;
        state.next_fd += 1;
        state.fds.insert(
            fd,
            OpenFile {
                path,
                flags,
                cursor,
                is_dir,
            },
        );
        Ok(fd)
    }

    pub fn close(&self, fd: Fd) -> Result<(), FsError> {
        if fd < FIRST_FD {
            return Ok(());
        }
        self.state()
            .fds
            .remove(&fd)
            .map(|_| ())
            .ok_or(FsError::BadDescriptor(fd))
    }

    /// Read into `buf`, repositioning first when `position` is given.
    /// Returns the number of bytes read; 0 at end of file.
    pub fn read(&self, fd: Fd, buf: &mut [u8], position: Option<u64>) -> Result<usize, FsError> {
        if fd == STDIN {
            return Ok(0);
        }
        let mut guard = self.state();
        let state = &mut *guard;
        let file = state
            .fds
            .get_mut(&fd)
            .ok_or(FsError::BadDescriptor(fd))?;
        if !file.flags.readable() {
            return Err(FsError::BadDescriptor(fd));
        }
        if file.is_dir {
            return Err(FsError::IsDirectory(file.path.to_string()));
        }
        if let Some(pos) = position {
            file.cursor = pos;
        }
        let (data, times) = file_parts_mut(&mut state.nodes, &file.path)?;
        let start = (file.cursor as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        file.cursor = (start + n) as u64;
        times.atime = Utc::now();
        Ok(n)
    }

    /// Write `data`; append descriptors always write at end of file.
    pub fn write(&self, fd: Fd, data: &[u8], position: Option<u64>) -> Result<usize, FsError> {
        let mut guard = self.state();
        let state = &mut *guard;
        match fd {
            STDOUT => {
                state.stdout.extend_from_slice(data);
                return Ok(data.len());
            }
            STDERR => {
                state.stderr.extend_from_slice(data);
                return Ok(data.len());
            }
            STDIN => return Err(FsError::BadDescriptor(fd)),
            _ => {}
        }
        let file = state
            .fds
            .get_mut(&fd)
            .ok_or(FsError::BadDescriptor(fd))?;
        if !file.flags.writable() {
            return Err(FsError::BadDescriptor(fd));
        }
        let (content, times) = file_parts_mut(&mut state.nodes, &file.path)?;
        let offset = if file.flags.contains(OpenFlags::APPEND) {
            content.len() as u64
        } else {
            position.unwrap_or(file.cursor)
        };
        let end = bounded_end(offset, data.len())?;
        let start = end - data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        file.cursor = end as u64;
        let now = Utc::now();
        times.mtime = now;
        times.ctime = now;
        Ok(data.len())
    }

    pub fn fstat(&self, fd: Fd) -> Result<Stat, FsError> {
        if fd < FIRST_FD {
            return Ok(Stat {
                kind: VfsEntryKind::File,
                size: 0,
                mode: MODE_CHAR_DEVICE,
                times: Times::now(),
            });
        }
        let state = self.state();
        let file = state.fds.get(&fd).ok_or(FsError::BadDescriptor(fd))?;
        let key = if file.is_dir {
            file.path.dir_key()
        } else {
            file.path.file_key()
        };
        state
            .nodes
            .get(&key)
            .map(Node::stat)
            .ok_or_else(|| FsError::NotFound(file.path.to_string()))
    }

    pub fn ftruncate(&self, fd: Fd, len: u64) -> Result<(), FsError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let file = state.fds.get(&fd).ok_or(FsError::BadDescriptor(fd))?;
        if !file.flags.writable() {
            return Err(FsError::BadDescriptor(fd));
        }
        let len = bounded_end(len, 0)?;
        let (data, times) = file_parts_mut(&mut state.nodes, &file.path)?;
        data.resize(len, 0);
        times.mtime = Utc::now();
        Ok(())
    }

    // -- path operations --

    pub async fn stat(&self, raw: &str) -> Result<Stat, FsError> {
        let path = self.resolve(raw)?;
        self.ensure_local(&path).await?;
        let state = self.state();
        state
            .find(&path)
            .map(Node::stat)
            .ok_or_else(|| state.missing(&path))
    }

    /// There are no symlinks, so `lstat` is `stat`.
    pub async fn lstat(&self, raw: &str) -> Result<Stat, FsError> {
        self.stat(raw).await
    }

    pub fn mkdir(&self, raw: &str, recursive: bool) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        let mut state = self.state();
        if recursive {
            return state.mkdir_p(&path);
        }
        if state.find_any_key(&path).is_some() {
            return Err(FsError::Exists(path.to_string()));
        }
        state.ensure_parent_dir(&path)?;
        state.nodes.insert(path.dir_key(), Node::empty_dir());
        state.link_child(&path);
        Ok(())
    }

    pub fn rmdir(&self, raw: &str) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        if path.is_root() {
            return Err(FsError::InvalidArgument("cannot remove /".to_string()));
        }
        let mut state = self.state();
        match state.nodes.get(&path.dir_key()) {
            Some(Node::Directory { children, .. }) if !children.is_empty() => {
                return Err(FsError::NotEmpty(path.to_string()));
            }
            Some(_) => {}
            None if state.is_file(&path) => {
                return Err(FsError::NotDirectory(path.to_string()));
            }
            None => return Err(FsError::NotFound(path.to_string())),
        }
        state.nodes.remove(&path.dir_key());
        state.unlink_child(&path);
        Ok(())
    }

    pub fn unlink(&self, raw: &str) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        let mut state = self.state();
        if !state.is_file(&path) {
            return Err(if state.is_dir(&path) {
                FsError::IsDirectory(path.to_string())
            } else {
                FsError::NotFound(path.to_string())
            });
        }
        state.nodes.remove(&path.file_key());
        state.unlink_child(&path);
        Ok(())
    }

    /// Move a file or a whole directory subtree. The destination must not
    /// exist.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        if from.is_root() || to.is_root() {
            return Err(FsError::InvalidArgument("cannot rename /".to_string()));
        }
        if from.as_str() == to.as_str() {
            return Ok(());
        }
        let mut state = self.state();
        let Some(src_key) = state.find_any_key(&from) else {
            return Err(FsError::NotFound(from.to_string()));
        };
        if state.find_any_key(&to).is_some() {
            return Err(FsError::Exists(to.to_string()));
        }
        state.ensure_parent_dir(&to)?;

        let src_is_dir = src_key.ends_with('/');
        if src_is_dir {
            let old_prefix = from.dir_key();
            let new_prefix = to.dir_key();
            if to.has_prefix(&old_prefix) {
                return Err(FsError::InvalidArgument(format!(
                    "cannot move {from} into itself"
                )));
            }
            let moved: Vec<String> = state
                .nodes
                .keys()
                .filter(|k| k.starts_with(&old_prefix))
                .cloned()
                .collect();
            for key in moved {
                if let Some(node) = state.nodes.remove(&key) {
                    let new_key = format!("{}{}", new_prefix, &key[old_prefix.len()..]);
                    state.nodes.insert(new_key, node);
                }
            }
            for file in state.fds.values_mut() {
                if file.path.has_prefix(&old_prefix) {
                    let rest = &file.path.as_str()[from.as_str().len()..];
                    file.path = VfsPath::new(&format!("{}{}", to.as_str(), rest))?;
                }
            }
        } else {
            if let Some(node) = state.nodes.remove(&src_key) {
                state.nodes.insert(to.file_key(), node);
            }
            for file in state.fds.values_mut() {
                if file.path.as_str() == from.as_str() {
                    file.path = to.clone();
                }
            }
        }
        state.unlink_child(&from);
        state.link_child(&to);
        Ok(())
    }

    pub fn utimes(
        &self,
        raw: &str,
        atime: DateTime<Utc>,
        mtime: DateTime<Utc>,
    ) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        let mut state = self.state();
        let key = state
            .find_any_key(&path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if let Some(node) = state.nodes.get_mut(&key) {
            let times = node.times_mut();
            times.atime = atime;
            times.mtime = mtime;
        }
        Ok(())
    }

    pub fn truncate(&self, raw: &str, len: u64) -> Result<(), FsError> {
        let len = bounded_end(len, 0)?;
        let path = self.resolve(raw)?;
        let mut state = self.state();
        let (data, times) = file_parts_mut(&mut state.nodes, &path)?;
        data.resize(len, 0);
        times.mtime = Utc::now();
        Ok(())
    }

    /// Child names of a directory, in creation order.
    pub fn readdir(&self, raw: &str) -> Result<Vec<String>, FsError> {
        let path = self.resolve(raw)?;
        let state = self.state();
        match state.nodes.get(&path.dir_key()) {
            Some(Node::Directory { children, .. }) => Ok(children.iter().cloned().collect()),
            _ if state.is_file(&path) => Err(FsError::NotDirectory(path.to_string())),
            _ => Err(FsError::NotFound(path.to_string())),
        }
    }

    // -- whole-file helpers --

    /// Read an entire file, reading through to the asset source on a miss.
    pub async fn read_file(&self, raw: &str) -> Result<Vec<u8>, FsError> {
        let path = self.resolve(raw)?;
        self.ensure_local(&path).await?;
        let mut state = self.state();
        let (data, times) = file_parts_mut(&mut state.nodes, &path)?;
        times.atime = Utc::now();
        Ok(data.clone())
    }

    /// Create or replace a file, creating parent directories as needed.
    pub fn write_file(&self, raw: &str, data: &[u8]) -> Result<(), FsError> {
        let path = self.resolve(raw)?;
        let mut state = self.state();
        if state.is_dir(&path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        if let Some(parent) = path.parent() {
            state.mkdir_p(&parent)?;
        }
        state.insert_file(&path, data.to_vec());
        Ok(())
    }

    /// Whether `raw` exists locally. Never reads through.
    pub fn exists(&self, raw: &str) -> bool {
        let Ok(path) = self.resolve(raw) else {
            return false;
        };
        self.state().find(&path).is_some()
    }

    // -- process output --

    pub fn take_stdout(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().stdout)
    }

    pub fn take_stderr(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().stderr)
    }

    /// Drop anything buffered on stdout/stderr.
    pub fn clear_output(&self) {
        let mut state = self.state();
        state.stdout.clear();
        state.stderr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backend::{AssetSource, BoxFuture};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RW_CREATE: OpenFlags = OpenFlags::RDWR.union(OpenFlags::CREATE);

    struct FakeAssets {
        files: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl AssetSource for FakeAssets {
        fn fetch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, CacheError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.files
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CacheError::NotFound(key.to_string()))
            })
        }
    }

    fn asset_vfs() -> (Vfs, Arc<FakeAssets>) {
        let assets = Arc::new(FakeAssets {
            files: HashMap::from([("/prebuilt/fmt.a".to_string(), b"!<arch>fmt".to_vec())]),
            calls: AtomicUsize::new(0),
        });
        let rt = ReadThrough::new(vec!["/prebuilt/".to_string()], assets.clone());
        (Vfs::with_read_through(rt), assets)
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let vfs = Vfs::new();
        vfs.mkdir("/tmp", false).unwrap();
        let fd = vfs.open("/tmp/a.bin", RW_CREATE).await.unwrap();
        let payload: Vec<u8> = (0..=255).collect();
        assert_eq!(vfs.write(fd, &payload, Some(0)).unwrap(), payload.len());
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(vfs.read(fd, &mut buf, Some(0)).unwrap(), payload.len());
        assert_eq!(buf, payload);
        vfs.close(fd).unwrap();
    }

    #[tokio::test]
    async fn test_append_always_extends() {
        let vfs = Vfs::new();
        vfs.write_file("/log.txt", b"abc").unwrap();
        let fd = vfs
            .open("/log.txt", OpenFlags::WRONLY | OpenFlags::APPEND)
            .await
            .unwrap();
        vfs.write(fd, b"def", Some(0)).unwrap();
        vfs.write(fd, b"ghi", None).unwrap();
        assert_eq!(vfs.read_file("/log.txt").await.unwrap(), b"abcdefghi");
    }

    #[tokio::test]
    async fn test_sequential_reads_advance_cursor() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"hello world").unwrap();
        let fd = vfs.open("/f", OpenFlags::RDONLY).await.unwrap();
        let mut buf = [0u8; 5];
        vfs.read(fd, &mut buf, None).unwrap();
        assert_eq!(&buf, b"hello");
        let mut rest = [0u8; 16];
        let n = vfs.read(fd, &mut rest, None).unwrap();
        assert_eq!(&rest[..n], b" world");
        assert_eq!(vfs.read(fd, &mut rest, None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_past_end_zero_fills() {
        let vfs = Vfs::new();
        let fd = vfs.open("/gap", RW_CREATE).await.unwrap();
        vfs.write(fd, b"x", Some(3)).unwrap();
        assert_eq!(vfs.read_file("/gap").await.unwrap(), b"\0\0\0x");
    }

    #[tokio::test]
    async fn test_open_missing_without_create() {
        let vfs = Vfs::new();
        let err = vfs.open("/nope", OpenFlags::RDONLY).await.unwrap_err();
        assert_eq!(err.code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let vfs = Vfs::new();
        let err = vfs.open("/no/such/dir/f", RW_CREATE).await.unwrap_err();
        assert_eq!(err.code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_create_registers_in_parent_listing() {
        let vfs = Vfs::new();
        vfs.mkdir("/tmp", false).unwrap();
        vfs.open("/tmp/main.go", RW_CREATE).await.unwrap();
        assert_eq!(vfs.readdir("/tmp").unwrap(), vec!["main.go"]);
    }

    #[tokio::test]
    async fn test_exclusive_create_on_existing() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"1").unwrap();
        let err = vfs
            .open("/f", RW_CREATE | OpenFlags::EXCL)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EEXIST");
    }

    #[tokio::test]
    async fn test_truncate_on_open() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"old content").unwrap();
        let fd = vfs
            .open("/f", OpenFlags::WRONLY | OpenFlags::TRUNC)
            .await
            .unwrap();
        assert_eq!(vfs.fstat(fd).unwrap().size, 0);
        vfs.write(fd, b"new", None).unwrap();
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_access_mode_enforced() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"data").unwrap();
        let ro = vfs.open("/f", OpenFlags::RDONLY).await.unwrap();
        assert_eq!(vfs.write(ro, b"x", None).unwrap_err().code(), "EBADF");
        let wo = vfs.open("/f", OpenFlags::WRONLY).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(vfs.read(wo, &mut buf, None).unwrap_err().code(), "EBADF");
    }

    #[tokio::test]
    async fn test_closed_descriptor_is_invalid() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"data").unwrap();
        let fd = vfs.open("/f", OpenFlags::RDONLY).await.unwrap();
        vfs.close(fd).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            vfs.read(fd, &mut buf, None),
            Err(FsError::BadDescriptor(_))
        ));
        assert!(vfs.close(fd).is_err());
    }

    #[test]
    fn test_standard_streams_buffer_output() {
        let vfs = Vfs::new();
        vfs.write(STDOUT, b"hello ", None).unwrap();
        vfs.write(STDOUT, b"world", None).unwrap();
        vfs.write(STDERR, b"oops", None).unwrap();
        assert_eq!(vfs.take_stdout(), b"hello world");
        assert_eq!(vfs.take_stderr(), b"oops");
        assert!(vfs.take_stdout().is_empty());
        let mut buf = [0u8; 1];
        assert_eq!(vfs.read(STDIN, &mut buf, None).unwrap(), 0);
        assert!(!vfs.exists("/1"));
    }

    #[tokio::test]
    async fn test_mkdir_recursive_lists_every_level() {
        let vfs = Vfs::new();
        vfs.mkdir("/a/b/c/", true).unwrap();
        for dir in ["/a/", "/a/b/", "/a/b/c/"] {
            assert!(vfs.stat(dir).await.unwrap().is_dir(), "{dir}");
        }
        assert!(vfs.readdir("/").unwrap().contains(&"a".to_string()));
        assert_eq!(vfs.readdir("/a").unwrap(), vec!["b"]);
        assert_eq!(vfs.readdir("/a/b").unwrap(), vec!["c"]);
        assert_eq!(vfs.stat("/a/b/c/").await.unwrap().size, 0);
    }

    #[test]
    fn test_mkdir_existing_and_through_file() {
        let vfs = Vfs::new();
        vfs.mkdir("/d", false).unwrap();
        assert_eq!(vfs.mkdir("/d", false).unwrap_err().code(), "EEXIST");
        vfs.mkdir("/d", true).unwrap();
        vfs.write_file("/d/f", b"").unwrap();
        assert_eq!(vfs.mkdir("/d/f/g", true).unwrap_err().code(), "ENOTDIR");
        assert_eq!(vfs.mkdir("/x/y", false).unwrap_err().code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_stat_trailing_slash_convention() {
        let vfs = Vfs::new();
        vfs.write_file("/dir/file.txt", b"12345").unwrap();
        let file = vfs.stat("/dir/file.txt").await.unwrap();
        assert!(!file.is_dir());
        assert_eq!(file.size, 5);
        assert!(vfs.stat("/dir").await.unwrap().is_dir());
        assert_eq!(
            vfs.stat("/dir/file.txt/").await.unwrap_err().code(),
            "ENOTDIR"
        );
    }

    #[test]
    fn test_rmdir_and_unlink() {
        let vfs = Vfs::new();
        vfs.write_file("/d/f", b"x").unwrap();
        assert_eq!(vfs.rmdir("/d").unwrap_err().code(), "ENOTEMPTY");
        assert_eq!(vfs.unlink("/d").unwrap_err().code(), "EISDIR");
        assert_eq!(vfs.rmdir("/d/f").unwrap_err().code(), "ENOTDIR");
        vfs.unlink("/d/f").unwrap();
        assert!(vfs.readdir("/d").unwrap().is_empty());
        vfs.rmdir("/d").unwrap();
        assert!(!vfs.readdir("/").unwrap().contains(&"d".to_string()));
        assert_eq!(vfs.unlink("/d/f").unwrap_err().code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_rename_file_updates_listings() {
        let vfs = Vfs::new();
        vfs.write_file("/src/a.txt", b"A").unwrap();
        vfs.mkdir("/dst", false).unwrap();
        vfs.rename("/src/a.txt", "/dst/b.txt").unwrap();
        assert!(vfs.readdir("/src").unwrap().is_empty());
        assert_eq!(vfs.readdir("/dst").unwrap(), vec!["b.txt"]);
        assert_eq!(vfs.read_file("/dst/b.txt").await.unwrap(), b"A");
    }

    #[test]
    fn test_rename_onto_existing_fails() {
        let vfs = Vfs::new();
        vfs.write_file("/a", b"A").unwrap();
        vfs.write_file("/b", b"B").unwrap();
        assert_eq!(vfs.rename("/a", "/b").unwrap_err().code(), "EEXIST");
        assert_eq!(vfs.rename("/missing", "/c").unwrap_err().code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_rename_directory_moves_subtree_and_descriptors() {
        let vfs = Vfs::new();
        vfs.write_file("/old/sub/f.txt", b"deep").unwrap();
        let fd = vfs.open("/old/sub/f.txt", OpenFlags::RDWR).await.unwrap();
        vfs.rename("/old", "/new").unwrap();
        assert!(!vfs.exists("/old/sub/f.txt"));
        assert_eq!(vfs.read_file("/new/sub/f.txt").await.unwrap(), b"deep");
        vfs.write(fd, b"DEEP", Some(0)).unwrap();
        assert_eq!(vfs.read_file("/new/sub/f.txt").await.unwrap(), b"DEEP");
        assert_eq!(
            vfs.rename("/new", "/new/sub/inner").unwrap_err().code(),
            "EINVAL"
        );
    }

    #[tokio::test]
    async fn test_utimes_sets_times() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"").unwrap();
        let when = DateTime::<Utc>::from_timestamp(1_000_000, 0).unwrap();
        vfs.utimes("/f", when, when).unwrap();
        let stat = vfs.stat("/f").await.unwrap();
        assert_eq!(stat.times.atime, when);
        assert_eq!(stat.times.mtime, when);
    }

    #[tokio::test]
    async fn test_relative_paths_use_cwd() {
        let vfs = Vfs::new();
        vfs.mkdir("/work/src", true).unwrap();
        vfs.chdir("/work").unwrap();
        vfs.write_file("src/main.go", b"package main").unwrap();
        assert!(vfs.exists("/work/src/main.go"));
        assert_eq!(vfs.read_file("./src/../src/main.go").await.unwrap(), b"package main");
        assert_eq!(vfs.chdir("/nowhere").unwrap_err().code(), "ENOENT");
    }

    #[tokio::test]
    async fn test_ftruncate() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"abcdef").unwrap();
        let fd = vfs.open("/f", OpenFlags::RDWR).await.unwrap();
        vfs.ftruncate(fd, 2).unwrap();
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_truncate_to_zero_and_beyond_end() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"abc").unwrap();
        vfs.truncate("/f", 0).unwrap();
        assert!(vfs.read_file("/f").await.unwrap().is_empty());
        vfs.truncate("/f", 4).unwrap();
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"\0\0\0\0");
    }

    #[tokio::test]
    async fn test_write_at_end_of_file_extends() {
        let vfs = Vfs::new();
        vfs.write_file("/f", b"ab").unwrap();
        let fd = vfs.open("/f", OpenFlags::RDWR).await.unwrap();
        assert_eq!(vfs.write(fd, b"cd", Some(2)).unwrap(), 2);
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_huge_offsets_are_invalid_not_panics() {
        let vfs = Vfs::new();
        let fd = vfs.open("/f", RW_CREATE).await.unwrap();
        vfs.write(fd, b"ok", None).unwrap();

        let err = vfs.write(fd, b"x", Some(u64::MAX)).unwrap_err();
        assert_eq!(err.code(), "EINVAL");
        let err = vfs.write(fd, b"x", Some(MAX_FILE_SIZE)).unwrap_err();
        assert_eq!(err.code(), "EINVAL");
        assert_eq!(vfs.ftruncate(fd, u64::MAX).unwrap_err().code(), "EINVAL");
        assert_eq!(vfs.truncate("/f", u64::MAX).unwrap_err().code(), "EINVAL");

        // rejected calls leave content and cursor alone
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"ok");
        vfs.write(fd, b"!", None).unwrap();
        assert_eq!(vfs.read_file("/f").await.unwrap(), b"ok!");
    }

    #[tokio::test]
    async fn test_asset_paths_read_through_once() {
        let (vfs, assets) = asset_vfs();
        assert_eq!(vfs.read_file("/prebuilt/fmt.a").await.unwrap(), b"!<arch>fmt");
        assert_eq!(assets.calls.load(Ordering::SeqCst), 1);
        let fd = vfs.open("/prebuilt/fmt.a", OpenFlags::RDONLY).await.unwrap();
        assert_eq!(vfs.fstat(fd).unwrap().size, 10);
        assert_eq!(assets.calls.load(Ordering::SeqCst), 1);
        assert_eq!(vfs.readdir("/prebuilt").unwrap(), vec!["fmt.a"]);
    }

    #[tokio::test]
    async fn test_missing_asset_is_not_found() {
        let (vfs, assets) = asset_vfs();
        let err = vfs.stat("/prebuilt/nope.a").await.unwrap_err();
        assert_eq!(err.code(), "ENOENT");
        assert_eq!(assets.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_asset_paths_never_fetch() {
        let (vfs, assets) = asset_vfs();
        let err = vfs.read_file("/tmp/fmt.a").await.unwrap_err();
        assert_eq!(err.code(), "ENOENT");
        assert_eq!(assets.calls.load(Ordering::SeqCst), 0);
    }
}
