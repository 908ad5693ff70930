//! VFS path newtype: the only way to address VFS content.
//!
//! `VfsPath` is always absolute and normalized: `.` and `..` components are
//! resolved, duplicate separators collapse, and `..` above the root stays at
//! the root. Relative input is resolved against a working directory with
//! [`VfsPath::resolve`].
//!
//! Directories are keyed with a trailing `/` inside the node table; the
//! path itself never carries one (except the root), but remembers whether
//! the caller wrote it so `stat` can honour the trailing-slash convention.

use std::fmt;

use super::error::FsError;

/// Normalized absolute path within the virtual file system.
///
/// Invariants (enforced at construction):
/// - Starts with `/`
/// - No `.` or `..` components
/// - No `//` sequences
/// - No null bytes
/// - No trailing `/` (except root `/`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfsPath {
    path: String,
    dir_hint: bool,
}

impl VfsPath {
    /// Create a path from an absolute string, normalizing it.
    pub fn new(path: &str) -> Result<Self, FsError> {
        if path.is_empty() {
            return Err(FsError::InvalidPath("path cannot be empty".to_string()));
        }
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath(format!(
                "path must start with '/': {path}"
            )));
        }
        Self::normalize(path)
    }

    /// The root directory.
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            dir_hint: true,
        }
    }

    /// Resolve `raw` against `cwd`. Absolute input ignores `cwd`.
    pub fn resolve(cwd: &VfsPath, raw: &str) -> Result<Self, FsError> {
        if raw.is_empty() {
            return Err(FsError::InvalidPath("path cannot be empty".to_string()));
        }
        if raw.starts_with('/') {
            return Self::normalize(raw);
        }
        Self::normalize(&format!("{}/{}", cwd.path, raw))
    }

    fn normalize(raw: &str) -> Result<Self, FsError> {
        if raw.contains('\0') {
            return Err(FsError::InvalidPath(
                "path cannot contain null bytes".to_string(),
            ));
        }
        let mut parts: Vec<&str> = Vec::new();
        for component in raw.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        let trailing = raw.ends_with('/') || raw.ends_with("/.") || raw.ends_with("/..");
        let path = format!("/{}", parts.join("/"));
        Ok(Self {
            dir_hint: trailing || parts.is_empty(),
            path,
        })
    }

    /// The path as a string slice (no trailing slash).
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Whether this is the root directory.
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Whether the caller spelled this path with a trailing separator.
    pub fn has_dir_hint(&self) -> bool {
        self.dir_hint
    }

    /// Node-table key for a file at this path.
    pub(crate) fn file_key(&self) -> String {
        self.path.clone()
    }

    /// Node-table key for a directory at this path (trailing `/`).
    pub(crate) fn dir_key(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.path)
        }
    }

    /// Parent path, or `None` if this is the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.is_root() {
            return None;
        }
        let path = match self.path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(pos) => self.path[..pos].to_string(),
            None => return None,
        };
        Some(VfsPath {
            path,
            dir_hint: true,
        })
    }

    /// Final component of the path, or `None` for root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.path.rsplit('/').next()
    }

    /// Join a relative segment onto this path.
    pub fn join(&self, segment: &str) -> Result<VfsPath, FsError> {
        if segment.starts_with('/') {
            return Err(FsError::InvalidPath(format!(
                "join segment must be relative: {segment}"
            )));
        }
        Self::resolve(self, segment)
    }

    /// Every ancestor from the root down to (excluding) this path.
    pub fn ancestors(&self) -> Vec<VfsPath> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        while let Some(p) = cur {
            cur = p.parent();
            out.push(p);
        }
        out.reverse();
        out
    }

    /// Whether this path lies under (or equals) `prefix`.
    ///
    /// `prefix` is compared textually; a trailing `/` in the prefix means
    /// "strictly inside that directory".
    pub fn has_prefix(&self, prefix: &str) -> bool {
        if let Some(dir) = prefix.strip_suffix('/') {
            self.path.starts_with(prefix) || (!dir.is_empty() && self.path == dir)
        } else {
            self.path.starts_with(prefix)
        }
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}
