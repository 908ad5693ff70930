//! VFS data types shared across the module.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;

/// Kind of entry in the VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsEntryKind {
    File,
    Directory,
}

bitflags! {
    /// `open(2)` flags, using the numeric values toolchain modules pass.
    ///
    /// Read-only is the absence of both `WRONLY` and `RDWR`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0o1;
        const RDWR = 0o2;
        const CREATE = 0o100;
        const EXCL = 0o200;
        const TRUNC = 0o1000;
        const APPEND = 0o2000;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

/// Access/modify/change times of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Times {
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

impl Times {
    pub(crate) fn now() -> Self {
        let now = Utc::now();
        Self {
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Result of `stat`/`fstat`.
#[derive(Debug, Clone)]
pub struct Stat {
    pub kind: VfsEntryKind,
    pub size: u64,
    /// POSIX mode bits including the file-type bits.
    pub mode: u32,
    pub times: Times,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.kind == VfsEntryKind::Directory
    }
}

pub(crate) const MODE_FILE: u32 = 0o100_644;
pub(crate) const MODE_DIR: u32 = 0o040_755;

/// A node in the in-memory tree.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    File { data: Vec<u8>, times: Times },
    Directory {
        children: IndexSet<String>,
        times: Times,
    },
}

impl Node {
    pub(crate) fn empty_dir() -> Self {
        Node::Directory {
            children: IndexSet::new(),
            times: Times::now(),
        }
    }

    pub(crate) fn times_mut(&mut self) -> &mut Times {
        match self {
            Node::File { times, .. } | Node::Directory { times, .. } => times,
        }
    }

    pub(crate) fn stat(&self) -> Stat {
        match self {
            Node::File { data, times } => Stat {
                kind: VfsEntryKind::File,
                size: data.len() as u64,
                mode: MODE_FILE,
                times: *times,
            },
            Node::Directory { times, .. } => Stat {
                kind: VfsEntryKind::Directory,
                size: 0,
                mode: MODE_DIR,
                times: *times,
            },
        }
    }
}
