//! Virtual file system: the in-memory POSIX subset toolchain modules run on.
//!
//! User and generated files (the source buffer, import configurations,
//! compiled archives) live purely in memory. Toolchain assets, recognised by
//! path prefix, are read through from the asset cache on first touch.
//!
//! # Architecture
//!
//! ```text
//! toolchain module  ->  Vfs (fd table + node table)  ->  ReadThrough (asset cache)
//! ```
//!
//! The `Vfs` owns all state and is passed around by `Arc`; there are no
//! globals, so every test starts from a fresh filesystem.

pub mod backend;
pub mod error;
pub mod local;
pub mod path;
pub mod types;
mod vfs;

pub use backend::{AssetSource, BoxFuture, ReadThrough};
pub use error::{Fd, FsError};
pub use local::HostMirror;
pub use path::VfsPath;
pub use types::{OpenFlags, Stat, Times, VfsEntryKind};
pub use vfs::{FIRST_FD, STDERR, STDIN, STDOUT, Vfs};
