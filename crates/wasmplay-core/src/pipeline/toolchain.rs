//! Toolchain seam.
//!
//! The formatter, compiler and linker are opaque modules. The pipeline only
//! knows how to call them: a tool, an argument vector and the shared VFS the
//! tool reads its inputs from and writes its outputs (and fds 1/2) into.

use std::io;
use std::sync::Arc;

use strum::{AsRefStr, Display, EnumString};

use crate::vfs::{BoxFuture, FsError, Vfs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ToolKind {
    Format,
    Compile,
    Link,
}

/// How a tool run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    pub code: i32,
}

impl ToolExit {
    pub const SUCCESS: ToolExit = ToolExit { code: 0 };

    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A tool could not be run at all. Diagnostics are not errors: they come
/// back as stderr output plus a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("{tool} unavailable: {reason}")]
    Unavailable { tool: ToolKind, reason: String },
    #[error("toolchain I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("toolchain filesystem access failed: {0}")]
    Fs(#[from] FsError),
}

pub trait Toolchain: Send + Sync {
    fn run<'a>(
        &'a self,
        tool: ToolKind,
        args: &'a [String],
        vfs: &'a Arc<Vfs>,
    ) -> BoxFuture<'a, Result<ToolExit, ToolchainError>>;
}
