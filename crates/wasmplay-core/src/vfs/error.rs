//! Typed VFS errors with POSIX error codes.
//!
//! Toolchain modules expect errno-style failures from the filesystem, so
//! every variant maps to a code string via [`FsError::code`].

use std::io::{self, ErrorKind};

use thiserror::Error;

use crate::cache::CacheError;

/// Integer handle for an open file.
pub type Fd = u32;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file exists: {0}")]
    Exists(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("bad file descriptor: {0}")]
    BadDescriptor(Fd),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to fetch asset {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: CacheError,
    },
}

impl FsError {
    /// POSIX error code name for this error.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "ENOENT",
            FsError::Exists(_) => "EEXIST",
            FsError::NotDirectory(_) => "ENOTDIR",
            FsError::IsDirectory(_) => "EISDIR",
            FsError::NotEmpty(_) => "ENOTEMPTY",
            FsError::BadDescriptor(_) => "EBADF",
            FsError::InvalidPath(_) | FsError::InvalidArgument(_) => "EINVAL",
            FsError::Fetch { .. } => "EIO",
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        let kind = match &err {
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::Exists(_) => ErrorKind::AlreadyExists,
            FsError::NotDirectory(_) => ErrorKind::NotADirectory,
            FsError::IsDirectory(_) => ErrorKind::IsADirectory,
            FsError::NotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            FsError::BadDescriptor(_) | FsError::InvalidPath(_) | FsError::InvalidArgument(_) => {
                ErrorKind::InvalidInput
            }
            FsError::Fetch { .. } => ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(FsError::NotFound("/x".into()).code(), "ENOENT");
        assert_eq!(FsError::BadDescriptor(9).code(), "EBADF");
        assert_eq!(FsError::NotEmpty("/d".into()).code(), "ENOTEMPTY");
    }

    #[test]
    fn test_into_io_error_keeps_kind() {
        let err: io::Error = FsError::NotFound("/missing".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("/missing"));
    }
}
