//! VFS error types.

use std::io;
use thiserror::Error;

/// Error kinds surfaced at the filesystem boundary.
///
/// Refresh failures (parse errors, authentication failures) never appear
/// here directly: they are absorbed into a degraded module cache, and the
/// operation that triggered the refresh sees whatever the cache then holds.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Path resolves to nothing in any module.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation requires a file but the path is a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Operation requires a directory but the path is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Write on a read-only entry, or write-mode open without write permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Payload rejected by a control file.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport or remote failure while serving the operation.
    #[error("I/O error: {0}")]
    Io(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an Io error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// The errno a FUSE adapter replies with for this error.
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        use rustix::io::Errno;

        let errno = match self {
            VfsError::NotFound(_) => Errno::NOENT,
            VfsError::IsADirectory(_) => Errno::ISDIR,
            VfsError::NotADirectory(_) => Errno::NOTDIR,
            VfsError::PermissionDenied(_) => Errno::ACCESS,
            VfsError::InvalidInput(_) => Errno::INVAL,
            VfsError::Io(_) => Errno::IO,
        };
        errno.raw_os_error()
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::InvalidInput(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Io(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
