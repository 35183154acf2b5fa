//! Core VFS types.
//!
//! Path-based, no inodes: the mounting runtime keeps its own inode ↔ path
//! table and asks the namespace by path.

use std::sync::LazyLock;
use std::time::SystemTime;

/// Permission bits for a read-only entry (`r--r--r--` / `r-xr-xr-x`).
pub const READ_ONLY_FILE_PERM: u32 = 0o444;
/// Permission bits for a directory.
pub const DIRECTORY_PERM: u32 = 0o555;
/// Write bits added to writable entries (`-w--w----`).
pub const WRITE_PERM: u32 = 0o220;

/// Owner and group reported for every entry, fixed at process start.
static OWNER: LazyLock<(u32, u32)> = LazyLock::new(process_owner);

#[cfg(unix)]
fn process_owner() -> (u32, u32) {
    (
        rustix::process::getuid().as_raw(),
        rustix::process::getgid().as_raw(),
    )
}

#[cfg(not(unix))]
fn process_owner() -> (u32, u32) {
    (0, 0)
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    /// Size in bytes for files, logical child count for directories.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o444).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time.
    pub atime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Number of hard links.
    pub nlink: u32,
    /// User ID of the mounting process.
    pub uid: u32,
    /// Group ID of the mounting process.
    pub gid: u32,
}

impl FileAttr {
    /// Create attributes for a new file.
    pub fn file(size: u64, writable: bool) -> Self {
        let now = SystemTime::now();
        let (uid, gid) = *OWNER;
        Self {
            size,
            kind: FileType::File,
            perm: READ_ONLY_FILE_PERM | if writable { WRITE_PERM } else { 0 },
            mtime: now,
            atime: now,
            ctime: now,
            nlink: 1,
            uid,
            gid,
        }
    }

    /// Create attributes for a new directory.
    pub fn directory(size: u64) -> Self {
        let now = SystemTime::now();
        let (uid, gid) = *OWNER;
        Self {
            size,
            kind: FileType::Directory,
            perm: DIRECTORY_PERM,
            mtime: now,
            atime: now,
            ctime: now,
            nlink: 2, // . and ..
            uid,
            gid,
        }
    }

    /// Set the link count.
    pub fn with_nlink(mut self, nlink: u32) -> Self {
        self.nlink = nlink;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if the owner write bit is set.
    pub fn is_writable(&self) -> bool {
        self.perm & WRITE_PERM != 0
    }
}
