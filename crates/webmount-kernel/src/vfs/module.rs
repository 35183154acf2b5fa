//! Module trait and the entry-table modules.
//!
//! A module answers filesystem operations for one subtree of the namespace.
//! Paths handed to a module are relative to it: `""` is the module's own
//! directory, `"name"` one of its entries.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

use super::entry::VirtualEntry;
use super::error::{VfsError, VfsResult};
use super::types::FileAttr;

/// Name → entry table, in insertion order. Later insertion of a name wins.
pub type EntryMap = IndexMap<String, Arc<VirtualEntry>>;

/// Core module operations.
///
/// All operations are path-based; a module never sees the prefix it is
/// mounted under.
#[async_trait]
pub trait Module: Send + Sync {
    /// Number of directory-typed direct children.
    ///
    /// Must not trigger a remote fetch: parents call this while computing
    /// their own link count.
    fn dir_count(&self) -> usize;

    /// Get attributes.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// List entry names of a directory.
    async fn list(&self, path: &str) -> VfsResult<Vec<String>>;

    /// Check that `path` can be opened, for writing if `write` is set.
    async fn open(&self, path: &str, write: bool) -> VfsResult<()>;

    /// Read up to `size` bytes at `offset`.
    async fn read(&self, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>>;

    /// Write `data` at `offset`. Returns the number of bytes accepted.
    async fn write(&self, path: &str, data: &[u8], offset: u64) -> VfsResult<u32>;

    /// Truncate or extend a file to `size` bytes.
    async fn truncate(&self, path: &str, size: u64) -> VfsResult<()>;
}

/// The empty module: owns nothing.
///
/// Used as the fallback root of a delegating module with no root content.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyModule;

#[async_trait]
impl Module for EmptyModule {
    fn dir_count(&self) -> usize {
        0
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        Err(VfsError::not_found(path))
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        if path.is_empty() {
            Ok(Vec::new())
        } else {
            Err(VfsError::not_found(path))
        }
    }

    async fn open(&self, path: &str, _write: bool) -> VfsResult<()> {
        Err(VfsError::not_found(path))
    }

    async fn read(&self, path: &str, _size: u32, _offset: u64) -> VfsResult<Vec<u8>> {
        Err(VfsError::not_found(path))
    }

    async fn write(&self, path: &str, _data: &[u8], _offset: u64) -> VfsResult<u32> {
        Err(VfsError::not_found(path))
    }

    async fn truncate(&self, path: &str, _size: u64) -> VfsResult<()> {
        Err(VfsError::not_found(path))
    }
}

/// A module over a fixed entry table that never refreshes.
#[derive(Debug, Default)]
pub struct StaticModule {
    entries: EntryMap,
}

impl StaticModule {
    /// Create a module from entries; a repeated name replaces the earlier one.
    pub fn new(entries: impl IntoIterator<Item = VirtualEntry>) -> Self {
        Self {
            entries: entry_map(entries),
        }
    }

    /// Create a module over an already built table.
    pub fn from_map(entries: EntryMap) -> Self {
        Self { entries }
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> Option<&Arc<VirtualEntry>> {
        self.entries.get(name)
    }
}

#[async_trait]
impl Module for StaticModule {
    fn dir_count(&self) -> usize {
        count_dirs(&self.entries)
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        stat_in(&self.entries, path)
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        list_in(&self.entries, path)
    }

    async fn open(&self, path: &str, write: bool) -> VfsResult<()> {
        open_in(&self.entries, path, write)
    }

    async fn read(&self, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>> {
        read_in(&self.entries, path, size, offset)
    }

    async fn write(&self, path: &str, data: &[u8], offset: u64) -> VfsResult<u32> {
        lookup_file(&self.entries, path)?.write(data, offset).await
    }

    async fn truncate(&self, path: &str, size: u64) -> VfsResult<()> {
        lookup_file(&self.entries, path)?.truncate(size).await
    }
}

// ============================================================================
// Entry-table helpers shared by the leaf modules
// ============================================================================

/// Build an entry table keyed by entry name.
pub fn entry_map(entries: impl IntoIterator<Item = VirtualEntry>) -> EntryMap {
    entries
        .into_iter()
        .map(|e| (e.name().to_string(), Arc::new(e)))
        .collect()
}

pub(crate) fn count_dirs(entries: &EntryMap) -> usize {
    entries.values().filter(|e| e.is_dir()).count()
}

/// Attributes of the directory holding `entries`.
pub(crate) fn dir_attr(entries: &EntryMap) -> FileAttr {
    FileAttr::directory(entries.len() as u64).with_nlink(2 + count_dirs(entries) as u32)
}

pub(crate) fn lookup<'a>(entries: &'a EntryMap, path: &str) -> VfsResult<&'a Arc<VirtualEntry>> {
    entries.get(path).ok_or_else(|| VfsError::not_found(path))
}

pub(crate) fn lookup_file(entries: &EntryMap, path: &str) -> VfsResult<Arc<VirtualEntry>> {
    if path.is_empty() {
        return Err(VfsError::is_a_directory(path));
    }
    let entry = lookup(entries, path)?;
    if entry.is_dir() {
        return Err(VfsError::is_a_directory(path));
    }
    Ok(Arc::clone(entry))
}

pub(crate) fn stat_in(entries: &EntryMap, path: &str) -> VfsResult<FileAttr> {
    if path.is_empty() {
        return Ok(dir_attr(entries));
    }
    lookup(entries, path).map(|e| e.attr())
}

pub(crate) fn list_in(entries: &EntryMap, path: &str) -> VfsResult<Vec<String>> {
    if path.is_empty() {
        return Ok(entries.keys().cloned().collect());
    }
    // Directory entries inside a leaf table carry no children of their own.
    let entry = lookup(entries, path)?;
    if entry.is_dir() {
        Ok(Vec::new())
    } else {
        Err(VfsError::not_a_directory(path))
    }
}

pub(crate) fn open_in(entries: &EntryMap, path: &str, write: bool) -> VfsResult<()> {
    let entry = lookup_file(entries, path)?;
    if write && !entry.is_writable() {
        return Err(VfsError::permission_denied(path));
    }
    Ok(())
}

pub(crate) fn read_in(entries: &EntryMap, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>> {
    Ok(lookup_file(entries, path)?.read(offset, size))
}
