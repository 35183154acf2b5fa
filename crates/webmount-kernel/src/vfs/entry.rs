//! In-memory files and directories.
//!
//! Entries are rebuilt on every content refresh; nothing identifies an entry
//! across refreshes except its name.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use super::error::{VfsError, VfsResult};
use super::types::{FileAttr, FileType, WRITE_PERM};
use crate::constants::MAX_WRITABLE_SIZE;

/// Per-entry write behaviour.
///
/// Control files (credentials, logout, votes) install a handler to turn
/// writes into session or remote actions. Entries without a handler store
/// writes verbatim.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// Handle a write of `data` at `offset`. Returns the number of bytes accepted.
    async fn write(&self, entry: &VirtualEntry, data: &[u8], offset: u64) -> VfsResult<u32>;

    /// Handle a truncate (or extension) to `size` bytes.
    async fn truncate(&self, entry: &VirtualEntry, size: u64) -> VfsResult<()>;
}

/// Content and attributes, swapped together under one lock.
struct EntryState {
    content: Vec<u8>,
    attr: FileAttr,
}

/// A file or directory exposed by a module.
pub struct VirtualEntry {
    name: String,
    state: Mutex<EntryState>,
    handler: Option<Arc<dyn EntryHandler>>,
}

impl fmt::Debug for VirtualEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VirtualEntry")
            .field("name", &self.name)
            .field("kind", &state.attr.kind)
            .field("size", &state.attr.size)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl VirtualEntry {
    /// Create a read-only file.
    pub fn file(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let attr = FileAttr::file(content.len() as u64, false);
        Self {
            name: name.into(),
            state: Mutex::new(EntryState { content, attr }),
            handler: None,
        }
    }

    /// Create a directory entry. `size` is the cosmetic child count.
    pub fn directory(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(EntryState {
                content: Vec::new(),
                attr: FileAttr::directory(size),
            }),
            handler: None,
        }
    }

    /// Mark the entry writable. Writes are stored verbatim unless a handler is set.
    pub fn writable(self) -> Self {
        {
            let mut state = self.state.lock();
            state.attr.perm |= WRITE_PERM;
        }
        self
    }

    /// Install a write handler. Implies [`VirtualEntry::writable`].
    pub fn with_handler(mut self, handler: Arc<dyn EntryHandler>) -> Self {
        self.handler = Some(handler);
        self.writable()
    }

    /// Entry name (a single path segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File type.
    pub fn kind(&self) -> FileType {
        self.state.lock().attr.kind
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Returns true if writes are accepted.
    pub fn is_writable(&self) -> bool {
        self.state.lock().attr.is_writable()
    }

    /// Snapshot of the attributes.
    pub fn attr(&self) -> FileAttr {
        self.state.lock().attr.clone()
    }

    /// Copy of the whole content. Marks access time.
    pub fn content(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        state.attr.atime = SystemTime::now();
        state.content.clone()
    }

    /// Read up to `size` bytes at `offset`. Empty past the end. Marks access time.
    pub fn read(&self, offset: u64, size: u32) -> Vec<u8> {
        let mut state = self.state.lock();
        state.attr.atime = SystemTime::now();
        slice_at(&state.content, offset, size).to_vec()
    }

    /// Replace the content, updating size, mtime and ctime in the same step.
    pub fn set_content(&self, content: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state.content = content.into();
        Self::touch(&mut state);
    }

    /// Write `data` at `offset`, zero-filling any gap. Returns the new content.
    pub fn splice(&self, data: &[u8], offset: u64) -> VfsResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.content = spliced(&state.content, data, offset)?;
        Self::touch(&mut state);
        Ok(state.content.clone())
    }

    /// Cut or zero-extend the content to `size` bytes. Returns the new content.
    pub fn resize(&self, size: u64) -> VfsResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.content = resized(&state.content, size)?;
        Self::touch(&mut state);
        Ok(state.content.clone())
    }

    /// Refresh modify/status-change times without touching content.
    pub fn touch_times(&self) {
        let mut state = self.state.lock();
        let now = SystemTime::now();
        state.attr.mtime = now;
        state.attr.ctime = now;
    }

    fn touch(state: &mut EntryState) {
        let now = SystemTime::now();
        state.attr.size = state.content.len() as u64;
        state.attr.mtime = now;
        state.attr.ctime = now;
    }

    /// Write through the handler, or store verbatim.
    pub async fn write(&self, data: &[u8], offset: u64) -> VfsResult<u32> {
        if self.is_dir() {
            return Err(VfsError::is_a_directory(&self.name));
        }
        if !self.is_writable() {
            return Err(VfsError::permission_denied(&self.name));
        }
        match &self.handler {
            Some(handler) => handler.write(self, data, offset).await,
            None => {
                self.splice(data, offset)?;
                Ok(data.len() as u32)
            }
        }
    }

    /// Truncate through the handler, or cut/extend verbatim.
    pub async fn truncate(&self, size: u64) -> VfsResult<()> {
        if self.is_dir() {
            return Err(VfsError::is_a_directory(&self.name));
        }
        if !self.is_writable() {
            return Err(VfsError::permission_denied(&self.name));
        }
        match &self.handler {
            Some(handler) => handler.truncate(self, size).await,
            None => {
                self.resize(size)?;
                Ok(())
            }
        }
    }
}

/// Sub-slice of `content` starting at `offset`, at most `size` bytes.
pub fn slice_at(content: &[u8], offset: u64, size: u32) -> &[u8] {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
    let end = start.saturating_add(size as usize).min(content.len());
    &content[start..end]
}

/// Byte length for a writable entry, or InvalidInput past [`MAX_WRITABLE_SIZE`].
fn writable_len(size: Option<u64>) -> VfsResult<usize> {
    size.filter(|&size| size <= MAX_WRITABLE_SIZE)
        .and_then(|size| usize::try_from(size).ok())
        .ok_or_else(|| {
            VfsError::invalid_input(format!("writable files hold at most {MAX_WRITABLE_SIZE} bytes"))
        })
}

/// `content` with `data` written at `offset`, zero-filling any gap.
pub fn spliced(content: &[u8], data: &[u8], offset: u64) -> VfsResult<Vec<u8>> {
    let end = writable_len(offset.checked_add(data.len() as u64))?;
    let start = end - data.len();
    let mut out = content.to_vec();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[start..end].copy_from_slice(data);
    Ok(out)
}

/// `content` cut or zero-extended to `size` bytes.
pub fn resized(content: &[u8], size: u64) -> VfsResult<Vec<u8>> {
    let size = writable_len(Some(size))?;
    let mut out = content.to_vec();
    out.resize(size, 0);
    Ok(out)
}

/// Strip trailing CR/LF, the normalization applied before comparing credentials.
pub fn trim_line_end(value: &[u8]) -> &[u8] {
    let mut end = value.len();
    while end > 0 && matches!(value[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_file_entry() {
        let entry = VirtualEntry::file("title", b"hello".to_vec());
        assert_eq!(entry.name(), "title");
        assert!(!entry.is_dir());
        assert!(!entry.is_writable());
        assert_eq!(entry.attr().size, 5);
        assert_eq!(entry.attr().nlink, 1);
    }

    #[test]
    fn test_directory_entry() {
        let entry = VirtualEntry::directory("web", 12);
        assert!(entry.is_dir());
        let attr = entry.attr();
        assert_eq!(attr.size, 12);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn test_read_slices() {
        let entry = VirtualEntry::file("f", b"0123456789".to_vec());
        assert_eq!(entry.read(0, 4), b"0123");
        assert_eq!(entry.read(8, 100), b"89");
        assert!(entry.read(10, 4).is_empty());
        assert!(entry.read(u64::MAX, 4).is_empty());
    }

    #[test]
    fn test_set_content_updates_size() {
        let entry = VirtualEntry::file("f", Vec::new());
        let before = entry.attr().mtime;
        entry.set_content(b"abc".to_vec());
        let attr = entry.attr();
        assert_eq!(attr.size, 3);
        assert!(attr.mtime >= before);
        assert_eq!(attr.mtime, attr.ctime);
    }

    #[test]
    fn test_splice_and_resize() {
        assert_eq!(spliced(b"abc", b"XY", 1).unwrap(), b"aXY");
        assert_eq!(spliced(b"ab", b"Z", 4).unwrap(), b"ab\0\0Z");
        assert_eq!(resized(b"abcdef", 2).unwrap(), b"ab");
        assert_eq!(resized(b"ab", 4).unwrap(), b"ab\0\0");
    }

    #[test]
    fn test_splice_and_resize_bounds() {
        let full = MAX_WRITABLE_SIZE as usize;
        assert_eq!(spliced(b"", b"x", MAX_WRITABLE_SIZE - 1).unwrap().len(), full);
        assert!(matches!(spliced(b"", b"x", MAX_WRITABLE_SIZE), Err(VfsError::InvalidInput(_))));
        assert!(matches!(spliced(b"ab", b"x", u64::MAX), Err(VfsError::InvalidInput(_))));
        assert!(matches!(spliced(b"ab", b"x", u64::MAX - 1), Err(VfsError::InvalidInput(_))));
        assert_eq!(resized(b"", MAX_WRITABLE_SIZE).unwrap().len(), full);
        assert!(matches!(resized(b"ab", 1 << 62), Err(VfsError::InvalidInput(_))));
        assert!(matches!(resized(b"ab", u64::MAX), Err(VfsError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_oversized_write_leaves_content() {
        let entry = VirtualEntry::file("notes", b"keep".to_vec()).writable();
        assert!(matches!(entry.write(b"x", u64::MAX).await, Err(VfsError::InvalidInput(_))));
        assert!(matches!(entry.truncate(1 << 62).await, Err(VfsError::InvalidInput(_))));
        assert_eq!(entry.content(), b"keep");
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"alice\r\n"), b"alice");
        assert_eq!(trim_line_end(b"alice\n\n"), b"alice");
        assert_eq!(trim_line_end(b" alice "), b" alice ");
        assert_eq!(trim_line_end(b"\n"), b"");
    }

    #[tokio::test]
    async fn test_read_only_write_denied() {
        let entry = VirtualEntry::file("f", b"x".to_vec());
        assert!(matches!(
            entry.write(b"y", 0).await,
            Err(VfsError::PermissionDenied(_))
        ));
        assert!(matches!(
            entry.truncate(0).await,
            Err(VfsError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_verbatim_round_trip() {
        let entry = VirtualEntry::file("notes", Vec::new()).writable();
        assert_eq!(entry.write(b"hello\n", 0).await.unwrap(), 6);
        assert_eq!(entry.read(0, 6), b"hello\n");

        entry.truncate(3).await.unwrap();
        assert_eq!(entry.content(), b"hel");
        entry.truncate(5).await.unwrap();
        assert_eq!(entry.content(), b"hel\0\0");
    }

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl EntryHandler for CountingHandler {
        async fn write(&self, _: &VirtualEntry, data: &[u8], _: u64) -> VfsResult<u32> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(data.len() as u32)
        }

        async fn truncate(&self, _: &VirtualEntry, _: u64) -> VfsResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_receives_writes() {
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let entry = VirtualEntry::file("ctl", b"keep".to_vec()).with_handler(handler.clone());
        assert!(entry.is_writable());

        entry.write(b"data", 0).await.unwrap();
        entry.truncate(0).await.unwrap();

        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        // The handler decides what to store; this one stores nothing.
        assert_eq!(entry.content(), b"keep");
    }
}
