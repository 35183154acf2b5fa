//! Module tree answering filesystem operations.
//!
//! - [`Module`] - Core trait: stat, list, open, read, write, truncate
//! - [`StaticModule`] - Fixed entry table (control files)
//! - [`ContentModule`] - Entries produced by a provider, cached with a TTL
//! - [`DelegatingModule`] - Root module plus named child modules
//! - [`Namespace`] - The mounted tree, with path normalization
//!
//! ## Design Decisions
//!
//! - **Path-based**: modules receive paths relative to their own directory;
//!   the empty path is the module itself.
//! - **First-segment routing**: a delegating module consumes one segment when
//!   it names a child and hands the whole path to its root otherwise.
//! - **Lazy refresh**: content modules refresh on access, one fetch at a time.

mod content;
mod delegating;
mod entry;
mod error;
mod module;
mod namespace;
mod types;

pub use content::{CacheState, ContentModule};
pub use delegating::{DelegatingModule, Route};
pub use entry::{EntryHandler, VirtualEntry, resized, slice_at, spliced, trim_line_end};
pub use error::{VfsError, VfsResult};
pub use module::{EmptyModule, EntryMap, Module, StaticModule, entry_map};
pub use namespace::{Namespace, NamespaceBuilder, normalize_path};
pub use types::{DIRECTORY_PERM, FileAttr, FileType, READ_ONLY_FILE_PERM, WRITE_PERM};
