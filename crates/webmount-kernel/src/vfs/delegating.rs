//! First-segment routing between a root module and named child modules.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::module::{EmptyModule, Module};
use super::types::FileAttr;

/// Routes operations by the first path segment.
///
/// If the first segment names a child, the remainder goes to that child and
/// the child appears as a subdirectory. Anything else goes, unconsumed, to the
/// root module whose entries appear directly at this level. A child always
/// shadows a root entry of the same name.
pub struct DelegatingModule {
    root: Arc<dyn Module>,
    children: IndexMap<String, Arc<dyn Module>>,
}

impl std::fmt::Debug for DelegatingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingModule")
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DelegatingModule {
    fn default() -> Self {
        Self::new(Arc::new(EmptyModule))
    }
}

impl DelegatingModule {
    /// Create a delegating module around `root`.
    pub fn new(root: Arc<dyn Module>) -> Self {
        Self {
            root,
            children: IndexMap::new(),
        }
    }

    /// Mount `module` as subdirectory `name`, replacing any previous child.
    pub fn mount(&mut self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.children.insert(name.into(), module);
    }

    /// Builder form of [`DelegatingModule::mount`].
    pub fn with_child(mut self, name: impl Into<String>, module: Arc<dyn Module>) -> Self {
        self.mount(name, module);
        self
    }

    /// Names of mounted children, in mount order.
    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Mounted children, in mount order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Arc<dyn Module>)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The root module.
    pub fn root(&self) -> &Arc<dyn Module> {
        &self.root
    }

    /// Resolve a path to the module that owns it and the path relative to it.
    ///
    /// Returns `Route::Child` with an empty remainder when `path` names a
    /// child's own directory.
    pub fn route<'p>(&self, path: &'p str) -> Route<'_, 'p> {
        let (prefix, rest) = match path.split_once('/') {
            Some((prefix, rest)) => (prefix, rest),
            None => (path, ""),
        };
        match self.children.get(prefix) {
            Some(child) if !prefix.is_empty() => Route::Child(child, rest),
            _ => Route::Root(&self.root, path),
        }
    }

    /// Attributes of a mounted child's directory entry.
    fn child_dir_attr(child: &Arc<dyn Module>) -> FileAttr {
        FileAttr::directory(0).with_nlink(2 + child.dir_count() as u32)
    }
}

/// Result of [`DelegatingModule::route`].
pub enum Route<'m, 'p> {
    /// A mounted child and the remainder after its name.
    Child(&'m Arc<dyn Module>, &'p str),
    /// The root module and the unconsumed path.
    Root(&'m Arc<dyn Module>, &'p str),
}

#[async_trait]
impl Module for DelegatingModule {
    fn dir_count(&self) -> usize {
        self.children.len() + self.root.dir_count()
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        if path.is_empty() {
            let mut attr = self.root.stat("").await.unwrap_or_else(|_| FileAttr::directory(0));
            attr.size += self.children.len() as u64;
            return Ok(attr.with_nlink(2 + self.dir_count() as u32));
        }
        match self.route(path) {
            Route::Child(child, "") => Ok(Self::child_dir_attr(child)),
            Route::Child(child, rest) => child.stat(rest).await,
            Route::Root(root, path) => root.stat(path).await,
        }
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        if path.is_empty() {
            let mut names: Vec<String> = self.children.keys().cloned().collect();
            let own = self.root.list("").await?;
            names.extend(own.into_iter().filter(|n| !self.children.contains_key(n)));
            return Ok(names);
        }
        match self.route(path) {
            Route::Child(child, rest) => child.list(rest).await,
            Route::Root(root, path) => root.list(path).await,
        }
    }

    async fn open(&self, path: &str, write: bool) -> VfsResult<()> {
        match self.route(path) {
            Route::Child(_, "") => Err(VfsError::is_a_directory(path)),
            Route::Child(child, rest) => child.open(rest, write).await,
            Route::Root(root, path) => root.open(path, write).await,
        }
    }

    async fn read(&self, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>> {
        match self.route(path) {
            Route::Child(_, "") => Err(VfsError::is_a_directory(path)),
            Route::Child(child, rest) => child.read(rest, size, offset).await,
            Route::Root(root, path) => root.read(path, size, offset).await,
        }
    }

    async fn write(&self, path: &str, data: &[u8], offset: u64) -> VfsResult<u32> {
        match self.route(path) {
            Route::Child(_, "") => Err(VfsError::is_a_directory(path)),
            Route::Child(child, rest) => child.write(rest, data, offset).await,
            Route::Root(root, path) => root.write(path, data, offset).await,
        }
    }

    async fn truncate(&self, path: &str, size: u64) -> VfsResult<()> {
        match self.route(path) {
            Route::Child(_, "") => Err(VfsError::is_a_directory(path)),
            Route::Child(child, rest) => child.truncate(rest, size).await,
            Route::Root(root, path) => root.truncate(path, size).await,
        }
    }
}
