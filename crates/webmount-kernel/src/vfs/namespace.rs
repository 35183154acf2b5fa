//! The mounted tree.
//!
//! The namespace root holds the session control files; every other top-level
//! name is a mounted module. Paths arrive in whatever form the filesystem
//! adapter has them (`/news/`, `news`, `//news`) and are normalized before
//! routing.

use std::sync::Arc;
use std::time::Duration;

use super::content::ContentModule;
use super::delegating::DelegatingModule;
use super::error::VfsResult;
use super::module::Module;
use super::types::FileAttr;
use crate::constants::DEFAULT_UNAUTHENTICATED_TTL;
use crate::provider::{PageProvider, PageSpec};
use crate::session::{Session, control_module};

/// Strip leading, trailing and repeated slashes, and `.` segments.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// A session plus the module tree it serves.
pub struct Namespace {
    session: Arc<Session>,
    tree: DelegatingModule,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("session", &self.session)
            .field("tree", &self.tree)
            .finish()
    }
}

impl Namespace {
    /// A namespace holding only the control files.
    pub fn new(session: Arc<Session>) -> Self {
        let root = Arc::new(control_module(session.clone()));
        Self {
            session,
            tree: DelegatingModule::new(root),
        }
    }

    pub fn builder(session: Arc<Session>) -> NamespaceBuilder {
        NamespaceBuilder::new(session)
    }

    /// Mount `module` as a top-level directory. A second mount under the
    /// same name replaces the first.
    pub fn mount(&mut self, name: impl Into<String>, module: Arc<dyn Module>) {
        let name = name.into();
        tracing::debug!(%name, "mounted");
        self.tree.mount(name, module);
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Names of the mounted modules, in mount order.
    pub fn mounts(&self) -> Vec<String> {
        self.tree.child_names().map(str::to_string).collect()
    }

    /// Link count of the root directory.
    ///
    /// Counts the mounted directories and, one level further down, every
    /// directory they report.
    pub fn root_link_count(&self) -> u32 {
        let nested: usize = self.tree.children().map(|(_, m)| m.dir_count()).sum();
        (2 + nested + self.tree.children().count()) as u32
    }

    #[tracing::instrument(skip(self), name = "namespace.stat")]
    pub async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let path = normalize_path(path);
        let attr = self.tree.stat(&path).await?;
        if path.is_empty() {
            return Ok(attr.with_nlink(self.root_link_count()));
        }
        Ok(attr)
    }

    #[tracing::instrument(skip(self), name = "namespace.list")]
    pub async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        self.tree.list(&normalize_path(path)).await
    }

    #[tracing::instrument(skip(self), name = "namespace.open")]
    pub async fn open(&self, path: &str, write: bool) -> VfsResult<()> {
        self.tree.open(&normalize_path(path), write).await
    }

    #[tracing::instrument(skip(self), name = "namespace.read")]
    pub async fn read(&self, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>> {
        self.tree.read(&normalize_path(path), size, offset).await
    }

    #[tracing::instrument(skip(self, data), fields(len = data.len()), name = "namespace.write")]
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> VfsResult<u32> {
        self.tree.write(&normalize_path(path), data, offset).await
    }

    #[tracing::instrument(skip(self), name = "namespace.truncate")]
    pub async fn truncate(&self, path: &str, size: u64) -> VfsResult<()> {
        self.tree.truncate(&normalize_path(path), size).await
    }
}

/// Assembles a [`Namespace`].
pub struct NamespaceBuilder {
    session: Arc<Session>,
    degraded_ttl: Duration,
    mounts: Vec<(String, Arc<dyn Module>)>,
}

impl NamespaceBuilder {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            degraded_ttl: DEFAULT_UNAUTHENTICATED_TTL,
            mounts: Vec::new(),
        }
    }

    /// Lifetime of a failed refresh for pages added after this call.
    pub fn degraded_ttl(mut self, ttl: Duration) -> Self {
        self.degraded_ttl = ttl;
        self
    }

    /// Mount an arbitrary module.
    pub fn mount(mut self, name: impl Into<String>, module: Arc<dyn Module>) -> Self {
        self.mounts.push((name.into(), module));
        self
    }

    /// Mount a page as a content module named after it.
    pub fn page(self, spec: PageSpec) -> Self {
        let name = spec.name.clone();
        let provider = Arc::new(PageProvider::new(spec, self.session.clone()));
        let module = ContentModule::new(name.clone(), self.session.clone(), provider)
            .with_degraded_ttl(self.degraded_ttl);
        self.mount(name, Arc::new(module))
    }

    pub fn build(self) -> Namespace {
        let mut namespace = Namespace::new(self.session);
        for (name, module) in self.mounts {
            namespace.mount(name, module);
        }
        namespace
    }
}
