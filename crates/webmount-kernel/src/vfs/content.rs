//! Leaf module whose entries come from a content provider.
//!
//! Every operation first refreshes the cache if it has expired. Callers that
//! arrive while a refresh is running wait for it and reuse its result.
//!
//! Refresh outcomes:
//!
//! | outcome | entries | children | expiry | state |
//! |---|---|---|---|---|
//! | snapshot | replaced | replaced | snapshot TTL | Fresh |
//! | authentication required | kept, plus `NotAuthenticated` | kept | short TTL | Degraded |
//! | parse / transport error | kept | kept | short TTL | Degraded |
//!
//! Children carried by a snapshot are routed by first path segment, the way
//! [`DelegatingModule`] routes its mounts, and keep their own caches until
//! the next successful refresh replaces them.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::delegating::DelegatingModule;
use super::entry::VirtualEntry;
use super::error::VfsResult;
use super::module::{EntryMap, Module, StaticModule, entry_map};
use super::types::FileAttr;
use crate::constants::{DEFAULT_UNAUTHENTICATED_TTL, NOT_AUTHENTICATED_CONTENT, NOT_AUTHENTICATED_FILE};
use crate::provider::{ContentProvider, ProviderError, Snapshot};
use crate::session::Session;

/// Where a content module's cache stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never refreshed, or expired.
    Stale,
    /// Holds a successful snapshot.
    Fresh,
    /// The last refresh failed; retried after the short TTL.
    Degraded,
}

type Children = IndexMap<String, Arc<dyn Module>>;

struct Cache {
    entries: EntryMap,
    children: Children,
    /// Entries and children assembled for routing.
    tree: Arc<DelegatingModule>,
    expiry: Option<Instant>,
    degraded: bool,
    /// Set by the first refresh, whatever its outcome.
    populated: bool,
}

impl Cache {
    fn rebuild(&mut self) {
        let root = Arc::new(StaticModule::from_map(self.entries.clone()));
        let mut tree = DelegatingModule::new(root);
        for (name, child) in &self.children {
            tree.mount(name.clone(), Arc::clone(child));
        }
        self.tree = Arc::new(tree);
    }
}

/// Cached entries refreshed by a [`ContentProvider`].
pub struct ContentModule {
    name: String,
    session: Arc<Session>,
    provider: Arc<dyn ContentProvider>,
    degraded_ttl: Duration,
    cache: RwLock<Cache>,
    refreshing: Mutex<()>,
}

impl std::fmt::Debug for ContentModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentModule")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ContentModule {
    pub fn new(
        name: impl Into<String>,
        session: Arc<Session>,
        provider: Arc<dyn ContentProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            session,
            provider,
            degraded_ttl: DEFAULT_UNAUTHENTICATED_TTL,
            cache: RwLock::new(Cache {
                entries: EntryMap::new(),
                children: Children::new(),
                tree: Arc::new(DelegatingModule::default()),
                expiry: None,
                degraded: false,
                populated: false,
            }),
            refreshing: Mutex::new(()),
        }
    }

    /// Set the lifetime of a failed refresh.
    pub fn with_degraded_ttl(mut self, ttl: Duration) -> Self {
        self.degraded_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CacheState {
        let cache = self.cache.read();
        match cache.expiry {
            Some(expiry) if Instant::now() < expiry => {
                if cache.degraded {
                    CacheState::Degraded
                } else {
                    CacheState::Fresh
                }
            }
            _ => CacheState::Stale,
        }
    }

    /// Force the next operation to refresh. Cached entries stay visible to
    /// [`Module::dir_count`] until then.
    pub fn invalidate(&self) {
        self.cache.write().expiry = None;
    }

    fn current(&self) -> Option<Arc<DelegatingModule>> {
        let cache = self.cache.read();
        match cache.expiry {
            Some(expiry) if Instant::now() < expiry => Some(Arc::clone(&cache.tree)),
            _ => None,
        }
    }

    /// Return the live tree, fetching a new snapshot if the cache has expired.
    pub async fn refresh(&self) -> Arc<DelegatingModule> {
        if let Some(tree) = self.current() {
            return tree;
        }
        let _refreshing = self.refreshing.lock().await;
        if let Some(tree) = self.current() {
            return tree;
        }

        let outcome = self.provider.refresh(&self.session).await;
        self.apply(outcome)
    }

    fn apply(&self, outcome: Result<Snapshot, ProviderError>) -> Arc<DelegatingModule> {
        let now = Instant::now();
        let mut cache = self.cache.write();
        cache.populated = true;
        match outcome {
            Ok(snapshot) => {
                cache.entries = entry_map(snapshot.entries);
                cache.children = snapshot.children.into_iter().collect();
                cache.expiry = Some(now + snapshot.ttl);
                cache.degraded = false;
                tracing::debug!(
                    module = %self.name,
                    entries = cache.entries.len(),
                    children = cache.children.len(),
                    ttl = ?snapshot.ttl,
                    "refreshed"
                );
            }
            Err(ProviderError::AuthenticationRequired) => {
                cache.entries.insert(
                    NOT_AUTHENTICATED_FILE.to_string(),
                    Arc::new(VirtualEntry::file(NOT_AUTHENTICATED_FILE, NOT_AUTHENTICATED_CONTENT)),
                );
                cache.expiry = Some(now + self.degraded_ttl);
                cache.degraded = true;
                tracing::warn!(module = %self.name, "not authenticated, retrying later");
            }
            Err(e) => {
                cache.expiry = Some(now + self.degraded_ttl);
                cache.degraded = true;
                tracing::warn!(module = %self.name, "refresh failed: {}", e);
            }
        }
        cache.rebuild();
        Arc::clone(&cache.tree)
    }
}

#[async_trait]
impl Module for ContentModule {
    fn dir_count(&self) -> usize {
        let cache = self.cache.read();
        if !cache.populated {
            return self.provider.directory_count_hint().unwrap_or(0);
        }
        cache.tree.dir_count()
    }

    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let tree = self.refresh().await;
        tree.stat(path).await
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        let tree = self.refresh().await;
        tree.list(path).await
    }

    async fn open(&self, path: &str, write: bool) -> VfsResult<()> {
        let tree = self.refresh().await;
        tree.open(path, write).await
    }

    async fn read(&self, path: &str, size: u32, offset: u64) -> VfsResult<Vec<u8>> {
        let tree = self.refresh().await;
        tree.read(path, size, offset).await
    }

    async fn write(&self, path: &str, data: &[u8], offset: u64) -> VfsResult<u32> {
        let tree = self.refresh().await;
        tree.write(path, data, offset).await
    }

    async fn truncate(&self, path: &str, size: u64) -> VfsResult<()> {
        let tree = self.refresh().await;
        tree.truncate(path, size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{FakeSite, fake_session};
    use crate::vfs::VfsError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back scripted outcomes, repeating the last one.
    struct Scripted {
        outcomes: parking_lot::Mutex<VecDeque<Result<Vec<&'static str>, &'static str>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Vec<&'static str>, &'static str>>) -> Self {
            Self {
                outcomes: parking_lot::Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ContentProvider for Scripted {
        async fn refresh(&self, _session: &Session) -> Result<Snapshot, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = {
                let mut outcomes = self.outcomes.lock();
                if outcomes.len() > 1 {
                    outcomes.pop_front()
                } else {
                    outcomes.front().cloned()
                }
            };
            match next {
                Some(Ok(names)) => Ok(Snapshot::new(
                    names
                        .into_iter()
                        .map(|n| match n.strip_suffix('/') {
                            Some(dir) => VirtualEntry::directory(dir, 0),
                            None => VirtualEntry::file(n, n.as_bytes()),
                        })
                        .collect(),
                    Duration::from_secs(60),
                )),
                Some(Err("auth")) => Err(ProviderError::AuthenticationRequired),
                Some(Err(msg)) => Err(ProviderError::Parse(msg.to_string())),
                None => Err(ProviderError::Parse("empty script".into())),
            }
        }

        fn directory_count_hint(&self) -> Option<usize> {
            Some(7)
        }
    }

    fn module(provider: Arc<Scripted>) -> ContentModule {
        let site = FakeSite::default();
        ContentModule::new("test", fake_session(&site), provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_refresh_and_ttl() {
        let provider = Arc::new(Scripted::new(vec![Ok(vec!["a"]), Ok(vec!["b"])]));
        let module = module(provider.clone());
        assert_eq!(module.state(), CacheState::Stale);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        assert_eq!(module.list("").await.unwrap(), vec!["a"]);
        assert_eq!(module.state(), CacheState::Fresh);
        module.read("a", 10, 0).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(module.state(), CacheState::Stale);
        assert_eq!(module.list("").await.unwrap(), vec!["b"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_adds_marker() {
        let provider = Arc::new(Scripted::new(vec![Ok(vec!["a"]), Err("auth"), Ok(vec!["c"])]));
        let module = module(provider.clone());
        module.list("").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(module.list("").await.unwrap(), vec!["a", NOT_AUTHENTICATED_FILE]);
        assert_eq!(module.state(), CacheState::Degraded);
        assert_eq!(
            module.read(NOT_AUTHENTICATED_FILE, 100, 0).await.unwrap(),
            NOT_AUTHENTICATED_CONTENT
        );
        assert!(matches!(
            module.open(NOT_AUTHENTICATED_FILE, true).await,
            Err(VfsError::PermissionDenied(_))
        ));

        tokio::time::advance(DEFAULT_UNAUTHENTICATED_TTL).await;
        assert_eq!(module.list("").await.unwrap(), vec!["c"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_keeps_entries() {
        let provider = Arc::new(Scripted::new(vec![Ok(vec!["a"]), Err("bad markup")]));
        let module = module(provider.clone());
        module.list("").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(module.list("").await.unwrap(), vec!["a"]);
        assert_eq!(module.state(), CacheState::Degraded);
        module.list("").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(DEFAULT_UNAUTHENTICATED_TTL).await;
        module.list("").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_single_fetch() {
        let mut scripted = Scripted::new(vec![Ok(vec!["a"])]);
        scripted.delay = Duration::from_millis(500);
        let provider = Arc::new(scripted);
        let module = Arc::new(module(provider.clone()));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let module = module.clone();
                tokio::spawn(async move { module.list("").await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), vec!["a"]);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dir_count_hint_then_cache() {
        let provider = Arc::new(Scripted::new(vec![Ok(vec!["d1/", "f", "d2/"])]));
        let module = module(provider);
        assert_eq!(module.dir_count(), 7);

        let attr = module.stat("").await.unwrap();
        assert_eq!(module.dir_count(), 2);
        assert_eq!(attr.nlink, 4);
        assert_eq!(attr.size, 3);
        assert!(module.list("d1").await.unwrap().is_empty());
        assert!(matches!(module.read("d1", 1, 0).await, Err(VfsError::IsADirectory(_))));
        assert!(matches!(module.list("f").await, Err(VfsError::NotADirectory(_))));
        assert!(matches!(module.stat("nope").await, Err(VfsError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refresh() {
        let provider = Arc::new(Scripted::new(vec![Ok(vec!["a", "d/"]), Ok(vec!["b"])]));
        let module = module(provider);
        module.list("").await.unwrap();
        module.invalidate();
        assert_eq!(module.state(), CacheState::Stale);
        // Cached entries, not the provider hint.
        assert_eq!(module.dir_count(), 1);
        assert_eq!(module.list("").await.unwrap(), vec!["b"]);
        assert_eq!(module.dir_count(), 0);
    }

    /// Two levels: categories whose challenges are content modules of their own.
    struct Categories {
        session: Arc<Session>,
        calls: AtomicUsize,
        leaves: Vec<Arc<Scripted>>,
    }

    #[async_trait]
    impl ContentProvider for Categories {
        async fn refresh(&self, _session: &Session) -> Result<Snapshot, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let snapshot = Snapshot::new(
                vec![VirtualEntry::file("about", b"two categories\n".to_vec())],
                Duration::from_secs(600),
            );
            Ok(self.leaves.iter().zip(["web", "crypto"]).fold(snapshot, |snapshot, (leaf, name)| {
                let child = ContentModule::new(name, self.session.clone(), leaf.clone());
                snapshot.with_child(name, Arc::new(child))
            }))
        }

        fn directory_count_hint(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_children_refresh_on_their_own() {
        let site = FakeSite::default();
        let session = fake_session(&site);
        let web = Arc::new(Scripted::new(vec![Ok(vec!["sqli", "xss/"]), Ok(vec!["csrf"])]));
        let crypto = Arc::new(Scripted::new(vec![Ok(vec!["rsa"])]));
        let categories = Arc::new(Categories {
            session: session.clone(),
            calls: AtomicUsize::new(0),
            leaves: vec![web.clone(), crypto.clone()],
        });
        let module = ContentModule::new("challenges", session, categories.clone());
        assert_eq!(module.dir_count(), 2);

        assert_eq!(module.list("").await.unwrap(), vec!["web", "crypto", "about"]);
        assert_eq!(module.dir_count(), 2);
        assert_eq!(web.calls.load(Ordering::SeqCst), 0);

        // Before its first refresh a child reports the provider hint.
        assert_eq!(module.stat("web").await.unwrap().nlink, 2 + 7);
        assert_eq!(module.list("web").await.unwrap(), vec!["sqli", "xss"]);
        assert_eq!(module.read("web/sqli", 100, 0).await.unwrap(), b"sqli");
        assert_eq!(module.stat("web").await.unwrap().nlink, 3);
        assert!(module.list("web/xss").await.unwrap().is_empty());
        assert!(matches!(module.read("web/nope", 1, 0).await, Err(VfsError::NotFound(_))));
        assert!(matches!(module.open("crypto", false).await, Err(VfsError::IsADirectory(_))));
        assert_eq!(web.calls.load(Ordering::SeqCst), 1);
        assert_eq!(crypto.calls.load(Ordering::SeqCst), 0);

        // The child expires before the parent and refreshes alone.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(module.list("web").await.unwrap(), vec!["csrf"]);
        assert_eq!(web.calls.load(Ordering::SeqCst), 2);
        assert_eq!(categories.calls.load(Ordering::SeqCst), 1);
    }
}
