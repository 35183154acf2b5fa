//! Generic provider exposing one remote page as a directory.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::vote::{FormVoteSubmitter, RangeVoteHandler};
use super::{ContentProvider, ProviderError, Snapshot};
use crate::constants::{DEFAULT_CACHE_TTL, DEFAULT_VOTE_FIELD};
use crate::session::Session;
use crate::vfs::VirtualEntry;

/// File holding the page body.
pub const CONTENT_FILE: &str = "content";
/// File holding the final URL after redirects.
pub const URL_FILE: &str = "url";
/// File holding the HTTP status.
pub const STATUS_FILE: &str = "status";
/// Vote control file, present when the page has a vote endpoint.
pub const VOTE_FILE: &str = "vote";

/// Which page to fetch and how.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    /// Directory name in the namespace.
    pub name: String,
    /// Path relative to the base URL.
    pub path: String,
    /// Whether the page must be fetched as a logged-in user.
    pub authenticated: bool,
    /// Lifetime of a successful fetch.
    pub ttl: Duration,
    /// Form endpoint accepting votes for this page.
    pub vote_path: Option<String>,
    /// Form field carrying the vote.
    pub vote_field: String,
}

impl PageSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            authenticated: false,
            ttl: DEFAULT_CACHE_TTL,
            vote_path: None,
            vote_field: DEFAULT_VOTE_FIELD.to_string(),
        }
    }

    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_vote(mut self, path: impl Into<String>) -> Self {
        self.vote_path = Some(path.into());
        self
    }
}

/// Fetches a single page and exposes its body, URL, status and optional vote.
pub struct PageProvider {
    spec: PageSpec,
    vote: Option<Arc<FormVoteSubmitter>>,
}

impl PageProvider {
    /// The session is needed up front for the vote file's submissions.
    pub fn new(spec: PageSpec, session: Arc<Session>) -> Self {
        let vote = spec
            .vote_path
            .as_ref()
            .map(|path| Arc::new(FormVoteSubmitter::new(session, path.clone(), spec.vote_field.clone())));
        Self { spec, vote }
    }

    pub fn spec(&self) -> &PageSpec {
        &self.spec
    }
}

#[async_trait]
impl ContentProvider for PageProvider {
    async fn refresh(&self, session: &Session) -> Result<Snapshot, ProviderError> {
        let response = session.get(&self.spec.path, self.spec.authenticated).await?;
        if response.status >= 400 {
            return Err(ProviderError::Transport(format!(
                "{} answered {}",
                self.spec.path, response.status
            )));
        }

        let mut entries = vec![
            VirtualEntry::file(CONTENT_FILE, response.body.clone()),
            VirtualEntry::file(URL_FILE, format!("{}\n", response.url)),
            VirtualEntry::file(STATUS_FILE, format!("{}\n", response.status)),
        ];
        if let Some(submitter) = &self.vote {
            entries.push(
                VirtualEntry::file(VOTE_FILE, format!("{}\n", submitter.last()))
                    .with_handler(Arc::new(RangeVoteHandler::new(submitter.clone()))),
            );
        }
        tracing::debug!(page = %self.spec.name, bytes = response.body.len(), "page fetched");
        Ok(Snapshot::new(entries, self.spec.ttl))
    }

    fn directory_count_hint(&self) -> Option<usize> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{BASE_URL, FakeSite, fake_session};

    #[tokio::test]
    async fn test_public_page_snapshot() {
        let site = FakeSite::new("alice", "pw");
        site.public_page("rules", "be nice");
        let session = fake_session(&site);
        let provider = PageProvider::new(PageSpec::new("rules", "rules"), session.clone());

        let snapshot = provider.refresh(&session).await.unwrap();
        let names: Vec<_> = snapshot.entries.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec![CONTENT_FILE, URL_FILE, STATUS_FILE]);
        assert!(String::from_utf8(snapshot.entries[0].content()).unwrap().contains("be nice"));
        assert_eq!(snapshot.entries[1].content(), format!("{BASE_URL}rules\n").into_bytes());
        assert_eq!(snapshot.entries[2].content(), b"200\n");
        assert_eq!(snapshot.ttl, DEFAULT_CACHE_TTL);
    }

    #[tokio::test]
    async fn test_missing_page_is_an_error() {
        let site = FakeSite::new("alice", "pw");
        let session = fake_session(&site);
        let provider = PageProvider::new(PageSpec::new("gone", "gone"), session.clone());
        assert!(matches!(
            provider.refresh(&session).await,
            Err(ProviderError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_protected_page_without_credentials() {
        let site = FakeSite::new("alice", "pw");
        site.protected_page("account", "points: 42");
        let session = fake_session(&site);
        let provider = PageProvider::new(
            PageSpec::new("account", "account").authenticated(true),
            session.clone(),
        );
        assert!(matches!(
            provider.refresh(&session).await,
            Err(ProviderError::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn test_vote_file_submits() {
        let site = FakeSite::new("alice", "pw");
        site.public_page("challenge", "a puzzle");
        site.protected_page("challenge/vote", "thanks");
        let session = fake_session(&site);
        session.set_username("alice").await;
        session.set_password("pw").await;

        let provider = PageProvider::new(
            PageSpec::new("challenge", "challenge").with_vote("challenge/vote"),
            session.clone(),
        );
        let snapshot = provider.refresh(&session).await.unwrap();
        let vote = snapshot.entries.last().unwrap();
        assert_eq!(vote.name(), VOTE_FILE);
        assert_eq!(vote.content(), b"nothing\n");

        vote.write(b"9\n", 0).await.unwrap();
        assert_eq!(vote.content(), b"9\n");
        assert_eq!(site.login_posts(), 1);

        let snapshot = provider.refresh(&session).await.unwrap();
        assert_eq!(snapshot.entries.last().unwrap().content(), b"9\n");
    }
}
