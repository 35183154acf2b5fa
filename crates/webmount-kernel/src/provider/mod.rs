//! Content providers: what a content module asks for on every refresh.
//!
//! A provider turns remote pages into entries plus a lifetime. A snapshot may
//! also carry child modules, typically content modules of their own, which
//! appear as subdirectories and refresh on their own schedule.
//! Site-specific scrapers implement [`ContentProvider`]; [`PageProvider`] is
//! the generic one driven by configuration.

mod page;
mod vote;

pub use page::{PageProvider, PageSpec};
pub use vote::{FormVoteSubmitter, RangeVoteHandler, VoteSubmitter, VoteValue};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::session::{Session, SessionError};
use crate::vfs::{Module, VirtualEntry};

/// Result of a successful refresh.
pub struct Snapshot {
    /// Entries of the module, in display order. A repeated name replaces the
    /// earlier entry.
    pub entries: Vec<VirtualEntry>,
    /// Subdirectories backed by their own modules. A child shadows an entry
    /// of the same name.
    pub children: Vec<(String, Arc<dyn Module>)>,
    /// How long the entries stay fresh.
    pub ttl: Duration,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("entries", &self.entries)
            .field("children", &self.children.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Snapshot {
    pub fn new(entries: Vec<VirtualEntry>, ttl: Duration) -> Self {
        Self {
            entries,
            children: Vec::new(),
            ttl,
        }
    }

    /// Add a subdirectory served by `module`.
    pub fn with_child(mut self, name: impl Into<String>, module: Arc<dyn Module>) -> Self {
        self.children.push((name.into(), module));
        self
    }
}

/// Why a refresh produced nothing.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The content needs a login and none could be obtained.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The remote answered with something the provider could not make sense of.
    #[error("parse error: {0}")]
    Parse(String),

    /// The remote could not be reached.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<SessionError> for ProviderError {
    fn from(e: SessionError) -> Self {
        if e.is_auth_failure() {
            ProviderError::AuthenticationRequired
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Produces the entries of one content module.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch and parse the remote content.
    async fn refresh(&self, session: &Session) -> Result<Snapshot, ProviderError>;

    /// Directory count to report before the first refresh, when known.
    fn directory_count_hint(&self) -> Option<usize> {
        None
    }
}
