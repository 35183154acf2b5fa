//! Vote control file: a bounded score or `nothing`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::session::{HttpRequest, Session, SessionError};
use crate::vfs::{EntryHandler, VfsError, VfsResult, VirtualEntry};

/// Highest accepted score.
pub const MAX_SCORE: u8 = 10;

/// A parsed vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteValue {
    /// Withdraw the vote.
    #[default]
    Nothing,
    /// A score in `0..=MAX_SCORE`.
    Score(u8),
}

impl VoteValue {
    /// Parse a write payload. Surrounding whitespace is ignored.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?.trim();
        if text == "nothing" {
            return Some(VoteValue::Nothing);
        }
        match text.parse::<i64>() {
            Ok(n) if (0..=MAX_SCORE as i64).contains(&n) => Some(VoteValue::Score(n as u8)),
            _ => None,
        }
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteValue::Nothing => f.write_str("nothing"),
            VoteValue::Score(n) => write!(f, "{n}"),
        }
    }
}

/// Sends a vote to the remote.
#[async_trait]
pub trait VoteSubmitter: Send + Sync {
    async fn submit(&self, vote: VoteValue) -> VfsResult<()>;
}

/// Validates the payload, submits it, and keeps `"<value>\n"` as content.
///
/// Truncation is ignored so `echo 7 > vote` works.
pub struct RangeVoteHandler {
    submitter: Arc<dyn VoteSubmitter>,
}

impl RangeVoteHandler {
    pub fn new(submitter: Arc<dyn VoteSubmitter>) -> Self {
        Self { submitter }
    }
}

#[async_trait]
impl EntryHandler for RangeVoteHandler {
    async fn write(&self, entry: &VirtualEntry, data: &[u8], _offset: u64) -> VfsResult<u32> {
        let vote = VoteValue::parse(data).ok_or_else(|| {
            VfsError::invalid_input(format!("vote must be 0-{MAX_SCORE} or nothing"))
        })?;
        self.submitter.submit(vote).await?;
        entry.set_content(format!("{vote}\n"));
        Ok(data.len() as u32)
    }

    async fn truncate(&self, _entry: &VirtualEntry, _size: u64) -> VfsResult<()> {
        Ok(())
    }
}

/// Posts the vote as a form field and remembers the last accepted one.
pub struct FormVoteSubmitter {
    session: Arc<Session>,
    path: String,
    field: String,
    last: Mutex<VoteValue>,
}

impl FormVoteSubmitter {
    pub fn new(session: Arc<Session>, path: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            session,
            path: path.into(),
            field: field.into(),
            last: Mutex::new(VoteValue::Nothing),
        }
    }

    /// Last vote the remote accepted.
    pub fn last(&self) -> VoteValue {
        *self.last.lock()
    }
}

#[async_trait]
impl VoteSubmitter for FormVoteSubmitter {
    async fn submit(&self, vote: VoteValue) -> VfsResult<()> {
        let request = HttpRequest::post(self.path.clone()).field(self.field.clone(), vote.to_string());
        let response = self.session.request(&request, true).await.map_err(|e| match e {
            SessionError::AuthenticationFailed => VfsError::permission_denied(self.path.clone()),
            other => VfsError::io(other.to_string()),
        })?;
        if response.status >= 400 {
            tracing::warn!(status = response.status, path = %self.path, "vote rejected");
            return Err(VfsError::invalid_input(format!("vote rejected ({})", response.status)));
        }
        *self.last.lock() = vote;
        tracing::info!(%vote, path = %self.path, "vote submitted");
        Ok(())
    }
}
