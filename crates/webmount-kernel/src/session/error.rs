//! Session error types.

use thiserror::Error;

use super::transport::TransportError;

/// Session failure.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The login attempt did not succeed, or the retried request was still
    /// served to an anonymous user.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The remote could not be reached.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request path could not be resolved against the base URL.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Too many redirects while following a response.
    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),
}

impl SessionError {
    /// Returns true for [`SessionError::AuthenticationFailed`].
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailed)
    }
}

/// Session result type.
pub type SessionResult<T> = Result<T, SessionError>;
