//! Configuration defaults.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Remote service the default configuration points at.
pub const DEFAULT_BASE_URL: &str = "https://www.newbiecontest.org/";

/// Login form endpoint, relative to the base URL.
pub const DEFAULT_LOGIN_PATH: &str = "forums/index.php?action=login2";

/// Login form field carrying the username.
pub const DEFAULT_USER_FIELD: &str = "user";

/// Login form field carrying the password.
pub const DEFAULT_PASSWORD_FIELD: &str = "passwrd";

/// Form field carrying a vote.
pub const DEFAULT_VOTE_FIELD: &str = "note";

/// Concurrent requests allowed per session.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Cache lifetime after a successful refresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache lifetime after a refresh that failed (authentication or parsing).
pub const DEFAULT_UNAUTHENTICATED_TTL: Duration = Duration::from_secs(3);

/// Extra attempts after a rate-limited response.
pub const RATE_LIMIT_RETRIES: u32 = 2;

/// Backoff window between rate-limited attempts, in seconds.
pub const RATE_LIMIT_BACKOFF_SECS: (f64, f64) = (1.0, 10.0);

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("webmount/", env!("CARGO_PKG_VERSION"));

/// Name of the synthetic file shown when content needs a login.
pub const NOT_AUTHENTICATED_FILE: &str = "NotAuthenticated";

/// Content of the synthetic not-authenticated file.
pub const NOT_AUTHENTICATED_CONTENT: &[u8] = b"You are not authenticated !\n";

/// What reading the password control file returns.
pub const PASSWORD_PLACEHOLDER: &[u8] = b"<password is write-only>\n";

/// What reading the logout control file returns.
pub const LOGOUT_PLACEHOLDER: &[u8] = b"<Write 1 to this file to logout>\n";

/// Largest content a write or truncate may give a writable entry.
pub const MAX_WRITABLE_SIZE: u64 = 4096;
