//! Authenticated HTTP session shared across the namespace.
//!
//! - [`Session`]: cookies, credentials, single-flight login, rate-limit retry
//! - [`UpgradableRwLock`]: the lock serializing logins against requests
//! - [`HttpTransport`]: the network seam, with a `reqwest` implementation
//! - [`control_module`]: the `username`, `password` and `logout` files

mod classify;
mod control;
mod cookies;
mod error;
mod lock;
mod manager;
mod transport;

#[cfg(any(test, feature = "test-mock"))]
pub mod testing;

pub use classify::{AuthClassifier, MarkerClassifier};
pub use control::{
    LOGOUT_FILE, LogoutHandler, PASSWORD_FILE, PasswordHandler, USERNAME_FILE, UsernameHandler,
    control_module,
};
pub use cookies::CookieJar;
pub use error::{SessionError, SessionResult};
pub use lock::{ReadHold, UpgradableRwLock, WriteHold};
pub use manager::{AuthState, RetryPolicy, Session, SessionConfig};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, RATE_LIMITED, ReqwestTransport,
    TransportError,
};
