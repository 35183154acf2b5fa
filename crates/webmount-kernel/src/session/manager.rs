//! Authenticated session shared by every module that talks to the remote.
//!
//! ## Request path
//!
//! 1. take a concurrency slot and a read hold;
//! 2. send (following redirects), retrying rate-limited responses;
//! 3. if the caller needs a logged-in page and did not get one, join the
//!    current authentication episode: one caller logs in under the write
//!    hold, everyone else waits for it to finish;
//! 4. retry the original request once.
//!
//! Cookie merges happen under a read hold; clearing or replacing the jar and
//! changing credentials happen only under the write hold.

use parking_lot::Mutex;
use rand::Rng;
use reqwest::Url;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

use super::classify::AuthClassifier;
use super::cookies::CookieJar;
use super::error::{SessionError, SessionResult};
use super::lock::{ReadHold, UpgradableRwLock};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_LOGIN_PATH, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_PASSWORD_FIELD,
    DEFAULT_USER_FIELD, MAX_REDIRECTS, RATE_LIMIT_BACKOFF_SECS, RATE_LIMIT_RETRIES,
};

/// Retry budget for rate-limited responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Lower bound of the uniform backoff.
    pub backoff_min: Duration,
    /// Upper bound of the uniform backoff.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: RATE_LIMIT_RETRIES,
            backoff_min: Duration::from_secs_f64(RATE_LIMIT_BACKOFF_SECS.0),
            backoff_max: Duration::from_secs_f64(RATE_LIMIT_BACKOFF_SECS.1),
        }
    }
}

impl RetryPolicy {
    /// Pick a backoff delay uniformly in the window.
    pub fn backoff(&self) -> Duration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }
        let secs = rand::thread_rng()
            .gen_range(self.backoff_min.as_secs_f64()..=self.backoff_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Static session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL every request path is resolved against.
    pub base_url: String,
    /// Login form endpoint, relative to the base URL.
    pub login_path: String,
    /// Form field carrying the username.
    pub user_field: String,
    /// Form field carrying the password.
    pub password_field: String,
    /// Concurrent requests allowed.
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            user_field: DEFAULT_USER_FIELD.to_string(),
            password_field: DEFAULT_PASSWORD_FIELD.to_string(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the login endpoint.
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n;
        self
    }

    /// Set the rate-limit retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Where the session stands with the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No login attempted since start or since the last logout.
    Unknown,
    /// A login is in flight.
    Authenticating,
    /// The last login or authenticated response succeeded.
    Authenticated,
}

#[derive(Debug, Clone, Default)]
struct Credentials {
    username: String,
    password: String,
}

/// State of the current authentication episode, broadcast to waiters.
#[derive(Debug, Clone, Copy)]
struct Episode {
    /// False while a login is in flight.
    complete: bool,
    /// Outcome of the last finished login.
    succeeded: bool,
}

/// Marks the episode complete even if the winning caller is cancelled.
struct EpisodeGuard<'a> {
    session: &'a Session,
    outcome: Option<bool>,
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        let succeeded = self.outcome.unwrap_or(false);
        *self.session.auth_state.lock() = if succeeded {
            AuthState::Authenticated
        } else {
            AuthState::Unknown
        };
        self.session.episode.send_replace(Episode {
            complete: true,
            succeeded,
        });
    }
}

/// Thread-safe HTTP session with cookie authentication.
pub struct Session {
    config: SessionConfig,
    base: Url,
    transport: Arc<dyn HttpTransport>,
    classifier: Arc<dyn AuthClassifier>,
    slots: Semaphore,
    lock: UpgradableRwLock,
    credentials: Mutex<Credentials>,
    cookies: Mutex<CookieJar>,
    auth_state: Mutex<AuthState>,
    episode: watch::Sender<Episode>,
    login_attempts: AtomicUsize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base", &self.base.as_str())
            .field("username", &self.credentials.lock().username)
            .field("auth_state", &*self.auth_state.lock())
            .finish()
    }
}

impl Session {
    /// Create a session with empty credentials.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn HttpTransport>,
        classifier: Arc<dyn AuthClassifier>,
    ) -> SessionResult<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| SessionError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let (episode, _) = watch::channel(Episode {
            complete: true,
            succeeded: false,
        });
        Ok(Self {
            slots: Semaphore::new(config.max_concurrent_requests.max(1)),
            config,
            base,
            transport,
            classifier,
            lock: UpgradableRwLock::new(),
            credentials: Mutex::new(Credentials::default()),
            cookies: Mutex::new(CookieJar::new()),
            auth_state: Mutex::new(AuthState::Unknown),
            episode,
            login_attempts: AtomicUsize::new(0),
        })
    }

    /// Set initial credentials without invalidating anything.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        {
            let mut creds = self.credentials.lock();
            creds.username = username.into();
            creds.password = password.into();
        }
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn username(&self) -> String {
        self.credentials.lock().username.clone()
    }

    pub fn password(&self) -> String {
        self.credentials.lock().password.clone()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.auth_state.lock()
    }

    /// Copy of the cookie jar.
    pub fn cookies(&self) -> CookieJar {
        self.cookies.lock().clone()
    }

    /// Number of login POSTs issued so far.
    pub fn login_attempts(&self) -> usize {
        self.login_attempts.load(Ordering::SeqCst)
    }

    /// Resolve a request path against the base URL.
    pub fn full_url(&self, path: &str) -> SessionResult<String> {
        self.base
            .join(path)
            .map(String::from)
            .map_err(|e| SessionError::InvalidUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// GET `path`.
    pub async fn get(&self, path: &str, require_authenticated: bool) -> SessionResult<HttpResponse> {
        self.request(&HttpRequest::get(path), require_authenticated).await
    }

    /// Perform `request`, re-authenticating at most once if a logged-in
    /// response was required and not obtained.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn request(
        &self,
        request: &HttpRequest,
        require_authenticated: bool,
    ) -> SessionResult<HttpResponse> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| SessionError::Transport(TransportError::Other("session closed".into())))?;
        let hold = self.lock.read().await;

        let response = self.send_with_retry(request).await?;
        if !require_authenticated {
            self.merge_cookies(&response);
            return Ok(response);
        }
        if self.classifier.is_authenticated(&response) {
            self.merge_cookies(&response);
            self.mark_authenticated();
            return Ok(response);
        }

        tracing::debug!("response not authenticated, joining login episode");
        let (hold, authenticated) = self.reauthenticate(hold).await;
        if !authenticated {
            return Err(SessionError::AuthenticationFailed);
        }

        let response = self.send_with_retry(request).await?;
        let result = if self.classifier.is_authenticated(&response) {
            self.merge_cookies(&response);
            Ok(response)
        } else {
            tracing::warn!("still not authenticated after login");
            Err(SessionError::AuthenticationFailed)
        };
        drop(hold);
        result
    }

    /// Log in explicitly.
    pub async fn authenticate(&self) -> SessionResult<()> {
        let _write = self.lock.write().await;
        *self.auth_state.lock() = AuthState::Authenticating;
        let ok = self.login().await;
        *self.auth_state.lock() = if ok {
            AuthState::Authenticated
        } else {
            AuthState::Unknown
        };
        self.episode.send_modify(|e| e.succeeded = ok);
        if ok {
            Ok(())
        } else {
            Err(SessionError::AuthenticationFailed)
        }
    }

    /// Log out: forget every cookie.
    pub async fn deauthenticate(&self) {
        let _write = self.lock.write().await;
        self.clear_session();
    }

    /// Change the username. A different value logs the session out.
    ///
    /// Returns true if the value changed.
    pub async fn set_username(&self, username: &str) -> bool {
        let _write = self.lock.write().await;
        let changed = self.credentials.lock().username != username;
        if changed {
            self.clear_session();
            self.credentials.lock().username = username.to_string();
            tracing::info!(username, "username changed");
        }
        changed
    }

    /// Change the password. A different value logs the session out.
    ///
    /// Returns true if the value changed.
    pub async fn set_password(&self, password: &str) -> bool {
        let _write = self.lock.write().await;
        let changed = self.credentials.lock().password != password;
        if changed {
            self.clear_session();
            self.credentials.lock().password = password.to_string();
            tracing::info!("password changed");
        }
        changed
    }

    /// Must be called with the write hold.
    fn clear_session(&self) {
        self.cookies.lock().clear();
        *self.auth_state.lock() = AuthState::Unknown;
        tracing::debug!("session cookies cleared");
    }

    fn mark_authenticated(&self) {
        let mut state = self.auth_state.lock();
        if *state == AuthState::Unknown {
            *state = AuthState::Authenticated;
        }
    }

    fn merge_cookies(&self, response: &HttpResponse) {
        self.cookies.lock().merge(response.all_set_cookies());
    }

    /// Join the current authentication episode, consuming the caller's read
    /// hold and returning a fresh one.
    ///
    /// Exactly one caller wins the test-and-clear on the "complete" flag and
    /// logs in; the others drop their hold and wait for the outcome.
    async fn reauthenticate<'a>(&'a self, hold: ReadHold<'a>) -> (ReadHold<'a>, bool) {
        let won = self.episode.send_if_modified(|e| {
            if e.complete {
                e.complete = false;
                true
            } else {
                false
            }
        });

        if won {
            let mut guard = EpisodeGuard {
                session: self,
                outcome: None,
            };
            *self.auth_state.lock() = AuthState::Authenticating;
            let write = hold.upgrade().await;
            let ok = self.login().await;
            guard.outcome = Some(ok);
            drop(guard);
            return (write.downgrade(), ok);
        }

        drop(hold);
        let mut rx = self.episode.subscribe();
        let ok = match rx.wait_for(|e| e.complete).await {
            Ok(episode) => episode.succeeded,
            Err(_) => false,
        };
        (self.lock.read().await, ok)
    }

    /// POST the credentials. Must be called with the write hold.
    ///
    /// Succeeds when the first hop redirects somewhere other than back to the
    /// login form; the jar is then replaced by that hop's cookies.
    async fn login(&self) -> bool {
        self.cookies.lock().clear();
        self.login_attempts.fetch_add(1, Ordering::SeqCst);

        let (username, password) = {
            let creds = self.credentials.lock();
            (creds.username.clone(), creds.password.clone())
        };
        let request = HttpRequest::post(self.config.login_path.clone())
            .field(self.config.user_field.clone(), username.clone())
            .field(self.config.password_field.clone(), password);

        let url = match self.full_url(&request.path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("login url: {}", e);
                return false;
            }
        };
        let response = match self.transport.send(&url, &request, None).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%username, "login request failed: {}", e);
                return false;
            }
        };

        let back_to_login = response
            .location
            .as_deref()
            .map(|loc| loc.ends_with(&self.config.login_path))
            .unwrap_or(true);
        if !response.is_redirect() || back_to_login {
            tracing::warn!(%username, status = response.status, "login rejected");
            return false;
        }

        *self.cookies.lock() =
            CookieJar::from_set_cookies(response.set_cookies.iter().map(String::as_str));
        tracing::info!(%username, "logged in");
        true
    }

    /// Send with redirects followed, retrying rate-limited responses.
    async fn send_with_retry(&self, request: &HttpRequest) -> SessionResult<HttpResponse> {
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            let response = self.send_following(request).await?;
            if !response.is_rate_limited() || attempt >= retry.max_retries {
                return Ok(response);
            }
            attempt += 1;
            let delay = retry.backoff();
            tracing::info!(attempt, ?delay, "rate limited, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    /// Send one request and follow its redirect chain with a private cookie copy.
    async fn send_following(&self, request: &HttpRequest) -> SessionResult<HttpResponse> {
        let mut jar = self.cookies.lock().clone();
        let mut url = self.full_url(&request.path)?;
        let mut current = request.clone();
        let mut history = Vec::new();

        loop {
            let mut response = self
                .transport
                .send(&url, &current, jar.header().as_deref())
                .await?;
            jar.merge(response.set_cookies.iter().map(String::as_str));

            let Some(location) = response.location.clone().filter(|_| response.is_redirect()) else {
                response.history = history;
                return Ok(response);
            };
            if history.len() >= MAX_REDIRECTS {
                return Err(SessionError::TooManyRedirects(request.path.clone()));
            }
            url = Url::parse(&url)
                .and_then(|base| base.join(&location))
                .map(String::from)
                .map_err(|e| SessionError::InvalidUrl {
                    url: location.clone(),
                    reason: e.to_string(),
                })?;
            current = HttpRequest::get(url.clone());
            history.push(response);
        }
    }
}
