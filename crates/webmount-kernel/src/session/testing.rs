//! Scripted in-memory site for tests.
//!
//! `FakeSite` implements [`HttpTransport`] and behaves like a small forum:
//! posting valid credentials to [`LOGIN_PATH`] redirects with a fresh
//! `sid` cookie, protected pages answer with a login banner unless the
//! request carries a live `sid`, and any path can be scripted to answer
//! 403 a number of times first.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::classify::MarkerClassifier;
use super::manager::{RetryPolicy, Session, SessionConfig};
use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

/// Base URL of the fake site.
pub const BASE_URL: &str = "http://site.test/";
/// Login endpoint of the fake site.
pub const LOGIN_PATH: &str = "login";
/// Text every page served to an anonymous user contains.
pub const LOGIN_BANNER: &str = "please log in";

#[derive(Debug, Clone)]
struct Page {
    body: String,
    public: bool,
}

#[derive(Debug, Default)]
struct SiteState {
    username: String,
    password: String,
    pages: HashMap<String, Page>,
    redirects: HashMap<String, (String, Option<String>)>,
    rate_limits: HashMap<String, u32>,
    sessions: HashSet<String>,
    next_sid: u64,
    login_posts: usize,
    login_users: Vec<String>,
    hits: HashMap<String, usize>,
    delay: Option<Duration>,
    offline: bool,
}

/// In-memory site. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    /// Site accepting exactly these credentials.
    pub fn new(username: &str, password: &str) -> Self {
        let site = Self::default();
        site.set_credentials(username, password);
        site
    }

    pub fn set_credentials(&self, username: &str, password: &str) {
        let mut state = self.state.lock();
        state.username = username.to_string();
        state.password = password.to_string();
    }

    /// Serve `body` at `path` to logged-in users only.
    pub fn protected_page(&self, path: &str, body: &str) -> &Self {
        self.page(path, body, false)
    }

    /// Serve `body` at `path` to everyone.
    pub fn public_page(&self, path: &str, body: &str) -> &Self {
        self.page(path, body, true)
    }

    fn page(&self, path: &str, body: &str, public: bool) -> &Self {
        self.state.lock().pages.insert(
            path.to_string(),
            Page {
                body: body.to_string(),
                public,
            },
        );
        self
    }

    /// Answer `path` with a 302 to `target`, optionally setting a cookie.
    pub fn redirect(&self, path: &str, target: &str, set_cookie: Option<&str>) -> &Self {
        self.state.lock().redirects.insert(
            path.to_string(),
            (target.to_string(), set_cookie.map(str::to_string)),
        );
        self
    }

    /// Answer the next `times` requests to `path` with 403.
    pub fn rate_limit(&self, path: &str, times: u32) -> &Self {
        self.state.lock().rate_limits.insert(path.to_string(), times);
        self
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Make every request fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Forget every issued session, as if they expired server-side.
    pub fn expire_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    /// Number of login POSTs received.
    pub fn login_posts(&self) -> usize {
        self.state.lock().login_posts
    }

    /// Usernames seen in login POSTs, in order.
    pub fn login_users(&self) -> Vec<String> {
        self.state.lock().login_users.clone()
    }

    /// Requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().hits.get(path).copied().unwrap_or(0)
    }

    fn respond(&self, url: &str, request: &HttpRequest, cookie: Option<&str>) -> HttpResponse {
        let path = url.strip_prefix(BASE_URL).unwrap_or(url).to_string();
        let mut state = self.state.lock();
        *state.hits.entry(path.clone()).or_default() += 1;

        if let Some(remaining) = state.rate_limits.get_mut(&path).filter(|n| **n > 0) {
            *remaining -= 1;
            return HttpResponse {
                status: 403,
                url: url.to_string(),
                body: b"slow down".to_vec(),
                ..Default::default()
            };
        }

        if request.method == Method::Post && path == LOGIN_PATH {
            return state.login(url, request);
        }

        if let Some((target, set_cookie)) = state.redirects.get(&path) {
            return HttpResponse {
                status: 302,
                url: url.to_string(),
                location: Some(target.clone()),
                set_cookies: set_cookie.iter().cloned().collect(),
                ..Default::default()
            };
        }

        let logged_in = cookie
            .and_then(|c| cookie_value(c, "sid"))
            .is_some_and(|sid| state.sessions.contains(sid));
        match state.pages.get(&path) {
            Some(page) if logged_in => HttpResponse::ok(url, page.body.clone()),
            Some(page) if page.public => {
                HttpResponse::ok(url, format!("{LOGIN_BANNER}\n{}", page.body))
            }
            Some(_) => HttpResponse::ok(url, LOGIN_BANNER),
            None => HttpResponse {
                status: 404,
                url: url.to_string(),
                body: b"not found".to_vec(),
                ..Default::default()
            },
        }
    }
}

impl SiteState {
    fn login(&mut self, url: &str, request: &HttpRequest) -> HttpResponse {
        self.login_posts += 1;
        let field = |name: &str| {
            request
                .form
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let (user, pass) = (field("user"), field("passwrd"));
        self.login_users.push(user.clone());

        if user.is_empty() || user != self.username || pass != self.password {
            return HttpResponse {
                status: 302,
                url: url.to_string(),
                location: Some(format!("{BASE_URL}{LOGIN_PATH}")),
                ..Default::default()
            };
        }

        self.next_sid += 1;
        let sid = self.next_sid.to_string();
        self.sessions.insert(sid.clone());
        HttpResponse {
            status: 302,
            url: url.to_string(),
            location: Some(format!("{BASE_URL}index")),
            set_cookies: vec![format!("sid={sid}; Path=/; HttpOnly")],
            ..Default::default()
        }
    }
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[async_trait]
impl HttpTransport for FakeSite {
    async fn send(
        &self,
        url: &str,
        request: &HttpRequest,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let (delay, offline) = {
            let state = self.state.lock();
            (state.delay, state.offline)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if offline {
            return Err(TransportError::Other("site offline".into()));
        }
        Ok(self.respond(url, request, cookie))
    }
}

/// Session settings pointing at the fake site.
pub fn fake_config() -> SessionConfig {
    SessionConfig::default()
        .with_base_url(BASE_URL)
        .with_login_path(LOGIN_PATH)
        .with_retry(RetryPolicy::default())
}

/// Session against `site`, classifying on the login banner, with no credentials.
pub fn fake_session(site: &FakeSite) -> Arc<Session> {
    fake_session_with(site, fake_config())
}

/// Session against `site` with custom settings.
pub fn fake_session_with(site: &FakeSite, config: SessionConfig) -> Arc<Session> {
    match Session::new(
        config,
        Arc::new(site.clone()),
        Arc::new(MarkerClassifier::absent(LOGIN_BANNER)),
    ) {
        Ok(session) => Arc::new(session),
        Err(e) => panic!("fake session config is invalid: {e}"),
    }
}
