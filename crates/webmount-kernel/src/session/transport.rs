//! HTTP transport seam.
//!
//! A transport sends exactly one request and never follows redirects: the
//! session follows them itself so a login can inspect the first hop.

use async_trait::async_trait;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use std::fmt;
use thiserror::Error;

/// HTTP status returned by the remote when it rate-limits us.
pub const RATE_LIMITED: u16 = 403;

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error from the HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Any other failure reaching the remote.
    #[error("{0}")]
    Other(String),
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// A request relative to the session's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    /// Form fields, sent url-encoded when non-empty.
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            form: Vec::new(),
        }
    }

    /// A POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            form: Vec::new(),
        }
    }

    /// Add a form field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }
}

/// A response, possibly the last of a redirect chain.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// URL this response was fetched from.
    pub url: String,
    /// `Location` header, if any.
    pub location: Option<String>,
    /// Raw `Set-Cookie` header values.
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
    /// Earlier hops of the redirect chain, first hop first.
    pub history: Vec<HttpResponse>,
}

impl HttpResponse {
    /// A plain `200 OK` response.
    pub fn ok(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            url: url.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Returns true for 3xx responses carrying a `Location`.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }

    /// Returns true when the remote signalled rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        self.status == RATE_LIMITED
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `Set-Cookie` values of every hop, oldest first.
    pub fn all_set_cookies(&self) -> impl Iterator<Item = &str> {
        self.history
            .iter()
            .flat_map(|hop| hop.set_cookies.iter())
            .chain(self.set_cookies.iter())
            .map(String::as_str)
    }
}

/// Sends single HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` to the absolute `url` with an optional `Cookie` header.
    async fn send(
        &self,
        url: &str,
        request: &HttpRequest,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest`, with redirects and cookie storage disabled.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        url: &str,
        request: &HttpRequest,
        cookie: Option<&str>,
    ) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, url);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers();
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let url = response.url().to_string();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            url,
            location,
            set_cookies,
            body,
            history: Vec::new(),
        })
    }
}
