//! TOML configuration.
//!
//! Every field has a default, so an empty file is a valid configuration that
//! mounts nothing but the control files.
//!
//! ```toml
//! base_url = "https://www.newbiecontest.org/"
//! login_path = "forums/index.php?action=login2"
//! max_concurrent_requests = 20
//!
//! [cache]
//! ttl_secs = 60
//! unauthenticated_ttl_secs = 3
//!
//! [login]
//! username = "alice"
//! user_field = "user"
//! password_field = "passwrd"
//!
//! [auth]
//! marker = "action=logout"
//! marker_means_authenticated = true
//!
//! [[pages]]
//! name = "news"
//! path = "index.php?page=news"
//!
//! [[pages]]
//! name = "account"
//! path = "index.php?page=account"
//! authenticated = true
//! ttl_secs = 300
//! vote_path = "index.php?page=vote"
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_CACHE_TTL, DEFAULT_LOGIN_PATH, DEFAULT_MAX_CONCURRENT_REQUESTS,
    DEFAULT_PASSWORD_FIELD, DEFAULT_UNAUTHENTICATED_TTL, DEFAULT_USER_FIELD, DEFAULT_VOTE_FIELD,
};
use crate::provider::PageSpec;
use crate::session::{
    AuthClassifier, HttpTransport, MarkerClassifier, RetryPolicy, Session, SessionConfig,
    SessionError,
};
use crate::vfs::Namespace;

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub base_url: String,
    pub login_path: String,
    pub max_concurrent_requests: usize,
    pub cache: CacheConfig,
    pub login: LoginConfig,
    pub auth: AuthConfig,
    pub pages: Vec<PageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            cache: CacheConfig::default(),
            login: LoginConfig::default(),
            auth: AuthConfig::default(),
            pages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of a successful refresh.
    pub ttl_secs: u64,
    /// Lifetime of a failed refresh.
    pub unauthenticated_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            unauthenticated_ttl_secs: DEFAULT_UNAUTHENTICATED_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginConfig {
    /// Initial username. The password is never read from the file.
    pub username: Option<String>,
    pub user_field: String,
    pub password_field: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            username: None,
            user_field: DEFAULT_USER_FIELD.to_string(),
            password_field: DEFAULT_PASSWORD_FIELD.to_string(),
        }
    }
}

/// How to tell a logged-in page from an anonymous one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub marker: String,
    /// Whether finding the marker means logged in (a logout link) or
    /// anonymous (a login form).
    pub marker_means_authenticated: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            marker: "action=logout".to_string(),
            marker_means_authenticated: true,
        }
    }
}

impl AuthConfig {
    pub fn classifier(&self) -> MarkerClassifier {
        if self.marker_means_authenticated {
            MarkerClassifier::present(self.marker.clone())
        } else {
            MarkerClassifier::absent(self.marker.clone())
        }
    }
}

/// One mounted page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub authenticated: bool,
    /// Overrides `cache.ttl_secs`.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub vote_path: Option<String>,
    #[serde(default)]
    pub vote_field: Option<String>,
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), pages = config.pages.len(), "config loaded");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be at least 1".into(),
            ));
        }
        let mut seen = HashSet::new();
        for page in &self.pages {
            if page.name.is_empty() || page.name.contains('/') || page.name == "." || page.name == ".." {
                return Err(ConfigError::Invalid(format!("bad page name {:?}", page.name)));
            }
            if !seen.insert(page.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate page {:?}", page.name)));
            }
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url.clone(),
            login_path: self.login_path.clone(),
            user_field: self.login.user_field.clone(),
            password_field: self.login.password_field.clone(),
            max_concurrent_requests: self.max_concurrent_requests,
            retry: RetryPolicy::default(),
        }
    }

    pub fn page_specs(&self) -> Vec<PageSpec> {
        self.pages
            .iter()
            .map(|page| PageSpec {
                name: page.name.clone(),
                path: page.path.clone(),
                authenticated: page.authenticated,
                ttl: Duration::from_secs(page.ttl_secs.unwrap_or(self.cache.ttl_secs)),
                vote_path: page.vote_path.clone(),
                vote_field: page
                    .vote_field
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VOTE_FIELD.to_string()),
            })
            .collect()
    }

    /// Build the session and the namespace over `transport`.
    pub fn build_namespace(&self, transport: Arc<dyn HttpTransport>) -> Result<Namespace, ConfigError> {
        let classifier: Arc<dyn AuthClassifier> = Arc::new(self.auth.classifier());
        let mut session = Session::new(self.session_config(), transport, classifier)?;
        if let Some(username) = &self.login.username {
            session = session.with_credentials(username.clone(), String::new());
        }

        let builder = Namespace::builder(Arc::new(session))
            .degraded_ttl(Duration::from_secs(self.cache.unauthenticated_ttl_secs));
        let namespace = self
            .page_specs()
            .into_iter()
            .fold(builder, |builder, spec| builder.page(spec))
            .build();
        Ok(namespace)
    }
}
