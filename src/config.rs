//! Client configuration.
//!
//! `ClientConfig` describes the LMS deployment the client talks to and the limits
//! it has to respect: where the API lives, which cookie carries the session, what
//! a browser would send, and how many requests may be in flight at once.
//!
//! `ClientConfig` provides defaults via [`Default`] and a fluent
//! [`ClientConfig::builder()`] with validation.
//!
//! # Examples
//!
//! ```rust
//! use lms_bridge::config::ClientConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ClientConfig::builder()
//!     .base_url("https://learn.example.edu")?
//!     .max_concurrency(4)
//!     .landing_path("/ultra")
//!     .build()?;
//! assert_eq!(cfg.target_host(), "learn.example.edu");
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation returns [`ConfigError`] for a base URL without a host, a
//! zero concurrency limit, a zero queue capacity or an API prefix that is not a
//! directory (`/.../`).

use std::fmt;
use std::time::Duration;
use log::LevelFilter;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://learn.example.com/";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Where the client runs relative to the browser that owns the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Inside the browser host. The host adds cookies and fingerprint headers itself.
    InProcess,
    /// In a separate process. Every browser header must be reproduced by hand.
    OutOfProcess,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Versioned API prefix, relative to `base_url`.
    pub api_prefix: String,
    /// Batch endpoint, relative to `api_prefix`.
    pub batch_path: String,
    /// Name of the composite cookie holding `key:value` session pairs.
    pub session_cookie: String,
    pub user_id_key: String,
    pub xsrf_key: String,
    pub xsrf_header: String,
    pub user_agent: String,
    pub accept_language: String,
    pub max_concurrency: usize,
    /// Maximum number of queued (not yet running) requests. `None` is unbounded.
    pub queue_capacity: Option<usize>,
    pub xsrf_retry_delay: Duration,
    pub login_path: String,
    /// Path prefix of the page the provider redirects to after a successful login.
    pub landing_path: String,
    pub mode: ExecutionMode,
    pub log_level: LevelFilter,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            api_prefix: "/learn/api/v1/".to_string(),
            batch_path: "utilities/batch".to_string(),
            session_cookie: "session_router".to_string(),
            user_id_key: "id".to_string(),
            xsrf_key: "xsrf".to_string(),
            xsrf_header: "X-XSRF".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            max_concurrency: 6,
            queue_capacity: None,
            xsrf_retry_delay: Duration::from_millis(250),
            login_path: "/".to_string(),
            landing_path: "/ultra".to_string(),
            mode: ExecutionMode::OutOfProcess,
            log_level: LevelFilter::Info,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Host every cookie and request is restricted to.
    pub fn target_host(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    /// `scheme://host[:port]` of the LMS, as sent in `Origin`.
    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    /// Resolves a path relative to the versioned API prefix.
    pub fn api_url(&self, relative: &str) -> Result<Url, url::ParseError> {
        self.base_url
            .join(&self.api_prefix)?
            .join(relative.trim_start_matches('/'))
    }

    pub fn batch_url(&self) -> Result<Url, url::ParseError> {
        self.api_url(&self.batch_path)
    }

    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join(&self.login_path)
    }

    pub fn landing_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join(&self.landing_path)
    }

    /// True if `url` is the provider's post-login landing page.
    pub fn is_landing(&self, url: &Url) -> bool {
        url.host_str() == self.base_url.host_str() && url.path().starts_with(&self.landing_path)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut ClientConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.inner.base_url = Url::parse(url).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
        Ok(self)
    }
    pub fn api_prefix<S: Into<String>>(self, p: S) -> Self { self.map(|c| c.api_prefix = p.into()) }
    pub fn batch_path<S: Into<String>>(self, p: S) -> Self { self.map(|c| c.batch_path = p.into()) }
    pub fn session_cookie<S: Into<String>>(self, name: S) -> Self { self.map(|c| c.session_cookie = name.into()) }
    pub fn user_id_key<S: Into<String>>(self, key: S) -> Self { self.map(|c| c.user_id_key = key.into()) }
    pub fn xsrf_key<S: Into<String>>(self, key: S) -> Self { self.map(|c| c.xsrf_key = key.into()) }
    pub fn xsrf_header<S: Into<String>>(self, name: S) -> Self { self.map(|c| c.xsrf_header = name.into()) }
    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = ua.into()) }
    pub fn accept_language<S: Into<String>>(self, langs: S) -> Self { self.map(|c| c.accept_language = langs.into()) }
    pub fn max_concurrency(self, n: usize) -> Self { self.map(|c| c.max_concurrency = n) }
    pub fn queue_capacity(self, n: Option<usize>) -> Self { self.map(|c| c.queue_capacity = n) }
    pub fn xsrf_retry_delay(self, d: Duration) -> Self { self.map(|c| c.xsrf_retry_delay = d) }
    pub fn login_path<S: Into<String>>(self, p: S) -> Self { self.map(|c| c.login_path = p.into()) }
    pub fn landing_path<S: Into<String>>(self, p: S) -> Self { self.map(|c| c.landing_path = p.into()) }
    pub fn mode(self, mode: ExecutionMode) -> Self { self.map(|c| c.mode = mode) }
    pub fn log_level(self, level: LevelFilter) -> Self { self.map(|c| c.log_level = level) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut ClientConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidBaseUrl(String),
    MissingHost,
    ZeroConcurrency,
    ZeroQueueCapacity,
    InvalidApiPrefix(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBaseUrl(e) => write!(f, "base_url is not a valid URL: {e}"),
            ConfigError::MissingHost => write!(f, "base_url must have a host"),
            ConfigError::ZeroConcurrency => write!(f, "max_concurrency must be at least 1"),
            ConfigError::ZeroQueueCapacity => write!(f, "queue_capacity must be at least 1 when set"),
            ConfigError::InvalidApiPrefix(p) => write!(f, "api_prefix {p:?} must start and end with '/'"),
        }
    }
}
impl std::error::Error for ConfigError {}

fn validate(c: &ClientConfig) -> Result<(), ConfigError> {
    if c.base_url.host_str().is_none() {
        return Err(ConfigError::MissingHost);
    }
    if c.max_concurrency == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }
    if c.queue_capacity == Some(0) {
        return Err(ConfigError::ZeroQueueCapacity);
    }
    if !c.api_prefix.starts_with('/') || !c.api_prefix.ends_with('/') {
        return Err(ConfigError::InvalidApiPrefix(c.api_prefix.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ClientConfig::builder().build().unwrap();
        assert_eq!(cfg.target_host(), "learn.example.com");
        assert_eq!(cfg.origin(), "https://learn.example.com");
        assert_eq!(cfg.mode, ExecutionMode::OutOfProcess);
    }

    #[test]
    fn api_url_joins_prefix_and_strips_leading_slash() {
        let cfg = ClientConfig::default();
        let url = cfg.api_url("/courses/_1_1").unwrap();
        assert_eq!(url.as_str(), "https://learn.example.com/learn/api/v1/courses/_1_1");

        let url = cfg.api_url("users/me?fields=id").unwrap();
        assert_eq!(url.as_str(), "https://learn.example.com/learn/api/v1/users/me?fields=id");

        assert_eq!(
            cfg.batch_url().unwrap().as_str(),
            "https://learn.example.com/learn/api/v1/utilities/batch"
        );
    }

    #[test]
    fn landing_detection_requires_same_host() {
        let cfg = ClientConfig::default();
        assert!(cfg.is_landing(&Url::parse("https://learn.example.com/ultra/course").unwrap()));
        assert!(!cfg.is_landing(&Url::parse("https://learn.example.com/webapps/login").unwrap()));
        assert!(!cfg.is_landing(&Url::parse("https://evil.example.com/ultra").unwrap()));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert_eq!(
            ClientConfig::builder().max_concurrency(0).build().unwrap_err(),
            ConfigError::ZeroConcurrency
        );
        assert_eq!(
            ClientConfig::builder().queue_capacity(Some(0)).build().unwrap_err(),
            ConfigError::ZeroQueueCapacity
        );
        assert!(matches!(
            ClientConfig::builder().api_prefix("learn/api").build().unwrap_err(),
            ConfigError::InvalidApiPrefix(_)
        ));
        assert!(matches!(
            ClientConfig::builder().base_url("not a url"),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn with_applies_several_changes() {
        let cfg = ClientConfig::builder()
            .with(|c| {
                c.max_concurrency = 2;
                c.mode = ExecutionMode::InProcess;
            })
            .build()
            .unwrap();
        assert_eq!(cfg.max_concurrency, 2);
        assert_eq!(cfg.mode, ExecutionMode::InProcess);
    }
}
