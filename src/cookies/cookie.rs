//! Cookie record and its matching rules.
//!
//! A [`Cookie`] is what the [`CookieStore`](crate::cookies::CookieStore) keeps, persists and
//! hands out. Consumers always receive clones; the store is the only owner that mutates.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    /// Case-insensitive parse of an attribute value. Unknown values yield `None` (the Rust one).
    pub fn parse(value: &str) -> Option<SameSite> {
        let v = value.trim();
        if v.eq_ignore_ascii_case("strict") {
            Some(SameSite::Strict)
        } else if v.eq_ignore_ascii_case("lax") {
            Some(SameSite::Lax)
        } else if v.eq_ignore_ascii_case("none") {
            Some(SameSite::None)
        } else {
            None
        }
    }
}

impl Display for SameSite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// A single HTTP cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,

    /// Raw cookie value, not URL-decoded.
    pub value: String,

    /// Domain scoping, leading dot stripped. `None` means host-only.
    pub domain: Option<String>,

    /// Path scoping (e.g. `"/"`).
    pub path: Option<String>,

    /// Only sent over HTTPS.
    pub secure: bool,

    /// Not visible to page scripts.
    pub http_only: bool,

    pub same_site: Option<SameSite>,

    /// Expiry as unix seconds. Session cookies have `None`.
    pub expires: Option<i64>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: Some("/".to_string()),
            secure: false,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into().trim_start_matches('.').to_string());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_expires(mut self, unix_seconds: i64) -> Self {
        self.expires = Some(unix_seconds);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }

    /// Domain-match per RFC 6265 §5.1.3. Host-only cookies match any host here, the jar
    /// already restricts them to its own host.
    pub fn domain_matches(&self, host: &str) -> bool {
        match &self.domain {
            Some(domain) => {
                let domain = domain.to_ascii_lowercase();
                let host = host.to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{domain}"))
            }
            None => true,
        }
    }

    pub fn path_matches(&self, request_path: &str) -> bool {
        match self.path.as_deref() {
            None | Some("/") => true,
            Some(cookie_path) => {
                request_path == cookie_path
                    || (request_path.starts_with(cookie_path)
                        && (cookie_path.ends_with('/')
                            || request_path[cookie_path.len()..].starts_with('/')))
            }
        }
    }

    /// `name=value` as it appears in a `Cookie` request header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}
