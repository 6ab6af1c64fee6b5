//! Host-scoped cookie container and `Set-Cookie` parsing.
//!
//! A [`CookieJar`] holds the cookies for exactly one target host. Anything scoped to a
//! different host is refused on insert, so nothing belonging to another site can ever be
//! serialized into a request for the LMS.
//!
//! ## Notes & limitations
//! - Attributes handled: `Path`, `Domain` (leading dot stripped), `Expires`, `Max-Age`
//!   (wins over `Expires`), `SameSite`, `Secure`, `HttpOnly`.
//! - If `Path` is absent, the default path is derived from the response URL.
//! - A cookie is identified by `(name, domain, path)`; storing the same triple replaces it,
//!   storing it already expired deletes it.
//! - This type is not internally synchronized. The [`CookieStore`](crate::cookies::CookieStore)
//!   wraps it in a lock.
//!
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc2822;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use url::Url;

use crate::cookies::{Cookie, SameSite};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieJar {
    /// Host this jar is bound to (lowercase).
    host: String,
    entries: Vec<Cookie>,
}

impl CookieJar {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            entries: Vec::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns true if `cookie` may live in this jar.
    pub fn accepts(&self, cookie: &Cookie) -> bool {
        cookie.domain_matches(&self.host)
    }

    /// Inserts or replaces `cookie`. Returns false when the cookie is scoped to another host
    /// and was dropped.
    pub fn insert(&mut self, cookie: Cookie, now: i64) -> bool {
        if !self.accepts(&cookie) {
            return false;
        }

        self.entries.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });

        if !cookie.is_expired(now) {
            self.entries.push(cookie);
        }
        true
    }

    /// Stores every `Set-Cookie` header of a response received from `url`.
    ///
    /// Responses from a host other than the jar's are ignored entirely. Returns the number of
    /// cookies accepted.
    pub fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap, now: i64) -> usize {
        if !url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(&self.host)) {
            return 0;
        }

        let mut stored = 0;
        for header in headers.get_all(http::header::SET_COOKIE) {
            let Ok(header_str) = header.to_str() else {
                continue;
            };
            if let Some(cookie) = parse_set_cookie(url, header_str, now) {
                if self.insert(cookie, now) {
                    stored += 1;
                }
            }
        }
        stored
    }

    /// Returns the `Cookie` request header value for `url`, or `None` if nothing matches.
    pub fn request_header(&self, url: &Url, now: i64) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let path = url.path();
        let is_https = url.scheme() == "https";

        let header = self
            .entries
            .iter()
            .filter(|c| match &c.domain {
                Some(_) => c.domain_matches(&host),
                None => host == self.host,
            })
            .filter(|c| c.path_matches(path))
            .filter(|c| !c.secure || is_https)
            .filter(|c| !c.is_expired(now))
            .map(Cookie::pair)
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.entries.iter().find(|c| c.name == name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|c| c.name != name);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.entries
    }

    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|c| !c.is_expired(now));
        before - self.entries.len()
    }
}

/// Parses one `Set-Cookie` header value received from `url`.
pub fn parse_set_cookie(url: &Url, header: &str, now: i64) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: None,
        path: None,
        secure: false,
        http_only: false,
        same_site: None,
        expires: None,
    };
    let mut max_age: Option<i64> = None;

    for part in parts {
        let part = part.trim();
        match part.split_once('=') {
            Some((k, v)) => {
                let v = v.trim();
                match k.trim().to_ascii_lowercase().as_str() {
                    "path" if v.starts_with('/') => cookie.path = Some(v.to_string()),
                    "domain" if !v.is_empty() => {
                        cookie.domain = Some(v.trim_start_matches('.').to_ascii_lowercase())
                    }
                    "expires" => {
                        if let Some(at) = parse_cookie_date(v) {
                            cookie.expires = Some(at);
                        }
                    }
                    "max-age" => max_age = v.parse::<i64>().ok(),
                    "samesite" => cookie.same_site = SameSite::parse(v),
                    _ => {}
                }
            }
            None => {
                if part.eq_ignore_ascii_case("secure") {
                    cookie.secure = true;
                } else if part.eq_ignore_ascii_case("httponly") {
                    cookie.http_only = true;
                }
            }
        }
    }

    if let Some(secs) = max_age {
        cookie.expires = Some(if secs <= 0 { i64::MIN } else { now.saturating_add(secs) });
    }

    if cookie.path.is_none() {
        let default_path = url
            .path()
            .rsplit_once('/')
            .map_or("/", |(a, _)| if a.is_empty() { "/" } else { a });
        cookie.path = Some(default_path.to_string());
    }

    Some(cookie)
}

/// Parses the date formats seen in `Expires` attributes into unix seconds.
fn parse_cookie_date(value: &str) -> Option<i64> {
    const FORMATS: [&[BorrowedFormatItem<'static>]; 2] = [
        format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"),
        format_description!("[weekday repr:short], [day]-[month repr:short]-[year] [hour]:[minute]:[second] GMT"),
    ];

    for description in FORMATS {
        if let Ok(dt) = PrimitiveDateTime::parse(value, description) {
            return Some(dt.assume_utc().unix_timestamp());
        }
    }

    OffsetDateTime::parse(value, &Rfc2822)
        .ok()
        .map(|dt| dt.unix_timestamp())
}
