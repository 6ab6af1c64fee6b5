//! The per-client cookie service.
//!
//! [`CookieStore`] owns the cookies of one target host. It is shared by `Arc` between the
//! header composer, the response integration and whatever loads cookies from a browser.
//!
//! # Concurrency model
//! - The jar sits behind a `parking_lot::RwLock` that is never held across an `.await`.
//! - Every mutation snapshots the jar and hands it to the persistence backend (best effort,
//!   failures are logged).
//! - Identity changes are published on a `broadcast` channel. An event fires only when the
//!   user id resolved from the composite session cookie is set and differs from the last one
//!   observed, so repeated writes of the same session never re-fire.
use std::sync::Arc;

use http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use url::Url;

use crate::cookies::persistence::{CookiePersistence, InMemoryPersistence, PersistedCookies, PersistenceHandle};
use crate::cookies::{Cookie, CookieJar};
use crate::errors::ClientError;
use crate::session::{SessionCookieFormat, SessionIdentity};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Published when a different user logs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityChanged {
    pub previous: Option<String>,
    pub current: String,
}

pub struct CookieStore {
    jar: RwLock<CookieJar>,
    format: SessionCookieFormat,
    persistence: PersistenceHandle,
    last_user_id: Mutex<Option<String>>,
    identity_tx: broadcast::Sender<IdentityChanged>,
}

pub(crate) fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl CookieStore {
    /// A store that keeps everything in memory.
    pub fn new(host: impl Into<String>, format: SessionCookieFormat) -> Arc<Self> {
        let (identity_tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Arc::new(Self {
            jar: RwLock::new(CookieJar::new(host)),
            format,
            persistence: InMemoryPersistence::new(),
            last_user_id: Mutex::new(None),
            identity_tx,
        })
    }

    /// A store backed by `persistence`. The saved snapshot for `host` is loaded right away;
    /// cookies that expired in the meantime are dropped.
    pub fn with_persistence(
        host: impl Into<String>,
        format: SessionCookieFormat,
        persistence: Arc<dyn CookiePersistence>,
    ) -> Result<Arc<Self>, ClientError> {
        let host = host.into().to_ascii_lowercase();
        let snapshot = persistence.load(&host)?;

        let now = unix_now();
        let mut jar = CookieJar::new(host);
        for cookie in snapshot.cookies {
            jar.insert(cookie, now);
        }
        log::debug!(
            "loaded {} persisted cookies for {}",
            jar.cookies().len(),
            jar.host()
        );

        let (identity_tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            jar: RwLock::new(jar),
            format,
            persistence,
            last_user_id: Mutex::new(snapshot.last_user_id),
            identity_tx,
        }))
    }

    pub fn host(&self) -> String {
        self.jar.read().host().to_string()
    }

    pub fn format(&self) -> &SessionCookieFormat {
        &self.format
    }

    /// Inserts or overwrites `cookies`. Cookies scoped to another host are dropped. Returns the
    /// number accepted.
    pub fn store(&self, cookies: impl IntoIterator<Item = Cookie>) -> usize {
        let now = unix_now();
        let accepted = {
            let mut jar = self.jar.write();
            let mut accepted = 0;
            for cookie in cookies {
                if jar.insert(cookie.clone(), now) {
                    accepted += 1;
                } else {
                    log::debug!("dropping cookie {} scoped to {:?}", cookie.name, cookie.domain);
                }
            }
            accepted
        };

        self.after_mutation();
        accepted
    }

    /// Stores the `Set-Cookie` headers of a response received from `url`.
    pub fn store_response_cookies(&self, url: &Url, headers: &HeaderMap) -> usize {
        if !headers.contains_key(http::header::SET_COOKIE) {
            return 0;
        }
        let stored = self.jar.write().store_response_cookies(url, headers, unix_now());
        if stored > 0 {
            self.after_mutation();
        }
        stored
    }

    /// The `Cookie` header value for `url`.
    pub fn get(&self, url: &Url) -> Option<String> {
        self.jar.read().request_header(url, unix_now())
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        let now = unix_now();
        self.jar
            .read()
            .get(name)
            .filter(|c| !c.is_expired(now))
            .cloned()
    }

    /// Snapshot of every live cookie.
    pub fn cookies(&self) -> Vec<Cookie> {
        let now = unix_now();
        self.jar
            .read()
            .cookies()
            .iter()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn delete(&self, name: &str) -> bool {
        let removed = self.jar.write().remove(name);
        if removed {
            self.after_mutation();
        }
        removed
    }

    pub fn clear(&self) {
        self.jar.write().clear();
        self.after_mutation();
    }

    /// Identity derived from the composite session cookie.
    pub fn identity(&self) -> SessionIdentity {
        self.cookie(&self.format.cookie_name)
            .map(|c| self.format.identity(&c.value))
            .unwrap_or_default()
    }

    pub fn last_user_id(&self) -> Option<String> {
        self.last_user_id.lock().clone()
    }

    pub fn subscribe_identity(&self) -> broadcast::Receiver<IdentityChanged> {
        self.identity_tx.subscribe()
    }

    fn after_mutation(&self) {
        if let Some(current) = self.identity().user_id {
            let previous = {
                let mut last = self.last_user_id.lock();
                if last.as_deref() == Some(current.as_str()) {
                    None
                } else {
                    Some(last.replace(current.clone()))
                }
            };

            if let Some(previous) = previous {
                log::info!("session identity changed: {previous:?} -> {current}");
                // Ignore send error if there are no receivers
                let _ = self.identity_tx.send(IdentityChanged { previous, current });
            }
        }

        self.persist();
    }

    fn persist(&self) {
        let (host, snapshot) = {
            let jar = self.jar.read();
            (
                jar.host().to_string(),
                PersistedCookies {
                    cookies: jar.cookies().to_vec(),
                    last_user_id: self.last_user_id(),
                },
            )
        };

        if let Err(e) = self.persistence.save(&host, &snapshot) {
            log::warn!("failed to persist cookies for {host}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use tokio::sync::broadcast::error::TryRecvError;

    const HOST: &str = "learn.example.com";

    fn session(user: &str, xsrf: &str) -> Cookie {
        Cookie::new("session_router", format!("expires:1,id:{user},xsrf:{xsrf}"))
    }

    #[test]
    fn foreign_cookies_never_reach_requests() {
        let store = CookieStore::new(HOST, SessionCookieFormat::default());
        let n = store.store(vec![
            Cookie::new("mine", "1"),
            Cookie::new("theirs", "2").with_domain("tracker.example.net"),
        ]);
        assert_eq!(n, 1);

        let url = Url::parse("https://learn.example.com/learn/api/v1/users/me").unwrap();
        assert_eq!(store.get(&url).as_deref(), Some("mine=1"));
        assert!(store.cookie("theirs").is_none());
    }

    #[test]
    fn identity_fires_once_per_distinct_user() {
        let store = CookieStore::new(HOST, SessionCookieFormat::default());
        let mut rx = store.subscribe_identity();

        store.store(vec![session("_1_1", "a")]);
        store.store(vec![session("_1_1", "b")]);
        store.store(vec![Cookie::new("unrelated", "x")]);

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev, IdentityChanged { previous: None, current: "_1_1".into() });
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        store.store(vec![session("_2_1", "c")]);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.previous.as_deref(), Some("_1_1"));
        assert_eq!(ev.current, "_2_1");
    }

    #[test]
    fn losing_the_session_does_not_fire() {
        let store = CookieStore::new(HOST, SessionCookieFormat::default());
        store.store(vec![session("_1_1", "a")]);
        let mut rx = store.subscribe_identity();

        store.delete("session_router");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(store.last_user_id().as_deref(), Some("_1_1"));

        // Same user coming back is not a change either.
        store.store(vec![session("_1_1", "z")]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn last_user_survives_restart() {
        let backend = InMemoryPersistence::new();
        let store =
            CookieStore::with_persistence(HOST, SessionCookieFormat::default(), backend.clone()).unwrap();
        store.store(vec![session("_1_1", "a")]);
        drop(store);

        let store =
            CookieStore::with_persistence(HOST, SessionCookieFormat::default(), backend.clone()).unwrap();
        let mut rx = store.subscribe_identity();
        assert_eq!(store.last_user_id().as_deref(), Some("_1_1"));
        assert_eq!(store.identity().xsrf_token.as_deref(), Some("a"));

        store.store(vec![session("_1_1", "b")]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn response_cookies_are_stored_and_persisted() {
        let backend = InMemoryPersistence::new();
        let store =
            CookieStore::with_persistence(HOST, SessionCookieFormat::default(), backend.clone()).unwrap();

        let mut headers = HeaderMap::new();
        headers.append(
            http::header::SET_COOKIE,
            HeaderValue::from_static("session_router=id:_3_1,xsrf:q; Path=/; Secure"),
        );
        let url = Url::parse("https://learn.example.com/learn/api/v1/users/me").unwrap();
        assert_eq!(store.store_response_cookies(&url, &headers), 1);

        let saved = backend.load(HOST).unwrap();
        assert_eq!(saved.cookies.len(), 1);
        assert_eq!(saved.last_user_id.as_deref(), Some("_3_1"));

        store.clear();
        assert!(store.cookies().is_empty());
        assert!(backend.load(HOST).unwrap().cookies.is_empty());
    }

    #[test]
    fn expired_cookies_are_hidden() {
        let store = CookieStore::new(HOST, SessionCookieFormat::default());
        store.store(vec![Cookie::new("old", "1").with_expires(unix_now() - 10)]);
        assert!(store.cookie("old").is_none());
        assert!(store.cookies().is_empty());
    }
}
