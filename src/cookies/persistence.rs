//! Cookie persistence backends.
//!
//! A **persistence backend** keeps the cookie set of a host, plus the last user id the
//! [`CookieStore`](crate::cookies::CookieStore) observed, across restarts.
//!
//! - The store loads one [`PersistedCookies`] snapshot when it is attached to a backend.
//! - After **every mutation** the store hands the backend a fresh snapshot.
//! - Backends never hold a reference to the live store.
//!
//! This module exports three implementations:
//! - [`InMemoryPersistence`]: keeps snapshots in a map (tests, private sessions).
//! - [`JsonCookiePersistence`]: one JSON file for all hosts.
//! - [`SqliteCookiePersistence`]: one SQLite database for all hosts (feature `sqlite_cookie_store`).
//!
//! ## Example
//! ```rust,no_run
//! use lms_bridge::cookies::{CookieStore, JsonCookiePersistence};
//! use lms_bridge::session::SessionCookieFormat;
//!
//! # fn main() -> Result<(), lms_bridge::ClientError> {
//! let backend = JsonCookiePersistence::new("cookies.json".into())?;
//! let store = CookieStore::with_persistence("learn.example.com", SessionCookieFormat::default(), backend)?;
//! # Ok(()) }
//! ```
mod json;
#[cfg(feature = "sqlite_cookie_store")]
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cookies::Cookie;
use crate::errors::ClientError;

/// File-backed JSON persistence (one file for all hosts).
pub use json::JsonCookiePersistence;
/// SQLite-backed persistence (one database for all hosts).
#[cfg(feature = "sqlite_cookie_store")]
pub use sqlite::SqliteCookiePersistence;

/// What gets written for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCookies {
    pub cookies: Vec<Cookie>,
    pub last_user_id: Option<String>,
}

pub type PersistenceHandle = Arc<dyn CookiePersistence>;

/// Durable storage for a host's cookies.
///
/// Implementations must be `Send + Sync` and do their own synchronization.
pub trait CookiePersistence: Send + Sync {
    /// Returns the snapshot for `host`, or an empty one if nothing was stored yet.
    fn load(&self, host: &str) -> Result<PersistedCookies, ClientError>;

    /// Replaces the stored snapshot for `host`.
    fn save(&self, host: &str, snapshot: &PersistedCookies) -> Result<(), ClientError>;

    /// Removes everything stored for `host`. Idempotent.
    fn remove(&self, host: &str) -> Result<(), ClientError>;
}

/// Keeps snapshots in memory only.
#[derive(Default)]
pub struct InMemoryPersistence {
    hosts: RwLock<HashMap<String, PersistedCookies>>,
}

impl InMemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl CookiePersistence for InMemoryPersistence {
    fn load(&self, host: &str) -> Result<PersistedCookies, ClientError> {
        Ok(self.hosts.read().get(host).cloned().unwrap_or_default())
    }

    fn save(&self, host: &str, snapshot: &PersistedCookies) -> Result<(), ClientError> {
        self.hosts.write().insert(host.to_string(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, host: &str) -> Result<(), ClientError> {
        self.hosts.write().remove(host);
        Ok(())
    }
}
