use std::collections::HashMap;
use std::future::Future;

use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::ClientError;

/// Per-layer response cache. Layers key it by user and resource (`_1_1/all`, `_1_1/me`, ...).
///
/// Entries live until [`invalidate`](Self::invalidate) is called, either by the user asking
/// for a refresh or because a different user logged in.
#[derive(Debug)]
pub struct LayerCache {
    name: &'static str,
    entries: RwLock<HashMap<String, Value>>,
}

impl LayerCache {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            log::debug!("cache {}: dropping {} entries", self.name, entries.len());
        }
        entries.clear();
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its result. Errors are
    /// not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Value, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ClientError>>,
    {
        if let Some(hit) = self.get(key) {
            log::trace!("cache {}: hit {key}", self.name);
            return Ok(hit);
        }

        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
