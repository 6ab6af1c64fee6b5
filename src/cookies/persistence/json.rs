//! JSON-backed cookie persistence.
//!
//! `JsonCookiePersistence` keeps **all hosts'** snapshots in a single JSON file
//! (`{ "hosts": { "<host>": { "cookies": [...], "last_user_id": ... } } }`).
//!
//! ### I/O characteristics & caveats
//! - `save` and `remove` **read then rewrite** the entire file. Use the SQLite backend for
//!   anything large.
//! - File writes are not atomic.
//! - A file that fails to deserialize is treated as empty and overwritten on the next save.
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cookies::persistence::{CookiePersistence, PersistedCookies};
use crate::errors::ClientError;

/// On-disk representation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CookieFile {
    hosts: HashMap<String, PersistedCookies>,
}

pub struct JsonCookiePersistence {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file.
    io: Mutex<()>,
}

impl JsonCookiePersistence {
    /// Opens the file at `path`, creating an empty one if it does not exist.
    pub fn new(path: PathBuf) -> Result<Arc<Self>, ClientError> {
        if !path.exists() {
            fs::write(&path, serde_json::to_vec(&CookieFile::default())?)?;
        }

        Ok(Arc::new(Self {
            path,
            io: Mutex::new(()),
        }))
    }

    fn load_file(&self) -> Result<CookieFile, ClientError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("cookie file {} is unreadable, starting empty: {e}", self.path.display());
            CookieFile::default()
        }))
    }

    fn save_file(&self, file: &CookieFile) -> Result<(), ClientError> {
        let contents = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl CookiePersistence for JsonCookiePersistence {
    fn load(&self, host: &str) -> Result<PersistedCookies, ClientError> {
        let _guard = self.io.lock();
        let mut file = self.load_file()?;
        Ok(file.hosts.remove(host).unwrap_or_default())
    }

    fn save(&self, host: &str, snapshot: &PersistedCookies) -> Result<(), ClientError> {
        let _guard = self.io.lock();
        let mut file = self.load_file()?;
        file.hosts.insert(host.to_string(), snapshot.clone());
        self.save_file(&file)
    }

    fn remove(&self, host: &str) -> Result<(), ClientError> {
        let _guard = self.io.lock();
        let mut file = self.load_file()?;
        if file.hosts.remove(host).is_some() {
            self.save_file(&file)?;
        }
        Ok(())
    }
}
