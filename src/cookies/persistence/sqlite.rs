//! SQLite-backed cookie persistence.
//!
//! `SqliteCookiePersistence` keeps **all hosts'** cookies in a single SQLite database.
//!
//! ## Design
//! - One table (`cookies`) for all hosts, one row per cookie.
//! - One table (`session_meta`) holding the last observed user id per host.
//! - Access goes through an `r2d2` pool so the backend can be shared across threads.
//! - `save` **rewrites** the rows of a host (DELETE + INSERT) inside one transaction.
use std::path::PathBuf;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;

use crate::cookies::persistence::{CookiePersistence, PersistedCookies};
use crate::cookies::{Cookie, SameSite};
use crate::errors::ClientError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cookies (
        host TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        path TEXT,
        domain TEXT,
        secure INTEGER NOT NULL,
        http_only INTEGER NOT NULL,
        same_site TEXT,
        expires INTEGER
    );
    CREATE INDEX IF NOT EXISTS cookies_host ON cookies (host);
    CREATE TABLE IF NOT EXISTS session_meta (
        host TEXT PRIMARY KEY NOT NULL,
        last_user_id TEXT
    );
";

pub struct SqliteCookiePersistence {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteCookiePersistence {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: PathBuf) -> Result<Arc<Self>, ClientError> {
        Self::from_manager(SqliteConnectionManager::file(path))
    }

    /// A private in-memory database. Mostly useful for tests.
    pub fn in_memory() -> Result<Arc<Self>, ClientError> {
        // Every pooled connection to ":memory:" would be its own database.
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::from_pool(pool)
    }

    fn from_manager(manager: SqliteConnectionManager) -> Result<Arc<Self>, ClientError> {
        Self::from_pool(Pool::new(manager)?)
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> Result<Arc<Self>, ClientError> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Arc::new(Self { pool }))
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ClientError> {
        Ok(self.pool.get()?)
    }
}

impl CookiePersistence for SqliteCookiePersistence {
    fn load(&self, host: &str) -> Result<PersistedCookies, ClientError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT name, value, path, domain, secure, http_only, same_site, expires
             FROM cookies WHERE host = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([host], |row| {
            let same_site: Option<String> = row.get(6)?;
            Ok(Cookie {
                name: row.get(0)?,
                value: row.get(1)?,
                path: row.get(2)?,
                domain: row.get(3)?,
                secure: row.get::<_, i64>(4)? != 0,
                http_only: row.get::<_, i64>(5)? != 0,
                same_site: same_site.as_deref().and_then(SameSite::parse),
                expires: row.get(7)?,
            })
        })?;

        let mut cookies = Vec::new();
        for row in rows {
            match row {
                Ok(cookie) => cookies.push(cookie),
                Err(e) => log::warn!("skipping unreadable cookie row for {host}: {e}"),
            }
        }

        let last_user_id = conn
            .query_row(
                "SELECT last_user_id FROM session_meta WHERE host = ?1",
                [host],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        Ok(PersistedCookies { cookies, last_user_id })
    }

    fn save(&self, host: &str, snapshot: &PersistedCookies) -> Result<(), ClientError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM cookies WHERE host = ?1", [host])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cookies (host, name, value, path, domain, secure, http_only, same_site, expires)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for cookie in &snapshot.cookies {
                stmt.execute(params![
                    host,
                    cookie.name,
                    cookie.value,
                    cookie.path,
                    cookie.domain,
                    cookie.secure as i64,
                    cookie.http_only as i64,
                    cookie.same_site.map(|s| s.to_string()),
                    cookie.expires,
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO session_meta (host, last_user_id) VALUES (?1, ?2)
             ON CONFLICT(host) DO UPDATE SET last_user_id = excluded.last_user_id",
            params![host, snapshot.last_user_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn remove(&self, host: &str) -> Result<(), ClientError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cookies WHERE host = ?1", [host])?;
        conn.execute("DELETE FROM session_meta WHERE host = ?1", [host])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedCookies {
        let mut strict = Cookie::new("b", "2").with_domain("learn.example.com").secure(true);
        strict.same_site = Some(SameSite::Strict);
        strict.http_only = true;
        PersistedCookies {
            cookies: vec![Cookie::new("a", "1").with_expires(1_900_000_000), strict],
            last_user_id: Some("_7_1".into()),
        }
    }

    #[test]
    fn roundtrip_in_memory() {
        let p = SqliteCookiePersistence::in_memory().unwrap();
        assert_eq!(p.load("learn.example.com").unwrap(), PersistedCookies::default());

        p.save("learn.example.com", &sample()).unwrap();
        assert_eq!(p.load("learn.example.com").unwrap(), sample());

        // A second save replaces rather than appends.
        p.save("learn.example.com", &sample()).unwrap();
        assert_eq!(p.load("learn.example.com").unwrap().cookies.len(), 2);
    }

    #[test]
    fn file_database_survives_reopen_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.sqlite");

        let p = SqliteCookiePersistence::new(path.clone()).unwrap();
        p.save("learn.example.com", &sample()).unwrap();
        drop(p);

        let p = SqliteCookiePersistence::new(path).unwrap();
        assert_eq!(p.load("learn.example.com").unwrap(), sample());

        p.remove("learn.example.com").unwrap();
        assert_eq!(p.load("learn.example.com").unwrap(), PersistedCookies::default());
    }
}
