//! Cookie handling for the target LMS host.
//!
//! - [`Cookie`] / [`SameSite`]: the record type.
//! - [`CookieJar`]: host-scoped container with `Set-Cookie` parsing.
//! - [`CookieStore`]: the shared service (persistence, identity-change events).
//! - [`persistence`]: durable backends.
//! - [`integrations`]: loaders/injectors for response headers, host browsers and headless pages.
mod cookie;
mod cookie_jar;
pub mod integrations;
pub mod persistence;
mod store;

pub use cookie::{Cookie, SameSite};
pub use cookie_jar::{parse_set_cookie, CookieJar};
pub use integrations::{CookieInjector, CookieLoader, ResponseCookieIntegration};
pub use persistence::{CookiePersistence, InMemoryPersistence, JsonCookiePersistence, PersistedCookies};
#[cfg(feature = "sqlite_cookie_store")]
pub use persistence::SqliteCookiePersistence;
pub use store::{CookieStore, IdentityChanged};
