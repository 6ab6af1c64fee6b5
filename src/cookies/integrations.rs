//! Adapters that move cookies between a backend and the [`CookieStore`].
//!
//! Every backend implements only the capabilities it actually has:
//!
//! | integration                | [`CookieLoader`] | [`CookieInjector`] |
//! |----------------------------|------------------|--------------------|
//! | [`ResponseCookieIntegration`] | (observes responses) | |
//! | [`HostCookieIntegration`]  | yes              |                    |
//! | [`PageCookieIntegration`]  | yes              | yes                |
//!
//! None of them change the store's data model; they only call `store`/`cookies`.
mod host;
mod page;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cookies::CookieStore;
use crate::errors::ClientError;
use crate::net::ApiResponse;

pub use host::{BrowserCookieApi, HostCookieIntegration};
pub use page::{HeadlessPage, PageCookieIntegration};

/// Pulls cookies from a backend into the store. Returns how many were accepted.
pub trait CookieLoader: Send + Sync {
    fn load_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>>;
}

/// Pushes the store's cookies onto a backend. Returns how many were pushed.
pub trait CookieInjector: Send + Sync {
    fn inject_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>>;
}

/// Feeds `Set-Cookie` headers from the native HTTP client back into the store.
#[derive(Clone)]
pub struct ResponseCookieIntegration {
    store: Arc<CookieStore>,
}

impl ResponseCookieIntegration {
    pub fn new(store: Arc<CookieStore>) -> Self {
        Self { store }
    }

    pub fn observe(&self, response: &ApiResponse) -> usize {
        self.store.store_response_cookies(&response.url, &response.headers)
    }
}
