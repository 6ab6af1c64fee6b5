use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cookies::integrations::{CookieInjector, CookieLoader};
use crate::cookies::{Cookie, CookieStore};
use crate::errors::ClientError;

/// A page in a headless browser that can read and set its cookies.
pub trait HeadlessPage: Send + Sync {
    fn cookies(&self) -> BoxFuture<'_, Result<Vec<Cookie>, ClientError>>;
    fn set_cookies(&self, cookies: Vec<Cookie>) -> BoxFuture<'_, Result<(), ClientError>>;
}

/// Syncs cookies both ways between a headless page and the store.
pub struct PageCookieIntegration {
    page: Arc<dyn HeadlessPage>,
}

impl PageCookieIntegration {
    pub fn new(page: Arc<dyn HeadlessPage>) -> Self {
        Self { page }
    }
}

impl CookieLoader for PageCookieIntegration {
    fn load_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>> {
        Box::pin(async move {
            let cookies = self.page.cookies().await?;
            Ok(store.store(cookies))
        })
    }
}

impl CookieInjector for PageCookieIntegration {
    fn inject_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>> {
        Box::pin(async move {
            let cookies = store.cookies();
            let count = cookies.len();
            self.page.set_cookies(cookies).await?;
            Ok(count)
        })
    }
}
