use std::sync::Arc;

use futures::future::BoxFuture;
use url::Url;

use crate::cookies::integrations::CookieLoader;
use crate::cookies::{Cookie, CookieStore};
use crate::errors::ClientError;

/// The cookie API of the browser hosting the client (extension `cookies.getAll` and similar).
pub trait BrowserCookieApi: Send + Sync {
    /// Every cookie the browser would send to `url`.
    fn get_all<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Vec<Cookie>, ClientError>>;
}

/// Bulk-loads the host browser's cookies for the target origin.
pub struct HostCookieIntegration {
    api: Arc<dyn BrowserCookieApi>,
    origin: Url,
}

impl HostCookieIntegration {
    pub fn new(api: Arc<dyn BrowserCookieApi>, origin: Url) -> Self {
        Self { api, origin }
    }
}

impl CookieLoader for HostCookieIntegration {
    fn load_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>> {
        Box::pin(async move {
            let cookies = self.api.get_all(&self.origin).await?;
            let total = cookies.len();
            let accepted = store.store(cookies);
            log::debug!("loaded {accepted}/{total} host cookies for {}", self.origin);
            Ok(accepted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCookieFormat;

    struct FakeBrowser;

    impl BrowserCookieApi for FakeBrowser {
        fn get_all<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<Vec<Cookie>, ClientError>> {
            Box::pin(async {
                Ok(vec![
                    Cookie::new("session_router", "id:_5_1,xsrf:t").with_domain("learn.example.com"),
                    Cookie::new("ads", "1").with_domain("ads.example.net"),
                ])
            })
        }
    }

    #[tokio::test]
    async fn loads_only_target_host_cookies() {
        let store = CookieStore::new("learn.example.com", SessionCookieFormat::default());
        let integration =
            HostCookieIntegration::new(Arc::new(FakeBrowser), Url::parse("https://learn.example.com/").unwrap());

        assert_eq!(integration.load_cookies(&store).await.unwrap(), 1);
        assert_eq!(store.identity().user_id.as_deref(), Some("_5_1"));
    }
}
