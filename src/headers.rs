//! Outbound header composition.
//!
//! The LMS only accepts API calls that look like they come from its own web app. The
//! [`StealthHeaderComposer`] is invoked for every request (the XSRF token rotates) and
//! produces:
//!
//! - the XSRF header, always;
//! - when running out of process, the browser fingerprint bundle: `User-Agent`, `Origin`,
//!   `Referer`, `Accept`, `Accept-Language`, the `Sec-Fetch-*` metadata and `Cookie`.
//!
//! In process, the hosting browser adds the bundle itself.
use std::sync::Arc;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::{ClientConfig, ExecutionMode};
use crate::cookies::CookieLoader;
use crate::errors::ClientError;
use crate::session::SessionCredentialResolver;

const ACCEPT: &str = "application/json, text/plain, */*";

#[derive(Clone)]
pub struct StealthHeaderComposer {
    config: Arc<ClientConfig>,
    resolver: SessionCredentialResolver,
    /// Used to refresh the store when the token is missing. Without one, the composer just
    /// waits `xsrf_retry_delay` before looking again.
    refresher: Option<Arc<dyn CookieLoader>>,
}

impl StealthHeaderComposer {
    pub fn new(config: Arc<ClientConfig>, resolver: SessionCredentialResolver) -> Self {
        Self {
            config,
            resolver,
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn CookieLoader>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Current XSRF token. A missing token is retried exactly once.
    pub async fn xsrf_token(&self) -> Result<String, ClientError> {
        if let Some(token) = self.resolver.xsrf() {
            return Ok(token);
        }

        match &self.refresher {
            Some(loader) => {
                log::debug!("xsrf token missing, reloading cookies");
                if let Err(e) = loader.load_cookies(self.resolver.store()).await {
                    log::warn!("cookie refresh failed: {e}");
                }
            }
            None => {
                log::debug!("xsrf token missing, retrying in {:?}", self.config.xsrf_retry_delay);
                tokio::time::sleep(self.config.xsrf_retry_delay).await;
            }
        }

        self.resolver.xsrf().ok_or(ClientError::AuthTokenUnavailable)
    }

    /// Headers for a request to `url`.
    pub async fn compose(&self, url: &Url) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();

        let token = self.xsrf_token().await?;
        headers.insert(
            HeaderName::from_bytes(self.config.xsrf_header.as_bytes())?,
            HeaderValue::from_str(&token)?,
        );

        if self.config.mode == ExecutionMode::InProcess {
            return Ok(headers);
        }

        let origin = self.config.origin();
        let referer = self.config.landing_url()?;
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&self.config.user_agent)?);
        headers.insert(header::ORIGIN, HeaderValue::from_str(&origin)?);
        headers.insert(header::REFERER, HeaderValue::from_str(referer.as_str())?);
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.config.accept_language)?,
        );
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));

        if let Some(cookie) = self.resolver.store().get(url) {
            headers.insert(header::COOKIE, HeaderValue::from_str(&cookie)?);
        }

        Ok(headers)
    }
}
