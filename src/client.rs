//! The authenticated LMS API client.
//!
//! [`ApiClient`] wires the runtime together:
//!
//! ```text
//!  layer call ─▶ LayerCache ─miss─▶ request() ─▶ RequestBatcher (if a batch is open)
//!                                       │
//!                                       ▼
//!                                   Throttle ─▶ StealthHeaderComposer ─▶ Transport
//!                                       │                                   │
//!                                       │◀── 401: ReauthOrchestrator::relogin() + one retry
//!                                       ▼
//!                              ResponseCookieIntegration (Set-Cookie back into the store)
//! ```
//!
//! The client is cheap to clone; all clones share the same store, throttle and caches.
mod cache;
mod layers;

use std::sync::{Arc, Weak};

use http::Method;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::batch::{BatchRecord, RequestBatcher};
use crate::config::ClientConfig;
use crate::cookies::{CookieLoader, CookieStore, ResponseCookieIntegration};
use crate::errors::ClientError;
use crate::headers::StealthHeaderComposer;
use crate::net::{ApiRequest, ReqwestTransport, Transport};
use crate::reauth::ReauthOrchestrator;
use crate::session::{SessionCookieFormat, SessionCredentialResolver};
use crate::throttle::Throttle;

pub use cache::LayerCache;
pub use layers::{Courses, Grades, Stream, Users};

struct Caches {
    courses: LayerCache,
    grades: LayerCache,
    stream: LayerCache,
    users: LayerCache,
}

impl Caches {
    fn new() -> Self {
        Self {
            courses: LayerCache::new("courses"),
            grades: LayerCache::new("grades"),
            stream: LayerCache::new("stream"),
            users: LayerCache::new("users"),
        }
    }

    fn invalidate_all(&self) {
        for cache in [&self.courses, &self.grades, &self.stream, &self.users] {
            cache.invalidate();
        }
    }
}

struct ClientInner {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    store: Arc<CookieStore>,
    resolver: SessionCredentialResolver,
    composer: StealthHeaderComposer,
    response_cookies: ResponseCookieIntegration,
    throttle: Throttle,
    batcher: RequestBatcher,
    reauth: Option<Arc<ReauthOrchestrator>>,
    caches: Caches,
    identity_listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(listener) = self.identity_listener.lock().take() {
            listener.abort();
        }
    }
}

impl ClientInner {
    /// One physical request, no reauth handling.
    async fn dispatch(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, ClientError> {
        let headers = self.composer.compose(&url).await?;

        let mut request = ApiRequest::new(method, url).with_headers(headers);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        log::debug!("{} {}", request.method, request.url);
        let response = self.transport.execute(request).await?;
        self.response_cookies.observe(&response);

        Ok(response.error_for_status()?.json_value())
    }
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cookie_store(&self) -> &Arc<CookieStore> {
        &self.inner.store
    }

    pub fn resolver(&self) -> &SessionCredentialResolver {
        &self.inner.resolver
    }

    pub fn throttle(&self) -> &Throttle {
        &self.inner.throttle
    }

    pub fn reauth(&self) -> Option<&Arc<ReauthOrchestrator>> {
        self.inner.reauth.as_ref()
    }

    /// Issues an API call relative to the versioned prefix and returns the JSON body.
    ///
    /// While a batch is open, body-less calls are captured instead of sent and resolve when
    /// the batch is sent.
    pub async fn request(&self, method: Method, relative: &str, body: Option<Value>) -> Result<Value, ClientError> {
        if body.is_none() {
            if let Some(reply) = self.inner.batcher.intercept(&method, relative) {
                return match (reply.await, &self.inner.reauth) {
                    (Err(e), Some(reauth)) if e.is_unauthorized() => {
                        log::info!("401 inside batch for {relative}, relogging in");
                        reauth.relogin().await?;
                        let url = self.inner.config.api_url(relative)?;
                        self.throttled(method, url, None).await
                    }
                    (reply, _) => reply,
                };
            }
        }

        let url = self.inner.config.api_url(relative)?;
        self.execute(method, url, body).await
    }

    pub async fn get(&self, relative: &str) -> Result<Value, ClientError> {
        self.request(Method::GET, relative, None).await
    }

    /// Throttled call with the 401 → relogin → single retry policy.
    async fn execute(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, ClientError> {
        if let Some(reauth) = &self.inner.reauth {
            reauth.wait_until_idle().await?;
        }

        match self.throttled(method.clone(), url.clone(), body.clone()).await {
            Err(e) if e.is_unauthorized() => {
                let Some(reauth) = &self.inner.reauth else {
                    return Err(e);
                };
                log::info!("401 from {url}, relogging in");
                reauth.relogin().await?;
                self.throttled(method, url, body).await
            }
            other => other,
        }
    }

    async fn throttled(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, ClientError> {
        let inner = self.inner.clone();
        self.inner
            .throttle
            .process_one(move || async move { inner.dispatch(method, url, body).await })
            .await?
    }

    /// Opens a batch scope. Returns false if one is already open.
    pub fn open_batch(&self) -> bool {
        self.inner.batcher.open()
    }

    pub fn batch_open(&self) -> bool {
        self.inner.batcher.is_open()
    }

    /// Sends every call captured since [`open_batch`](Self::open_batch) in one request.
    pub async fn send_batch(&self) -> Result<usize, ClientError> {
        let client = self.clone();
        self.inner
            .batcher
            .send(|entries| async move {
                let url = client.inner.config.batch_url()?;
                let body = serde_json::to_value(&entries)?;
                let reply = client.execute(Method::PUT, url, Some(body)).await?;
                Ok(serde_json::from_value::<Vec<BatchRecord>>(reply)?)
            })
            .await
    }

    pub(crate) fn batcher(&self) -> &RequestBatcher {
        &self.inner.batcher
    }

    pub fn courses(&self) -> Courses {
        Courses::new(self.clone())
    }

    pub fn grades(&self) -> Grades {
        Grades::new(self.clone())
    }

    pub fn stream(&self) -> Stream {
        Stream::new(self.clone())
    }

    pub fn users(&self) -> Users {
        Users::new(self.clone())
    }

    /// Drops every cached layer response so the next call goes to the network.
    pub fn refresh_all(&self) {
        log::info!("refreshing all layers");
        self.inner.caches.invalidate_all();
    }

    pub(crate) fn user_id(&self) -> Result<String, ClientError> {
        self.inner.resolver.user_id().ok_or(ClientError::IdentityUnavailable)
    }

    /// Cache key scoped to the signed-in user. Entries of one user are never served to
    /// another, even before the identity listener has cleared the caches.
    pub(crate) fn user_key(&self, key: &str) -> Result<String, ClientError> {
        Ok(format!("{}/{key}", self.user_id()?))
    }
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<CookieStore>>,
    refresher: Option<Arc<dyn CookieLoader>>,
    reauth: Option<Arc<ReauthOrchestrator>>,
}

impl ApiClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            refresher: None,
            reauth: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cookie_store(mut self, store: Arc<CookieStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Loader used to refresh cookies when the XSRF token is missing.
    pub fn refresher(mut self, refresher: Arc<dyn CookieLoader>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn reauth(mut self, reauth: Arc<ReauthOrchestrator>) -> Self {
        self.reauth = Some(reauth);
        self
    }

    /// Builds the client. Must be called within a Tokio runtime.
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let config = Arc::new(self.config);

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let store = self.store.unwrap_or_else(|| {
            CookieStore::new(config.target_host(), SessionCookieFormat::from_config(&config))
        });

        let resolver = SessionCredentialResolver::new(store.clone());
        let mut composer = StealthHeaderComposer::new(config.clone(), resolver.clone());
        if let Some(refresher) = self.refresher {
            composer = composer.with_refresher(refresher);
        }

        let mut identity_events = store.subscribe_identity();
        let inner = Arc::new(ClientInner {
            throttle: Throttle::from_config(&config),
            response_cookies: ResponseCookieIntegration::new(store.clone()),
            config,
            transport,
            store,
            resolver,
            composer,
            batcher: RequestBatcher::new(),
            reauth: self.reauth,
            caches: Caches::new(),
            identity_listener: Mutex::new(None),
        });

        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        let listener = tokio::spawn(async move {
            loop {
                match identity_events.recv().await {
                    Ok(change) => {
                        let Some(inner) = weak.upgrade() else { break };
                        log::info!("user changed to {}, invalidating caches", change.current);
                        inner.caches.invalidate_all();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.caches.invalidate_all();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *inner.identity_listener.lock() = Some(listener);

        Ok(ApiClient { inner })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cookies::Cookie;
    use crate::net::ApiResponse;
    use futures::future::BoxFuture;
    use http::HeaderMap;
    use std::collections::VecDeque;

    type Responder = Box<dyn Fn(&ApiRequest) -> (u16, Value) + Send + Sync>;

    /// Transport answering from a closure, recording every request.
    pub(crate) struct FakeTransport {
        pub requests: Mutex<Vec<ApiRequest>>,
        scripted: Mutex<VecDeque<(u16, Value)>>,
        responder: Responder,
    }

    impl FakeTransport {
        pub fn new(responder: impl Fn(&ApiRequest) -> (u16, Value) + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                scripted: Mutex::new(VecDeque::new()),
                responder: Box::new(responder),
            })
        }

        /// Answers the next calls with these before falling back to the responder.
        pub fn script(&self, status: u16, body: Value) {
            self.scripted.lock().push_back((status, body));
        }

        pub fn paths(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|r| format!("{} {}", r.method, r.url.path()))
                .collect()
        }
    }

    impl Transport for FakeTransport {
        fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ClientError>> {
            let (status, body) = self
                .scripted
                .lock()
                .pop_front()
                .unwrap_or_else(|| (self.responder)(&request));
            self.requests.lock().push(request.clone());
            Box::pin(async move {
                Ok(ApiResponse {
                    url: request.url,
                    status,
                    status_text: String::new(),
                    headers: HeaderMap::new(),
                    body: serde_json::to_vec(&body)?,
                })
            })
        }
    }

    pub(crate) fn logged_in_client(transport: Arc<FakeTransport>) -> ApiClient {
        let client = ApiClient::builder(ClientConfig::default())
            .transport(transport)
            .build()
            .unwrap();
        client
            .cookie_store()
            .store(vec![Cookie::new("session_router", "id:_1_1,xsrf:tok")]);
        client
    }
}
