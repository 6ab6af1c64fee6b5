//! HTTP plumbing underneath the API client.
//!
//! The client never talks to `reqwest` directly. It builds an [`ApiRequest`] and hands it to
//! a [`Transport`], which is what lets the whole runtime be exercised without a network.
mod fetch;
mod response;

use futures::future::BoxFuture;
use http::{HeaderMap, Method};
use serde_json::Value;
use url::Url;

use crate::errors::ClientError;

pub use fetch::ReqwestTransport;
pub use response::ApiResponse;

/// A fully specified outbound request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Executes requests. Non-2xx statuses are not errors at this level.
pub trait Transport: Send + Sync {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ClientError>>;
}
