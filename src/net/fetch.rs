use futures::future::BoxFuture;

use crate::errors::ClientError;
use crate::net::{ApiRequest, ApiResponse, Transport};

/// [`Transport`] over a shared `reqwest::Client`.
///
/// Cookies are handled by the [`CookieStore`](crate::cookies::CookieStore), so the reqwest
/// cookie jar stays off and redirects are not followed silently with stale headers.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let res = builder.send().await?;

        let url = res.url().clone();
        let status = res.status().as_u16();
        let status_text = res.status().canonical_reason().unwrap_or("Unknown").to_string();
        let headers = res.headers().clone();

        // No streaming, API payloads are small
        let body = res.bytes().await?.to_vec();

        log::trace!("{status} {url} ({} bytes)", body.len());

        Ok(ApiResponse {
            url,
            status,
            status_text,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ClientError>> {
        Box::pin(self.send(request))
    }
}
