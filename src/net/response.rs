//! Buffered HTTP response model.
//!
//! Holds the final URL (after redirects), status code + reason, headers and the raw body.
//! `headers` is an `http::HeaderMap`, so lookups are case-insensitive.
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::ClientError;

#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Final URL of the response.
    pub url: url::Url,

    pub status: u16,

    /// Reason phrase (e.g. `"OK"`). `"Unknown"` for non-standard codes.
    pub status_text: String,

    pub headers: HeaderMap,

    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as JSON. An empty body is `null`, a body that is not JSON becomes a string.
    pub fn json_value(&self) -> Value {
        if self.body.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }

    /// Converts a non-2xx response into [`ClientError::Api`].
    pub fn error_for_status(self) -> Result<Self, ClientError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ClientError::Api {
                status: self.status,
                body: self.json_value(),
            })
        }
    }
}
