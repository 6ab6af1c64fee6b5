use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("XSRF token unavailable after retry")]
    AuthTokenUnavailable,

    #[error("Session identity unavailable")]
    IdentityUnavailable,

    #[error("Relogin denied by user")]
    ReloginDenied,

    #[error("Extension surface must be open before a relogin can start")]
    ExtensionMustBeOpen,

    #[error("Login surface closed before login completed")]
    LoginSurfaceClosed,

    #[error("Throttle queue is full")]
    ThrottleFull,

    #[error("Throttle is closed")]
    ThrottleClosed,

    #[error("Task dropped before it settled")]
    TaskAborted,

    #[error("API error {status}: {body}")]
    Api { status: u16, body: Value },

    #[error("Batch request failed: {0}")]
    Batch(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    #[error("Invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Cookie persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

impl ClientError {
    /// Returns true when the response was rejected because the session is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Api { status: 401, .. })
    }

    /// Only a denied relogin and an unreachable host are worth telling the user about. Everything
    /// else is a contract violation between the client and its caller.
    pub fn is_user_facing(&self) -> bool {
        match self {
            ClientError::ReloginDenied => true,
            ClientError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(feature = "sqlite_cookie_store")]
impl From<r2d2::Error> for ClientError {
    fn from(e: r2d2::Error) -> Self {
        ClientError::Persistence(e.to_string())
    }
}

#[cfg(feature = "sqlite_cookie_store")]
impl From<r2d2_sqlite::rusqlite::Error> for ClientError {
    fn from(e: r2d2_sqlite::rusqlite::Error) -> Self {
        ClientError::Persistence(e.to_string())
    }
}
