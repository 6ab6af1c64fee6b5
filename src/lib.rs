//! Authenticated client runtime for an LMS web API.
//!
//! The crate keeps the LMS session cookies of one host, composes the headers the LMS expects
//! from its own web app, throttles and batches API calls, drives relogin through a browser
//! surface when the session expires, and exposes the resulting API over a small RPC bridge.
//!
//! Start with [`ApiClient::builder`].
pub mod batch;
pub mod bridge;
pub mod client;
pub mod config;
pub mod cookies;
pub mod errors;
pub mod headers;
pub mod logging;
pub mod net;
pub mod reauth;
pub mod session;
pub mod surface;
pub mod throttle;

/// Capacity of the broadcast channels used for identity, surface and relogin events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, ExecutionMode};
pub use cookies::{Cookie, CookieStore};
pub use errors::ClientError;
pub use reauth::{ReauthOrchestrator, ReauthOutcome, ReauthState};
pub use session::{SessionCredentialResolver, SessionIdentity};
