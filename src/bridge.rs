//! Two-level RPC over a bidirectional message channel.
//!
//! A [`BridgeServer`] owns named [`Layer`]s of async methods; a [`BridgeClient`] on the
//! other end calls them as `layer.method(args)`. Calls are correlated by id, so replies may
//! arrive in any order. A call may carry a subscription nonce, which lets the handler push
//! events back to the caller after (or before) it replies. Dropping the client's
//! [`Subscription`] cancels the handler's background task on the server.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lms_bridge::bridge::{channel_pair, BridgeClient, BridgeServer, CallContext, Layer};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), lms_bridge::ClientError> {
//! let server = BridgeServer::new().layer(
//!     "greeter",
//!     Layer::new().method("hello", |ctx: CallContext| async move {
//!         let name: String = ctx.arg(0)?;
//!         anyhow::Ok(json!(format!("hello {name}")))
//!     }),
//! );
//!
//! let (client_end, server_end) = channel_pair();
//! Arc::new(server).serve(server_end.stream, server_end.sink);
//!
//! let client = BridgeClient::new(client_end.sink, client_end.stream);
//! let reply = client.layer("greeter").call("hello", vec![json!("world")]).await?;
//! assert_eq!(reply, json!("hello world"));
//! # Ok(())
//! # }
//! ```
pub mod api;
mod channel;
mod client;
mod envelope;
mod server;

pub use api::{api_server, auth_ready};
pub use channel::{channel_pair, Endpoint, FrameSink, FrameStream};
pub use client::{BridgeClient, LayerStub, Subscription};
pub use envelope::{CallEnvelope, EventEnvelope, Frame, ReplyEnvelope};
pub use server::{BridgeServer, CallContext, Handler, Layer, Middleware};
