use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::channel::{FrameSink, FrameStream};
use super::envelope::{CallEnvelope, EventEnvelope, Frame, ReplyEnvelope};
use crate::errors::ClientError;

pub type Handler = Arc<dyn Fn(CallContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
pub type Middleware = Arc<dyn Fn(&CallEnvelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Background tasks of live subscriptions, by nonce.
type Subscriptions = Arc<Mutex<HashMap<String, AbortHandle>>>;

/// What a handler gets to see of a call.
#[derive(Clone)]
pub struct CallContext {
    pub layer: String,
    pub method: String,
    args: Vec<Value>,
    nonce: Option<String>,
    sink: Arc<dyn FrameSink>,
    subscriptions: Subscriptions,
}

impl CallContext {
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Deserializes the positional argument at `idx`. A missing argument reads as `null`.
    pub fn arg<T: DeserializeOwned>(&self, idx: usize) -> anyhow::Result<T> {
        let value = self.args.get(idx).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).with_context(|| format!("{}.{}: bad argument {idx}", self.layer, self.method))
    }

    /// True when the caller subscribed to events of this call.
    pub fn is_subscribed(&self) -> bool {
        self.nonce.is_some()
    }

    fn not_subscribed(&self) -> ClientError {
        ClientError::Bridge(format!("{}.{} was not called with a subscription", self.layer, self.method))
    }

    /// Sends an event to the caller's subscription.
    pub fn emit(&self, payload: Value) -> Result<(), ClientError> {
        let Some(nonce) = &self.nonce else {
            return Err(self.not_subscribed());
        };
        self.sink.send(
            Frame::Event(EventEnvelope {
                fn_nonce: nonce.clone(),
                fn_response: payload,
            })
            .into_value(),
        )
    }

    /// Runs `task` in the background until it finishes or the caller unsubscribes, whichever
    /// comes first. One task per subscription.
    pub fn spawn_subscription<F>(&self, task: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(nonce) = self.nonce.clone() else {
            return Err(self.not_subscribed());
        };

        let (handle, registration) = AbortHandle::new_pair();
        match self.subscriptions.lock().entry(nonce.clone()) {
            Entry::Occupied(_) => {
                return Err(ClientError::Bridge(format!("subscription {nonce} already has a task")));
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        let subscriptions = self.subscriptions.clone();
        tokio::spawn(async move {
            if Abortable::new(task, registration).await.is_err() {
                log::debug!("subscription {nonce} cancelled");
            }
            subscriptions.lock().remove(&nonce);
        });
        Ok(())
    }
}

/// A named group of methods.
#[derive(Default, Clone)]
pub struct Layer {
    methods: HashMap<String, Handler>,
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |ctx| -> BoxFuture<'static, anyhow::Result<Value>> { Box::pin(handler(ctx)) });
        self.methods.insert(name.to_string(), handler);
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

/// Serves a two-level `layer.method` API over a channel.
#[derive(Default, Clone)]
pub struct BridgeServer {
    layers: HashMap<String, Layer>,
    middleware: Vec<Middleware>,
    subscriptions: Subscriptions,
}

impl BridgeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, name: &str, layer: Layer) -> Self {
        self.layers.insert(name.to_string(), layer);
        self
    }

    /// Adds a middleware. Middlewares run in insertion order before every dispatch; the
    /// first failure rejects the call.
    pub fn middleware<F, Fut>(mut self, middleware: F) -> Self
    where
        F: Fn(&CallEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let middleware: Middleware = Arc::new(move |call: &CallEnvelope| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(middleware(call))
        });
        self.middleware.push(middleware);
        self
    }

    /// True if the call addresses an existing `layer.method` with list arguments.
    pub fn validate(&self, call: &CallEnvelope) -> bool {
        let Some(layer) = self.layers.get(&call.layer) else {
            return false;
        };
        layer.has_method(&call.method) && matches!(call.args, None | Some(Value::Array(_)))
    }

    /// Stops the background task of the subscription `nonce`, if any.
    pub fn unsubscribe(&self, nonce: &str) {
        if let Some(handle) = self.subscriptions.lock().remove(nonce) {
            log::debug!("unsubscribing {nonce}");
            handle.abort();
        }
    }

    /// Subscriptions that still have a running task.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Handles one incoming frame. Invalid frames are dropped without a reply.
    pub async fn handle(&self, frame: Value, sink: Arc<dyn FrameSink>) {
        let call = match Frame::from_value(frame) {
            Some(Frame::Call(call)) if self.validate(&call) => call,
            Some(Frame::Unsubscribe(nonce)) => {
                self.unsubscribe(&nonce);
                return;
            }
            _ => {
                log::trace!("dropping frame that is not a valid call");
                return;
            }
        };

        let id = call.id.clone();
        let outcome = self.dispatch(call, sink.clone()).await.map_err(|e| format!("{e:#}"));
        if let Err(e) = &outcome {
            log::debug!("call {id} failed: {e}");
        }

        if let Err(e) = sink.send(Frame::Reply(ReplyEnvelope { id, outcome }).into_value()) {
            log::warn!("could not send reply: {e}");
        }
    }

    async fn dispatch(&self, call: CallEnvelope, sink: Arc<dyn FrameSink>) -> anyhow::Result<Value> {
        for middleware in &self.middleware {
            middleware(&call).await?;
        }

        let handler = self
            .layers
            .get(&call.layer)
            .and_then(|layer| layer.methods.get(&call.method))
            .cloned()
            .with_context(|| format!("{}.{} disappeared", call.layer, call.method))?;

        let ctx = CallContext {
            args: call.arg_list(),
            layer: call.layer,
            method: call.method,
            nonce: call.fn_nonce,
            sink,
            subscriptions: self.subscriptions.clone(),
        };
        handler(ctx).await
    }

    /// Reads calls from `stream` until it ends, each handled on its own task.
    pub fn serve(self: Arc<Self>, mut stream: FrameStream, sink: Arc<dyn FrameSink>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let server = self.clone();
                let sink = sink.clone();
                tokio::spawn(async move { server.handle(frame, sink).await });
            }
            log::debug!("bridge channel closed");
        })
    }
}
