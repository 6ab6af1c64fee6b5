use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::channel::{FrameSink, FrameStream};
use super::envelope::{CallEnvelope, Frame};
use crate::errors::ClientError;

type Reply = Result<Value, ClientError>;

#[derive(Default)]
struct Registry {
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl Registry {
    fn route(&self, frame: Value) {
        match Frame::from_value(frame) {
            Some(Frame::Reply(reply)) => {
                let Some(tx) = self.pending.lock().remove(&reply.id) else {
                    log::trace!("ignoring reply for unknown call {}", reply.id);
                    return;
                };
                let _ = tx.send(reply.outcome.map_err(ClientError::Bridge));
            }
            Some(Frame::Event(event)) => {
                let subscriptions = self.subscriptions.lock();
                match subscriptions.get(&event.fn_nonce) {
                    Some(tx) => {
                        let _ = tx.unbounded_send(event.fn_response);
                    }
                    None => log::trace!("ignoring event for unknown subscription {}", event.fn_nonce),
                }
            }
            _ => {}
        }
    }
}

/// Calls a [`BridgeServer`](super::BridgeServer) on the other end of a channel.
pub struct BridgeClient {
    sink: Arc<dyn FrameSink>,
    registry: Arc<Registry>,
    reader: JoinHandle<()>,
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl BridgeClient {
    /// Starts reading replies from `stream`. Must be called within a Tokio runtime.
    pub fn new(sink: Arc<dyn FrameSink>, mut stream: FrameStream) -> Self {
        let registry = Arc::new(Registry::default());

        let reader_registry = registry.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                reader_registry.route(frame);
            }
            log::debug!("bridge channel closed, failing pending calls");
            // Dropping the senders fails every waiting call
            reader_registry.pending.lock().clear();
            reader_registry.subscriptions.lock().clear();
        });

        Self { sink, registry, reader }
    }

    /// Calls `layer.method(args)` and waits for the reply.
    pub async fn call(&self, layer: &str, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.send_call(layer, method, args, None).await
    }

    pub fn layer(&self, name: &str) -> LayerStub<'_> {
        LayerStub {
            client: self,
            name: name.to_string(),
        }
    }

    /// Calls `layer.method(args)` with a subscription attached. Events the handler emits,
    /// before or after its reply, arrive on the returned [`Subscription`].
    pub async fn subscribe(&self, layer: &str, method: &str, args: Vec<Value>) -> Result<Subscription, ClientError> {
        let nonce = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded();
        self.registry.subscriptions.lock().insert(nonce.clone(), tx);

        let mut subscription = Subscription {
            nonce: nonce.clone(),
            response: Value::Null,
            events: rx,
            registry: Arc::downgrade(&self.registry),
            sink: self.sink.clone(),
        };
        // On error the subscription is dropped here, which unregisters it.
        subscription.response = self.send_call(layer, method, args, Some(nonce)).await?;
        Ok(subscription)
    }

    async fn send_call(
        &self,
        layer: &str,
        method: &str,
        args: Vec<Value>,
        fn_nonce: Option<String>,
    ) -> Result<Value, ClientError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.registry.pending.lock().insert(id.clone(), tx);

        let call = CallEnvelope {
            layer: layer.to_string(),
            method: method.to_string(),
            args: Some(Value::Array(args)),
            id: id.clone(),
            fn_nonce,
        };
        if let Err(e) = self.sink.send(Frame::Call(call).into_value()) {
            self.registry.pending.lock().remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    pub fn pending_calls(&self) -> usize {
        self.registry.pending.lock().len()
    }
}

/// Client-side view of one server layer.
pub struct LayerStub<'a> {
    client: &'a BridgeClient,
    name: String,
}

impl LayerStub<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.client.call(&self.name, method, args).await
    }

    pub async fn subscribe(&self, method: &str, args: Vec<Value>) -> Result<Subscription, ClientError> {
        self.client.subscribe(&self.name, method, args).await
    }
}

/// Events of a subscribed call. Dropping it unregisters locally and tells the server to stop
/// the subscription.
pub struct Subscription {
    nonce: String,
    response: Value,
    events: mpsc::UnboundedReceiver<Value>,
    registry: Weak<Registry>,
    sink: Arc<dyn FrameSink>,
}

impl Subscription {
    /// The call's own reply.
    pub fn response(&self) -> &Value {
        &self.response
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscriptions.lock().remove(&self.nonce);
        }
        if let Err(e) = self.sink.send(Frame::Unsubscribe(self.nonce.clone()).into_value()) {
            log::trace!("could not unsubscribe {}: {e}", self.nonce);
        }
    }
}
