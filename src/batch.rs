//! Request batching over the LMS batch endpoint.
//!
//! While a batch is open, body-less API calls are not sent. They are captured as
//! [`BatchEntry`] records and the caller gets a [`PendingReply`]. [`RequestBatcher::send`]
//! closes the scope and ships every entry in one `PUT` of `[{method, relativeUrl}]`; the
//! server answers with `[{statusCode, headers, body}]` in the same order, which is matched
//! back to the callers by index.
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use http::Method;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::ClientError;

/// One captured call, as sent to the batch endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub method: String,
    pub relative_url: String,
    #[serde(skip)]
    pub correlation_id: u64,
}

/// One record of the batch endpoint's reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Value,
    #[serde(default)]
    pub body: Value,
}

impl BatchRecord {
    /// Some deployments double-encode the body as a JSON string.
    fn into_body(self) -> Value {
        match self.body {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        }
    }
}

struct Pending {
    entry: BatchEntry,
    tx: oneshot::Sender<Result<Value, ClientError>>,
}

/// Resolves with the body of the entry's record once the batch was sent.
pub struct PendingReply {
    correlation_id: u64,
    rx: oneshot::Receiver<Result<Value, ClientError>>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }
}

impl Future for PendingReply {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(reply) => reply,
            // Batcher dropped with the scope still open
            Err(_) => Err(ClientError::TaskAborted),
        })
    }
}

#[derive(Default)]
pub struct RequestBatcher {
    scope: Mutex<Option<Vec<Pending>>>,
    next_id: AtomicU64,
}

impl RequestBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a batch scope. Returns false if one is already open.
    pub fn open(&self) -> bool {
        let mut scope = self.scope.lock();
        if scope.is_some() {
            return false;
        }
        *scope = Some(Vec::new());
        log::debug!("batch opened");
        true
    }

    pub fn is_open(&self) -> bool {
        self.scope.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.scope.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Captures the call if a batch is open, otherwise returns `None` and the caller sends
    /// it as an ordinary request.
    pub fn intercept(&self, method: &Method, relative_url: &str) -> Option<PendingReply> {
        let mut scope = self.scope.lock();
        let pending = scope.as_mut()?;

        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        pending.push(Pending {
            entry: BatchEntry {
                method: method.as_str().to_string(),
                relative_url: relative_url.trim_start_matches('/').to_string(),
                correlation_id,
            },
            tx,
        });

        Some(PendingReply { correlation_id, rx })
    }

    /// Captures a call explicitly. Fails if no batch is open.
    pub fn enqueue(&self, method: Method, relative_url: &str) -> Result<PendingReply, ClientError> {
        self.intercept(&method, relative_url)
            .ok_or_else(|| ClientError::Batch("no batch is open".to_string()))
    }

    /// Closes the scope and sends every captured entry through `dispatch` in one call.
    ///
    /// Returns the number of entries sent. An empty (or unopened) batch never calls
    /// `dispatch`. If `dispatch` fails, every entry is rejected and the error is returned.
    pub async fn send<F, Fut>(&self, dispatch: F) -> Result<usize, ClientError>
    where
        F: FnOnce(Vec<BatchEntry>) -> Fut,
        Fut: Future<Output = Result<Vec<BatchRecord>, ClientError>>,
    {
        let pending = self.scope.lock().take().unwrap_or_default();
        if pending.is_empty() {
            log::debug!("batch closed without entries");
            return Ok(0);
        }

        let count = pending.len();
        let entries = pending.iter().map(|p| p.entry.clone()).collect();
        log::debug!("sending batch of {count} entries");

        let records = match dispatch(entries).await {
            Ok(records) => records,
            Err(e) => {
                let msg = e.to_string();
                for p in pending {
                    let _ = p.tx.send(Err(ClientError::Batch(msg.clone())));
                }
                return Err(e);
            }
        };

        if records.len() > count {
            log::warn!("batch returned {} records for {count} entries", records.len());
        }

        let mut records = records.into_iter();
        for (idx, p) in pending.into_iter().enumerate() {
            let reply = match records.next() {
                None => Err(ClientError::Batch(format!(
                    "no response record for entry {idx} ({} {})",
                    p.entry.method, p.entry.relative_url
                ))),
                Some(record) if record.status_code >= 400 => Err(ClientError::Api {
                    status: record.status_code,
                    body: record.into_body(),
                }),
                Some(record) => Ok(record.into_body()),
            };
            // Ignore send error if the caller stopped waiting
            let _ = p.tx.send(reply);
        }

        Ok(count)
    }
}
