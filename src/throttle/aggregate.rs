use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::errors::ClientError;

type Transform<S, R> = Arc<dyn Fn(S) -> BoxFuture<'static, R> + Send + Sync>;

struct State<S, R> {
    queue: VecDeque<S>,
    in_flight: usize,
    results: Vec<R>,
    /// Transforms that panicked instead of producing a result.
    aborted: usize,
    closed: bool,
    pumping: bool,
}

struct Inner<S, R> {
    max: usize,
    transform: Transform<S, R>,
    state: Mutex<State<S, R>>,
    done: watch::Sender<bool>,
}

/// Runs a transform over every item it is given, at most `max` at a time, and hands back
/// all results at once.
///
/// ```rust,no_run
/// # use lms_bridge::throttle::Aggregator;
/// # async fn demo() -> Result<(), lms_bridge::ClientError> {
/// let agg = Aggregator::new(2, |n: u32| async move { n * 2 });
/// agg.take([1, 2, 3])?;
/// agg.close();
/// let mut doubled = agg.wait().await?;
/// doubled.sort();
/// assert_eq!(doubled, vec![2, 4, 6]);
/// # Ok(()) }
/// ```
pub struct Aggregator<S, R> {
    inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for Aggregator<S, R> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S, R> Aggregator<S, R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(max: usize, transform: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                max: max.max(1),
                transform: Arc::new(move |s| -> BoxFuture<'static, R> { Box::pin(transform(s)) }),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    in_flight: 0,
                    results: Vec::new(),
                    aborted: 0,
                    closed: false,
                    pumping: false,
                }),
                done,
            }),
        }
    }

    /// Starts up to `max` items right away and queues the rest.
    pub fn take(&self, items: impl IntoIterator<Item = S>) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ClientError::ThrottleClosed);
            }
            state.queue.extend(items);
        }
        self.pump();
        Ok(())
    }

    /// No more intake. [`wait`](Self::wait) resolves once everything taken so far settled.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.check_done();
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Waits until the intake is closed and nothing is queued or in flight, then returns the
    /// results in settlement order. Results are drained, a second call returns an empty list.
    ///
    /// Fails with [`ClientError::TaskAborted`] if any transform panicked.
    pub async fn wait(&self) -> Result<Vec<R>, ClientError> {
        let mut rx = self.inner.done.subscribe();
        rx.wait_for(|done| *done)
            .await
            .map_err(|_| ClientError::ChannelClosed)?;

        let mut state = self.inner.state.lock();
        let results = std::mem::take(&mut state.results);
        let aborted = std::mem::take(&mut state.aborted);
        if aborted > 0 {
            log::warn!("aggregator: {aborted} transforms panicked, dropping {} results", results.len());
            return Err(ClientError::TaskAborted);
        }
        Ok(results)
    }

    fn pump(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("aggregator pumped outside of a tokio runtime");
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if state.pumping {
                return;
            }
            state.pumping = true;
        }

        loop {
            let item = {
                let mut state = self.inner.state.lock();
                let next = if state.in_flight < self.inner.max {
                    state.queue.pop_front()
                } else {
                    None
                };
                let Some(item) = next else {
                    state.pumping = false;
                    break;
                };
                state.in_flight += 1;
                item
            };

            let Ok(fut) = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.transform)(item))) else {
                let mut state = self.inner.state.lock();
                state.in_flight -= 1;
                state.aborted += 1;
                continue;
            };
            let this = self.clone();
            runtime.spawn(async move {
                let result = AssertUnwindSafe(fut).catch_unwind().await.ok();
                this.settle(result);
            });
        }

        self.check_done();
    }

    /// `None` when the transform panicked.
    fn settle(&self, result: Option<R>) {
        {
            let mut state = self.inner.state.lock();
            match result {
                Some(result) => state.results.push(result),
                None => state.aborted += 1,
            }
            state.in_flight -= 1;
        }
        self.pump();
    }

    fn check_done(&self) {
        let finished = {
            let state = self.inner.state.lock();
            state.closed && state.in_flight == 0 && state.queue.is_empty()
        };
        if finished {
            log::trace!("aggregator drained");
            self.inner.done.send_replace(true);
        }
    }
}
