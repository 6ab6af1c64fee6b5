use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::errors::ClientError;

/// A queued task. Calling it invokes the caller's factory and returns the future to spawn.
type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct State {
    running: usize,
    queue: VecDeque<Job>,
    closed: bool,
    /// Set while some caller is draining the queue, so factories start in FIFO order even
    /// when several threads pump at once.
    pumping: bool,
}

struct Inner {
    max: usize,
    capacity: Option<usize>,
    state: Mutex<State>,
}

/// Runs at most `max` tasks at a time, starting queued ones in submission order.
///
/// Tasks are factories: nothing runs until the throttle starts it. As soon as a running task
/// finishes the next queued one is started.
///
/// Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<Inner>,
}

impl Throttle {
    pub fn new(max: usize) -> Self {
        Self::with_queue_capacity(max, None)
    }

    /// `capacity` bounds the number of tasks waiting to start (not the running ones).
    pub fn with_queue_capacity(max: usize, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                max: max.max(1),
                capacity,
                state: Mutex::new(State {
                    running: 0,
                    queue: VecDeque::new(),
                    closed: false,
                    pumping: false,
                }),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_queue_capacity(config.max_concurrency, config.queue_capacity)
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Queues `factory` and returns a handle resolving to its output.
    ///
    /// Fails with [`ClientError::ThrottleClosed`] after [`close`](Self::close) and with
    /// [`ClientError::ThrottleFull`] when the queue is at capacity.
    pub fn submit<F, Fut, T>(&self, factory: F) -> Result<TaskHandle<T>, ClientError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let fut = factory();
            Box::pin(async move {
                // Ignore send error if the caller dropped its handle
                let _ = tx.send(fut.await);
            })
        });

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ClientError::ThrottleClosed);
            }
            if let Some(capacity) = self.inner.capacity {
                if state.running >= self.inner.max && state.queue.len() >= capacity {
                    return Err(ClientError::ThrottleFull);
                }
            }
            state.queue.push_back(job);
        }

        self.pump();
        Ok(TaskHandle { rx })
    }

    /// Submits one task and waits for it.
    pub async fn process_one<F, Fut, T>(&self, factory: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(factory)?.await
    }

    /// Submits every task and waits for all of them. Results are in submission order; a
    /// task that could not be queued gets its own error.
    pub async fn process<I, F, Fut, T>(&self, factories: I) -> Result<Vec<Result<T, ClientError>>, ClientError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(ClientError::ThrottleClosed);
        }

        let handles = factories
            .into_iter()
            .map(|f| self.submit(f))
            .collect::<Vec<_>>();

        Ok(join_all(handles.into_iter().map(|h| async move { h?.await })).await)
    }

    /// Refuses new tasks. Already queued tasks still run.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn pump(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("throttle pumped outside of a tokio runtime");
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
            let job = {
                let mut state = self.inner.state.lock();
                let next = if state.running < self.inner.max {
                    state.queue.pop_front()
                } else {
                    None
                };
                let Some(job) = next else {
                    state.pumping = false;
                    return;
                };
                state.running += 1;
                job
            };

            let slot = RunningSlot { throttle: self.clone() };
            // A panicking factory must not leave the pump flag set
            let Ok(fut) = panic::catch_unwind(AssertUnwindSafe(job)) else {
                log::warn!("throttle: task factory panicked");
                drop(slot);
                continue;
            };
            log::trace!("throttle: task started ({} running)", self.running());
            runtime.spawn(async move {
                fut.await;
                drop(slot);
            });
        }
    }
}

/// Held by a running task. Frees the slot and refills on drop, also when the task panics.
struct RunningSlot {
    throttle: Throttle,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.throttle.inner.state.lock().running -= 1;
        self.throttle.pump();
    }
}

/// Resolves to the task's output, or [`ClientError::TaskAborted`] if it never settled.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| ClientError::TaskAborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn starts_in_submission_order() {
        let throttle = Throttle::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles = (1..=5)
            .map(|i| {
                let order = order.clone();
                throttle
                    .submit(move || {
                        order.lock().push(i);
                        async move {
                            tokio::task::yield_now().await;
                            i
                        }
                    })
                    .unwrap()
            })
            .collect::<Vec<_>>();

        let results = join_all(handles).await;
        assert_eq!(results.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(*order.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn never_exceeds_max_and_refills_greedily() {
        let throttle = Throttle::new(2);
        let gate = Arc::new(Notify::new());
        let started = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let started = started.clone();
            handles.push(
                throttle
                    .submit(move || {
                        started.fetch_add(1, Ordering::SeqCst);
                        async move { gate.notified().await }
                    })
                    .unwrap(),
            );
        }

        settle().await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.running(), 2);
        assert_eq!(throttle.queued(), 1);

        gate.notify_one();
        settle().await;
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.queued(), 0);

        gate.notify_one();
        gate.notify_one();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(throttle.running(), 0);
    }

    #[tokio::test]
    async fn failure_stays_with_its_caller() {
        let throttle = Throttle::new(1);
        let tasks = (1..=3).map(|i| {
            move || async move {
                if i == 2 {
                    Err("boom".to_string())
                } else {
                    Ok(i)
                }
            }
        });

        let results: Vec<_> = throttle
            .process(tasks)
            .await
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(results, vec![Ok(1), Err("boom".to_string()), Ok(3)]);
    }

    #[tokio::test]
    async fn closed_throttle_rejects_but_drains() {
        let throttle = Throttle::new(1);
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        let first = throttle.submit(move || async move { g.notified().await }).unwrap();
        let second = throttle.submit(|| async { 2 }).unwrap();

        throttle.close();
        assert!(matches!(throttle.submit(|| async { 3 }), Err(ClientError::ThrottleClosed)));
        assert!(matches!(
            throttle.process_one(|| async { 4 }).await,
            Err(ClientError::ThrottleClosed)
        ));
        assert!(matches!(
            throttle.process(Vec::<fn() -> std::future::Ready<()>>::new()).await,
            Err(ClientError::ThrottleClosed)
        ));

        gate.notify_one();
        first.await.unwrap();
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn queue_capacity_is_enforced() {
        let throttle = Throttle::with_queue_capacity(1, Some(1));
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        let _running = throttle.submit(move || async move { g.notified().await }).unwrap();
        let _queued = throttle.submit(|| async {}).unwrap();

        assert!(matches!(throttle.submit(|| async {}), Err(ClientError::ThrottleFull)));
    }

    #[tokio::test]
    async fn panicking_task_frees_its_slot() {
        let throttle = Throttle::new(1);
        let bad = throttle
            .submit(|| async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                panic!("task panicked");
            })
            .unwrap();
        let good = throttle.submit(|| async { 7 }).unwrap();

        assert!(matches!(bad.await, Err(ClientError::TaskAborted)));
        assert_eq!(good.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn panicking_factory_does_not_stall_the_queue() {
        let throttle = Throttle::new(1);
        let bad = throttle
            .submit(|| -> std::future::Ready<u32> { panic!("factory panicked") })
            .unwrap();
        assert!(matches!(bad.await, Err(ClientError::TaskAborted)));
        assert_eq!(throttle.running(), 0);

        assert_eq!(throttle.process_one(|| async { 8 }).await.unwrap(), 8);
    }
}
