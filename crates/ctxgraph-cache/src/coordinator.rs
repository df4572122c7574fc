//! Merges bursts of change notifications into consolidated invalidation
//! calls.
//!
//! Two independent paths are offered:
//! - `submit` groups paths by fixed time window (`floor(elapsed / window)`)
//!   and issues exactly one downstream call per window when it closes.
//! - `throttled_submit` queues paths FIFO and drains them in chunks with a
//!   fixed delay between chunks.
//!
//! Both must be called from within a tokio runtime.

use ctxgraph_core::{
    BatchConfig, ChangeType, CtxGraphError, FileChangeEvent, InvalidationRequest,
    InvalidationSink, Result,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct PendingWindow {
    changes: Vec<(String, ChangeType)>,
    waiters: Vec<Waiter>,
}

struct QueuedChange {
    path: String,
    change: ChangeType,
    limit: usize,
    done: Waiter,
}

#[derive(Default)]
struct ThrottleState {
    queue: VecDeque<QueuedChange>,
    draining: bool,
}

struct CoordinatorInner {
    sink: Arc<dyn InvalidationSink>,
    config: BatchConfig,
    origin: Instant,
    windows: Mutex<HashMap<u64, PendingWindow>>,
    throttle: Mutex<ThrottleState>,
}

/// Create the bounded channel a file watcher feeds and
/// [`BatchCoordinator::spawn_event_pump`] consumes.
pub fn event_channel(
    config: &BatchConfig,
) -> (mpsc::Sender<FileChangeEvent>, mpsc::Receiver<FileChangeEvent>) {
    mpsc::channel(config.event_channel_capacity.max(1))
}

#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BatchCoordinator {
    pub fn new(sink: Arc<dyn InvalidationSink>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                sink,
                config,
                origin: Instant::now(),
                windows: Mutex::new(HashMap::new()),
                throttle: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    /// Number of windows registered but not yet flushed.
    pub fn pending_windows(&self) -> usize {
        self.inner.windows.lock().len()
    }

    /// Register `path` in the current window. Registration happens at call
    /// time; the returned future resolves once the window has been flushed.
    pub fn submit(
        &self,
        path: impl Into<String>,
        change: ChangeType,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let window_ms = self.inner.config.window_ms.max(1);

        // The window id is computed under the lock so a flush that already
        // removed window N can never see a late registration into N.
        let (window_id, is_new) = {
            let mut windows = self.inner.windows.lock();
            let window_id = self.inner.origin.elapsed().as_millis() as u64 / window_ms;
            let is_new = !windows.contains_key(&window_id);
            let window = windows.entry(window_id).or_default();
            window.changes.push((path.into(), change));
            window.waiters.push(tx);
            (window_id, is_new)
        };

        if is_new {
            let inner = Arc::clone(&self.inner);
            let deadline = inner.origin + Duration::from_millis((window_id + 1) * window_ms);
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                inner.flush_window(window_id).await;
            });
        }

        async move {
            rx.await
                .map_err(|_| CtxGraphError::Threading("batch window dropped".to_string()))?
        }
    }

    /// Queue `path` for chunked delivery. The single drainer takes up to the
    /// head item's `limit` paths per downstream call and sleeps
    /// `throttle_delay_ms` between calls.
    pub fn throttled_submit(
        &self,
        path: impl Into<String>,
        change: ChangeType,
        limit: usize,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let start_drainer = {
            let mut state = self.inner.throttle.lock();
            state.queue.push_back(QueuedChange {
                path: path.into(),
                change,
                limit: limit.max(1),
                done: tx,
            });
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drainer {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain_throttled().await });
        }

        async move {
            rx.await
                .map_err(|_| CtxGraphError::Threading("throttle queue dropped".to_string()))?
        }
    }

    /// Forward watcher events into `submit` until the channel closes.
    pub fn spawn_event_pump(&self, mut rx: mpsc::Receiver<FileChangeEvent>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let path = event.path.clone();
                let pending = coordinator.submit(event.path, event.change);
                tokio::spawn(async move {
                    if let Err(e) = pending.await {
                        warn!("Batched invalidation of {} failed: {}", path, e);
                    }
                });
            }
            debug!("Change event channel closed");
        })
    }
}

impl CoordinatorInner {
    async fn flush_window(&self, window_id: u64) {
        let Some(window) = self.windows.lock().remove(&window_id) else {
            return;
        };
        let request = InvalidationRequest::from_changes(window.changes);
        debug!(
            "Flushing window {} with {} paths",
            window_id,
            request.targets.len()
        );

        let result = self.sink.invalidate(request).await;
        notify(window.waiters, result);
    }

    async fn drain_throttled(&self) {
        let mut first = true;
        loop {
            if !first {
                tokio::time::sleep(self.config.throttle_delay()).await;
            }
            first = false;

            let chunk: Vec<QueuedChange> = {
                let mut state = self.throttle.lock();
                let Some(limit) = state.queue.front().map(|c| c.limit) else {
                    state.draining = false;
                    return;
                };
                let take = limit.min(state.queue.len());
                state.queue.drain(..take).collect()
            };

            let mut changes = Vec::with_capacity(chunk.len());
            let mut waiters = Vec::with_capacity(chunk.len());
            for queued in chunk {
                changes.push((queued.path, queued.change));
                waiters.push(queued.done);
            }

            let request = InvalidationRequest::from_changes(changes);
            debug!("Draining throttled chunk of {} paths", request.targets.len());
            let result = self.sink.invalidate(request).await;
            notify(waiters, result);
        }
    }
}

fn notify<T>(waiters: Vec<Waiter>, result: Result<T>) {
    match result {
        Ok(_) => {
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }
        Err(e) => {
            warn!("Downstream invalidation failed: {}", e);
            let message = e.to_string();
            for waiter in waiters {
                let _ = waiter.send(Err(CtxGraphError::Invalidation(message.clone())));
            }
        }
    }
}
