//! Single-consumer FIFO work queue.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::metrics;

use super::types::{QueueError, SerialStatus};

struct SerialState<T> {
    backlog: VecDeque<T>,
    busy: bool,
    closed: bool,
    processed: u64,
    discarded: u64,
}

struct Shared<T> {
    depth: usize,
    state: Mutex<SerialState<T>>,
    /// Wakes the worker when an item is pushed or the queue closes.
    work: Notify,
    /// Wakes pushers and drainers whenever the backlog or busy flag changes.
    changed: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, SerialState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, reason: &str) {
        {
            let mut state = self.lock();
            if !state.closed {
                let dropped = state.backlog.len();
                state.closed = true;
                state.discarded += dropped as u64;
                state.backlog.clear();
                metrics::SERIAL_ITEMS
                    .with_label_values(&["discarded"])
                    .inc_by(dropped as u64);
                debug!(dropped, reason, "Serial queue closed");
            }
        }
        self.work.notify_one();
        self.changed.notify_waiters();
    }
}

/// Runs one item at a time, strictly in push order.
///
/// The handler returns [`ControlFlow::Break`] to stop the queue: remaining
/// items are discarded and further pushes are refused. Dropping the queue
/// closes it; a handler that is already running is never interrupted.
pub struct SerialWorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> SerialWorkQueue<T> {
    /// Creates the queue and spawns its worker on the current runtime.
    ///
    /// `depth` bounds the backlog; pushes beyond it wait for room.
    pub fn new<F, Fut>(depth: usize, handler: F) -> Result<Self, QueueError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let depth = QueueError::check("serial queue depth", depth)?;
        let shared = Arc::new(Shared {
            depth,
            state: Mutex::new(SerialState {
                backlog: VecDeque::new(),
                busy: false,
                closed: false,
                processed: 0,
                discarded: 0,
            }),
            work: Notify::new(),
            changed: Notify::new(),
        });

        tokio::spawn(run_worker(Arc::clone(&shared), handler));
        Ok(Self { shared })
    }

    /// Appends an item once the backlog is below the depth limit.
    ///
    /// Returns `false` without appending if the queue is or becomes closed.
    pub async fn push(&self, item: T) -> bool {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.closed {
                    return false;
                }
                if state.backlog.len() < self.shared.depth {
                    state.backlog.push_back(item);
                    drop(state);
                    self.shared.work.notify_one();
                    return true;
                }
            }

            changed.await;
        }
    }

    /// Waits until the backlog is empty and no handler is running, or the
    /// queue is closed.
    pub async fn drain(&self) {
        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let state = self.shared.lock();
                if state.closed || (state.backlog.is_empty() && !state.busy) {
                    return;
                }
            }

            changed.await;
        }
    }

    /// Stops intake and discards the backlog.
    pub fn close(&self) {
        self.shared.close("closed by owner");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of items waiting to run.
    pub fn len(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().backlog.is_empty()
    }

    pub fn status(&self) -> SerialStatus {
        let state = self.shared.lock();
        SerialStatus {
            pending: state.backlog.len(),
            busy: state.busy,
            closed: state.closed,
            processed: state.processed,
            discarded: state.discarded,
        }
    }
}

impl<T> Drop for SerialWorkQueue<T> {
    fn drop(&mut self) {
        self.shared.close("queue dropped");
    }
}

async fn run_worker<T, F, Fut>(shared: Arc<Shared<T>>, handler: F)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    loop {
        let next = {
            let mut state = shared.lock();
            if state.closed {
                state.busy = false;
                break;
            }
            let next = state.backlog.pop_front();
            state.busy = next.is_some();
            next
        };
        shared.changed.notify_waiters();

        let Some(item) = next else {
            shared.work.notified().await;
            continue;
        };

        let flow = handler(item).await;

        let mut state = shared.lock();
        state.processed += 1;
        if flow.is_break() {
            metrics::SERIAL_ITEMS.with_label_values(&["stopped"]).inc();
            warn!(
                remaining = state.backlog.len(),
                "Serial handler requested stop, discarding backlog"
            );
            drop(state);
            shared.close("handler stopped");
        } else {
            metrics::SERIAL_ITEMS.with_label_values(&["processed"]).inc();
        }
    }

    shared.changed.notify_waiters();
    debug!("Serial worker exited");
}
