//! Bounded-concurrency queue that emits results in submission order.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::metrics;

use super::types::{panic_message, OrderedStatus, QueueError, TaskFailure, TaskResult};

type Handler<T, R, E> = Box<dyn Fn(T) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;
type Sink<R, E> = Box<dyn Fn(u64, TaskResult<R, E>) -> BoxFuture<'static, ()> + Send + Sync>;

struct OrderedState<T, R, E> {
    /// Accepted items not yet launched, in sequence order.
    backlog: VecDeque<(u64, T)>,
    /// Reorder buffer: completed results waiting for their turn.
    pending: BTreeMap<u64, TaskResult<R, E>>,
    next_seq: u64,
    next_emit: u64,
    /// Launched and not yet emitted. A slot is freed only after the sink
    /// returns for that item.
    in_flight: usize,
    /// Bumped by `clear`; completions from an older generation are dropped.
    generation: u64,
    /// Set while one task owns emission.
    emitting: bool,
    closed: bool,
    emitted: u64,
}

struct Inner<T, R, E> {
    limit: usize,
    handler: Handler<T, R, E>,
    sink: Sink<R, E>,
    state: Mutex<OrderedState<T, R, E>>,
    changed: Notify,
}

/// Runs up to `limit` handlers concurrently and hands their results to the
/// sink strictly in submission order.
///
/// Each pushed item gets the next sequence number. Results that finish early
/// are parked until every smaller sequence number has been emitted. Handler
/// errors and panics are delivered in order as [`TaskFailure`] values.
pub struct OrderedParallelQueue<T, R, E> {
    inner: Arc<Inner<T, R, E>>,
}

impl<T, R, E> OrderedParallelQueue<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Creates a queue with the given concurrency limit.
    pub fn new<F, Fut, S, SFut>(limit: usize, handler: F, sink: S) -> Result<Self, QueueError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        S: Fn(u64, TaskResult<R, E>) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = ()> + Send + 'static,
    {
        let limit = QueueError::check("ordered queue limit", limit)?;
        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                handler: Box::new(move |item| handler(item).boxed()),
                sink: Box::new(move |seq, result| sink(seq, result).boxed()),
                state: Mutex::new(OrderedState {
                    backlog: VecDeque::new(),
                    pending: BTreeMap::new(),
                    next_seq: 0,
                    next_emit: 0,
                    in_flight: 0,
                    generation: 0,
                    emitting: false,
                    closed: false,
                    emitted: 0,
                }),
                changed: Notify::new(),
            }),
        })
    }

    /// Submits an item, waiting while the in-flight count is at the limit.
    ///
    /// The sequence number is assigned when the item is accepted, so a push
    /// that returns `false` never leaves a gap in the emission order.
    pub async fn push(&self, item: T) -> bool {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.closed {
                    return false;
                }
                if state.in_flight < self.inner.limit {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.backlog.push_back((seq, item));
                    Inner::dispatch(&self.inner, &mut state);
                    return true;
                }
            }

            changed.await;
        }
    }

    /// Waits until every accepted item has been emitted, or the queue closed.
    pub async fn drain(&self) {
        loop {
            let changed = self.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let state = self.inner.lock();
                let idle = state.backlog.is_empty() && state.in_flight == 0 && !state.emitting;
                if idle || state.closed {
                    return;
                }
            }

            changed.await;
        }
    }

    /// Discards queued items, parked results and in-flight bookkeeping.
    ///
    /// Handlers that are still running finish, but their results are never
    /// emitted. Sequence numbers keep increasing after a clear.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Refuses further pushes and clears the queue.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn status(&self) -> OrderedStatus {
        let state = self.inner.lock();
        OrderedStatus {
            limit: self.inner.limit,
            in_flight: state.in_flight,
            queued: state.backlog.len(),
            buffered: state.pending.len(),
            emitted: state.emitted,
            closed: state.closed,
        }
    }
}

impl<T, R, E> Inner<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, OrderedState<T, R, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches backlog items while there is room.
    fn dispatch(this: &Arc<Self>, state: &mut OrderedState<T, R, E>) {
        while !state.closed && state.in_flight < this.limit {
            let Some((seq, item)) = state.backlog.pop_front() else {
                break;
            };
            state.in_flight += 1;
            let generation = state.generation;
            let inner = Arc::clone(this);

            debug!(seq, in_flight = state.in_flight, "Dispatching ordered task");
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(async { (inner.handler)(item).await })
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskFailure::Failed(e)),
                    Err(payload) => {
                        let message = panic_message(payload);
                        warn!(seq, %message, "Ordered handler panicked");
                        Err(TaskFailure::Panicked(message))
                    }
                };
                inner.complete(seq, generation, result).await;
            });
        }
    }

    /// Parks a finished result and emits whatever is now in order.
    async fn complete(self: &Arc<Self>, seq: u64, generation: u64, result: TaskResult<R, E>) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                debug!(seq, "Dropping result from cleared generation");
                metrics::ORDERED_RESULTS
                    .with_label_values(&["suppressed"])
                    .inc();
                return;
            }
            state.pending.insert(seq, result);
            if state.emitting {
                // The current emitter will pick this result up.
                return;
            }
            state.emitting = true;
        }
        self.emit_ready().await;
    }

    /// Emits consecutive results starting at `next_emit` until a gap is hit.
    ///
    /// Only the task that set `emitting` runs this loop, so sink calls never
    /// overlap.
    async fn emit_ready(self: &Arc<Self>) {
        loop {
            let (seq, result) = {
                let mut state = self.lock();
                let next = state.next_emit;
                match state.pending.remove(&next) {
                    Some(result) => (next, result),
                    None => {
                        state.emitting = false;
                        drop(state);
                        self.changed.notify_waiters();
                        return;
                    }
                }
            };

            let outcome = match &result {
                Ok(_) => "ok",
                Err(failure) => failure.label(),
            };
            metrics::ORDERED_RESULTS.with_label_values(&[outcome]).inc();

            if let Err(payload) = AssertUnwindSafe(async { (self.sink)(seq, result).await })
                .catch_unwind()
                .await
            {
                error!(seq, message = %panic_message(payload), "Ordered sink panicked");
            }

            {
                let mut state = self.lock();
                // A clear during the sink call has already moved `next_emit` past `seq`.
                if state.next_emit == seq {
                    state.next_emit += 1;
                    state.in_flight -= 1;
                    state.emitted += 1;
                    Self::dispatch(self, &mut state);
                }
            }
            self.changed.notify_waiters();
        }
    }

    fn clear(&self) {
        {
            let mut state = self.lock();
            let dropped = state.backlog.len() + state.pending.len();
            state.backlog.clear();
            state.pending.clear();
            state.generation += 1;
            state.in_flight = 0;
            state.next_emit = state.next_seq;
            debug!(
                dropped,
                generation = state.generation,
                "Ordered queue cleared"
            );
        }
        self.changed.notify_waiters();
    }
}

/// Runs `handler` over `items` with at most `limit` in flight and returns the
/// results in input order.
pub async fn ordered_map<T, R, E, F, Fut>(
    items: impl IntoIterator<Item = T>,
    limit: usize,
    handler: F,
) -> Result<Vec<TaskResult<R, E>>, QueueError>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let collected = Arc::new(Mutex::new(Vec::new()));
    let queue = {
        let collected = Arc::clone(&collected);
        OrderedParallelQueue::new(limit, handler, move |_seq, result| {
            collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(result);
            futures::future::ready(())
        })?
    };

    for item in items {
        queue.push(item).await;
    }
    queue.drain().await;

    let results = std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(results)
}
