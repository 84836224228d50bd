//! Single-consumer FIFO task queues with graceful and forced close.

mod item;
mod state;
mod worker;

pub use state::QueueState;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::QueueError;
use crate::executor::{DedicatedThread, Executor};
use crate::signal::{CompletionSignal, lock_ignore_poison};
use item::{Payload, QueueItem, WorkItem};

/// Pending work and lifecycle flag; mutated only under the queue lock.
struct PendingState {
    state: QueueState,
    items: VecDeque<QueueItem>,
}

/// Everything producers and the consumer share.
struct QueueShared {
    pending: Mutex<PendingState>,

    /// Woken when an item is appended or the state changes.
    available: Condvar,

    /// Run on the consumer immediately before each executed item.
    on_dispatch: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Run once by the consumer at termination; taken to release captures.
    on_close: Mutex<Option<Payload>>,

    /// Queue name used in log events.
    name: String,
}

/// Ordered, single-consumer task queue.
///
/// Work enqueued here executes strictly in FIFO order on one logical
/// consumer: a dedicated thread, or a single submission to a shared
/// [`Executor`]. Producers get a [`CompletionSignal`] back immediately and
/// never block on execution; execution happens outside the queue lock, so a
/// long task never blocks further enqueues.
///
/// Cloning yields another handle to the same queue. Dropping handles does
/// not close the queue; close it explicitly, or its consumer waits forever.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

impl TaskQueue {
    /// Start configuring a queue.
    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::new()
    }

    /// Enqueue a unit of work.
    ///
    /// Fails with [`QueueError::Closed`] unless the queue is open. On
    /// success the item's signal is returned without waiting for execution.
    pub fn enqueue<F>(&self, work: F) -> Result<CompletionSignal, QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        let signal = {
            let mut pending = lock_ignore_poison(&self.shared.pending);
            if !pending.state.is_open() {
                return Err(QueueError::Closed);
            }
            let item = WorkItem::new(Some(Box::new(work)));
            let signal = item.signal();
            pending.items.push_back(QueueItem::Task(item));
            signal
        };
        // wake the consumer outside the lock
        self.shared.available.notify_one();
        Ok(signal)
    }

    /// Ask the queue to close after draining already-pending work.
    ///
    /// Appends a close marker behind the pending items and moves the state
    /// to [`QueueState::Closing`], so no further work is accepted. The state
    /// becomes [`QueueState::Closed`] when the marker executes. Returns the
    /// marker's signal (wait on it for the full drain), or `None` when the
    /// queue is already closing or closed.
    pub fn request_close(&self) -> Option<CompletionSignal> {
        self.close_with(None)
    }

    /// Like [`request_close`](Self::request_close), additionally running
    /// `on_closed` as the marker's payload, right after the state flips to
    /// closed.
    pub fn request_close_with<F>(&self, on_closed: F) -> Option<CompletionSignal>
    where
        F: FnOnce() + Send + 'static,
    {
        self.close_with(Some(Box::new(on_closed)))
    }

    fn close_with(&self, on_closed: Option<Payload>) -> Option<CompletionSignal> {
        let signal = {
            let mut pending = lock_ignore_poison(&self.shared.pending);
            if !pending.state.is_open() {
                return None;
            }
            pending.state = QueueState::Closing;
            let marker = WorkItem::new(on_closed);
            let signal = marker.signal();
            pending.items.push_back(QueueItem::CloseMarker(marker));
            signal
        };
        tracing::debug!(queue = %self.shared.name, "close requested");
        self.shared.available.notify_one();
        Some(signal)
    }

    /// Close immediately, abandoning pending work.
    ///
    /// Every still-pending item (close markers included) has its signal
    /// fired without its payload running; the consumer performs that drain
    /// and the close callback on its way out. Idempotent once closed.
    pub fn force_close(&self) {
        {
            let mut pending = lock_ignore_poison(&self.shared.pending);
            if pending.state.is_closed() {
                return;
            }
            pending.state = QueueState::Closed;
        }
        tracing::debug!(queue = %self.shared.name, "force close");
        self.shared.available.notify_all();
    }

    /// Any items pending? Lock-protected snapshot.
    pub fn has_pending(&self) -> bool {
        !lock_ignore_poison(&self.shared.pending).items.is_empty()
    }

    /// Fully closed? A queue that is still draining reports false.
    pub fn is_closed(&self) -> bool {
        lock_ignore_poison(&self.shared.pending).state.is_closed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueueState {
        lock_ignore_poison(&self.shared.pending).state
    }

    /// Queue name, as configured on the builder.
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Builder for [`TaskQueue`].
///
/// Callbacks and the name are fixed before the consumer starts, so the
/// running loop never re-checks configuration.
pub struct TaskQueueBuilder {
    name: Option<String>,
    on_dispatch: Option<Arc<dyn Fn() + Send + Sync>>,
    on_close: Option<Payload>,
}

impl TaskQueueBuilder {
    fn new() -> Self {
        Self {
            name: None,
            on_dispatch: None,
            on_close: None,
        }
    }

    /// Queue name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Observer invoked on the consumer thread right before each executed
    /// item. Close markers and force-aborted items do not trigger it.
    pub fn on_dispatch<F>(mut self, observer: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_dispatch = Some(Arc::new(observer));
        self
    }

    /// Callback invoked exactly once when the consumer terminates, after the
    /// remainder drain. Graceful and forced close both end up here.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }

    /// Build the queue, running its consumer on a freshly spawned thread.
    pub fn build(self) -> TaskQueue {
        self.build_on(&DedicatedThread)
    }

    /// Build the queue, running its consumer on `executor`.
    ///
    /// The consumer occupies one slot of the executor until the queue
    /// closes.
    pub fn build_on(self, executor: &dyn Executor) -> TaskQueue {
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(PendingState {
                state: QueueState::Open,
                items: VecDeque::new(),
            }),
            available: Condvar::new(),
            on_dispatch: self.on_dispatch,
            on_close: Mutex::new(self.on_close),
            name: self.name.unwrap_or_else(|| "task-queue".to_string()),
        });
        let consumer_shared = Arc::clone(&shared);
        executor.execute(Box::new(move || worker::consume(consumer_shared)));
        TaskQueue { shared }
    }
}
