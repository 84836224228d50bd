//! Entries in a queue's pending FIFO.

use crate::signal::{CompletionSignal, CurrentTaskGuard};

/// A unit of work accepted by a queue.
pub(crate) type Payload = Box<dyn FnOnce() + Send + 'static>;

/// A payload paired with its completion signal.
pub(super) struct WorkItem {
    payload: Option<Payload>,
    signal: CompletionSignal,
}

impl WorkItem {
    pub(super) fn new(payload: Option<Payload>) -> Self {
        Self {
            payload,
            signal: CompletionSignal::new(),
        }
    }

    /// Another handle to this item's signal.
    pub(super) fn signal(&self) -> CompletionSignal {
        self.signal.clone()
    }

    /// Run the payload on the calling thread.
    ///
    /// The thread is recorded on the signal first so stop requests can reach
    /// it, and the signal is installed as the thread's current task for the
    /// duration. An absent payload is a no-op. Payload panics propagate to
    /// the caller.
    pub(super) fn execute(&mut self) {
        self.signal.record_executor();
        let _current = CurrentTaskGuard::install(&self.signal);
        if let Some(payload) = self.payload.take() {
            payload();
        }
    }

    /// Fire the completion signal.
    ///
    /// Consumes the item: each signal completes exactly once, whether or not
    /// `execute` ran or panicked.
    pub(super) fn finish(self) {
        self.signal.mark_completed();
    }
}

/// What the consumer pops off the pending FIFO.
pub(super) enum QueueItem {
    /// Ordinary enqueued work.
    Task(WorkItem),

    /// Graceful-close marker; its payload is the caller's close callback.
    CloseMarker(WorkItem),
}

impl QueueItem {
    pub(super) fn into_work(self) -> WorkItem {
        match self {
            QueueItem::Task(work) | QueueItem::CloseMarker(work) => work,
        }
    }
}
