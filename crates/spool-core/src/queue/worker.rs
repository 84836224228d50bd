//! The queue consumer loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::item::QueueItem;
use super::state::QueueState;
use super::{PendingState, QueueShared};
use crate::signal::lock_ignore_poison;

/// Drive one queue until it closes.
///
/// Runs as the queue's single logical consumer, on whatever executor the
/// builder submitted it to.
pub(super) fn consume(shared: Arc<QueueShared>) {
    loop {
        let Some(item) = next_item(&shared) else {
            break;
        };
        match item {
            QueueItem::Task(mut work) => {
                if let Some(observer) = &shared.on_dispatch {
                    observer();
                }
                if catch_unwind(AssertUnwindSafe(|| work.execute())).is_err() {
                    // independent work must not stall on one failure
                    tracing::warn!(queue = %shared.name, "task panicked, continuing");
                }
                work.finish();
            }
            QueueItem::CloseMarker(mut marker) => {
                {
                    let mut pending = lock_ignore_poison(&shared.pending);
                    pending.state = QueueState::Closed;
                }
                // the marker's payload is the caller's close callback
                if catch_unwind(AssertUnwindSafe(|| marker.execute())).is_err() {
                    tracing::warn!(queue = %shared.name, "close callback panicked");
                }
                marker.finish();
                break;
            }
        }
    }
    terminate(&shared);
}

/// Pop the next item, blocking while the queue is open and empty.
///
/// Returns `None` once the state is closed. A poisoned lock observed here
/// means a producer died mid-append and the pending list can no longer be
/// trusted, so the queue is forced closed; [`terminate`] resolves whatever
/// remains.
fn next_item(shared: &QueueShared) -> Option<QueueItem> {
    let mut pending = match shared.pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => return force_closed(poisoned.into_inner()),
    };
    loop {
        if pending.state.is_closed() {
            return None;
        }
        if let Some(item) = pending.items.pop_front() {
            return Some(item);
        }
        pending = match shared.available.wait(pending) {
            Ok(guard) => guard,
            Err(poisoned) => return force_closed(poisoned.into_inner()),
        };
    }
}

fn force_closed(mut pending: std::sync::MutexGuard<'_, PendingState>) -> Option<QueueItem> {
    pending.state = QueueState::Closed;
    None
}

/// Drain whatever is left (signals fire, payloads do not run), then fire the
/// close callback once.
fn terminate(shared: &QueueShared) {
    let remainder = {
        let mut pending = lock_ignore_poison(&shared.pending);
        pending.state = QueueState::Closed;
        std::mem::take(&mut pending.items)
    };
    for item in remainder {
        item.into_work().finish();
    }
    if let Some(on_close) = lock_ignore_poison(&shared.on_close).take() {
        if catch_unwind(AssertUnwindSafe(on_close)).is_err() {
            tracing::warn!(queue = %shared.name, "queue close callback panicked");
        }
    }
    tracing::debug!(queue = %shared.name, "queue closed");
}
