//! One-shot completion signaling between queue consumers and waiters.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::Thread;
use std::time::{Duration, Instant};

/// Shared completion state, one per enqueued work item.
struct SignalState {
    /// Completion flag, guarded so waiters can park on the condvar.
    completed: Mutex<bool>,

    /// Woken when `completed` flips to true.
    done: Condvar,

    /// Set by `request_stop`; polled by cooperative task bodies.
    stop: AtomicBool,

    /// Thread currently executing the paired work, if any.
    ///
    /// Narrow lifetime: recorded just before the payload runs and cleared on
    /// completion, so a stop request never targets a thread that has moved on
    /// to unrelated work. `Thread` is a non-owning handle.
    executing: Mutex<Option<Thread>>,
}

/// One-shot completion future for a single enqueued work item.
///
/// Returned by the enqueue operations. Completes exactly once, after the
/// paired payload has returned or panicked, and stays completed. Clones share
/// the same underlying state, so the queue and any number of waiters can hold
/// one.
#[derive(Clone)]
pub struct CompletionSignal {
    state: Arc<SignalState>,
}

impl CompletionSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                completed: Mutex::new(false),
                done: Condvar::new(),
                stop: AtomicBool::new(false),
                executing: Mutex::new(None),
            }),
        }
    }

    /// Block until the paired work has finished.
    ///
    /// Returns immediately if it already has. The completion predicate is
    /// re-checked in a loop, so spurious condvar wakeups are harmless.
    pub fn wait(&self) {
        let mut completed = lock_ignore_poison(&self.state.completed);
        while !*completed {
            completed = self
                .state
                .done
                .wait(completed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    ///
    /// Returns `true` if the work completed within the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = lock_ignore_poison(&self.state.completed);
        while !*completed {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self
                .state
                .done
                .wait_timeout(completed, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            completed = guard;
        }
        true
    }

    /// Non-blocking completion check.
    pub fn is_completed(&self) -> bool {
        *lock_ignore_poison(&self.state.completed)
    }

    /// Best-effort stop request for the paired work.
    ///
    /// Sets the stop flag and unparks the thread currently recorded as
    /// executing the payload, if any; a no-op otherwise. Nothing is forcibly
    /// terminated: bodies observe the request through
    /// [`task_stop_requested`] or by waking from a `park`-based sleep, and
    /// are free to ignore it.
    pub fn request_stop(&self) {
        self.state.stop.store(true, Ordering::Release);
        if let Some(thread) = lock_ignore_poison(&self.state.executing).as_ref() {
            thread.unpark();
        }
    }

    /// True once [`request_stop`](Self::request_stop) has been called.
    pub fn stop_requested(&self) -> bool {
        self.state.stop.load(Ordering::Acquire)
    }

    /// Record the calling thread as the executor of the paired work.
    pub(crate) fn record_executor(&self) {
        *lock_ignore_poison(&self.state.executing) = Some(std::thread::current());
    }

    /// Clear the thread record, flip the flag, wake all waiters.
    ///
    /// Called exactly once per item by the owning queue.
    pub(crate) fn mark_completed(&self) {
        lock_ignore_poison(&self.state.executing).take();
        let mut completed = lock_ignore_poison(&self.state.completed);
        *completed = true;
        self.state.done.notify_all();
    }
}

thread_local! {
    /// Signal of the work item currently executing on this thread, if any.
    static CURRENT_TASK: RefCell<Option<Arc<SignalState>>> = RefCell::new(None);
}

/// True if the work item currently executing on this thread has received a
/// stop request.
///
/// The cooperative cancellation point for task bodies. Outside a queue
/// consumer this always returns false.
pub fn task_stop_requested() -> bool {
    CURRENT_TASK.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|state| state.stop.load(Ordering::Acquire))
            .unwrap_or(false)
    })
}

/// Installs a signal as the thread's current task for the guard's scope.
///
/// Restores the previous value on drop, panic included, so a panicking
/// payload cannot leave a stale signal behind.
pub(crate) struct CurrentTaskGuard {
    prev: Option<Arc<SignalState>>,
}

impl CurrentTaskGuard {
    pub(crate) fn install(signal: &CompletionSignal) -> Self {
        let prev =
            CURRENT_TASK.with(|current| current.borrow_mut().replace(Arc::clone(&signal.state)));
        Self { prev }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_TASK.with(|current| *current.borrow_mut() = prev);
    }
}

/// Completion state stays usable even if some holder panicked; these locks
/// only ever guard a bool or a thread handle.
pub(crate) fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
