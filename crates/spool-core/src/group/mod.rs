//! Id-addressed collections of task queues.

mod alloc;

pub use alloc::QueueId;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;

use crate::error::GroupError;
use crate::executor::{DedicatedThread, Executor};
use crate::queue::TaskQueue;
use crate::signal::{CompletionSignal, lock_ignore_poison};
use alloc::IdAllocator;

/// Registry state under the group lock.
struct GroupState {
    queues: HashMap<QueueId, TaskQueue>,
    alloc: IdAllocator,
}

struct GroupShared {
    state: Mutex<GroupState>,

    /// Installed as the dispatch observer on every queue the group spawns.
    on_dispatch: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Installed as the close callback on every queue the group spawns.
    on_close: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// A set of [`TaskQueue`]s addressed by small integer ids.
///
/// Queues join via [`add_queue`](Self::add_queue) (and friends) and get an
/// id from the group's allocation policy. Work is dispatched to a chosen id
/// or to a uniformly random active member. Closing a member through the
/// group releases its id once the drain completes; with
/// [`recycle_ids`](TaskGroupBuilder::recycle_ids) enabled, released ids are
/// reused lowest-first.
///
/// Cloning yields another handle to the same group.
#[derive(Clone)]
pub struct TaskGroup {
    shared: Arc<GroupShared>,
}

impl TaskGroup {
    /// Start configuring a group.
    pub fn builder() -> TaskGroupBuilder {
        TaskGroupBuilder::new()
    }

    /// Group with monotonic ids and no callbacks.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Spawn a dedicated-thread queue and register it.
    pub fn add_queue(&self) -> QueueId {
        self.add_queue_on(&DedicatedThread)
    }

    /// Spawn a queue whose consumer runs on `executor`, and register it.
    pub fn add_queue_on(&self, executor: &dyn Executor) -> QueueId {
        // allocate first so the queue can carry its id in the name
        let id = self.lock_state().alloc.allocate();

        let mut builder = TaskQueue::builder().name(format!("queue-{id}"));
        if let Some(observer) = &self.shared.on_dispatch {
            let observer = Arc::clone(observer);
            builder = builder.on_dispatch(move || observer());
        }
        if let Some(on_close) = &self.shared.on_close {
            let on_close = Arc::clone(on_close);
            builder = builder.on_close(move || on_close());
        }
        let queue = builder.build_on(executor);

        self.lock_state().queues.insert(id, queue);
        tracing::debug!(queue_id = %id, "queue added");
        id
    }

    /// Register an externally built queue. Its callbacks stay as built; the
    /// group only tracks it and allocates the id.
    pub fn adopt_queue(&self, queue: TaskQueue) -> QueueId {
        let id = {
            let mut state = self.lock_state();
            let id = state.alloc.allocate();
            state.queues.insert(id, queue);
            id
        };
        tracing::debug!(queue_id = %id, "queue adopted");
        id
    }

    /// Handle to an active member.
    pub fn get_queue(&self, id: QueueId) -> Result<TaskQueue, GroupError> {
        self.lock_state()
            .queues
            .get(&id)
            .cloned()
            .ok_or(GroupError::InvalidId(id))
    }

    /// Enqueue onto the member with `id`.
    ///
    /// Propagates [`QueueError::Closed`](crate::error::QueueError::Closed)
    /// from the member, e.g. for a force-closed queue that still holds its
    /// id.
    pub fn enqueue_to<F>(&self, id: QueueId, work: F) -> Result<CompletionSignal, GroupError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.get_queue(id)?;
        Ok(queue.enqueue(work)?)
    }

    /// Enqueue onto a uniformly random active member.
    ///
    /// Fails with [`GroupError::NoActiveQueues`] when the group is empty.
    pub fn enqueue<F>(&self, work: F) -> Result<CompletionSignal, GroupError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = {
            let state = self.lock_state();
            if state.queues.is_empty() {
                return Err(GroupError::NoActiveQueues);
            }
            let pick = rand::thread_rng().gen_range(0..state.queues.len());
            state
                .queues
                .values()
                .nth(pick)
                .cloned()
                .ok_or(GroupError::NoActiveQueues)?
        };
        Ok(queue.enqueue(work)?)
    }

    /// Gracefully close the member with `id`.
    ///
    /// Returns the close marker's signal, or `Ok(None)` when that queue is
    /// already closing or closed. The id is released when the marker
    /// executes, not at the time of this call, so waiting on the signal
    /// guarantees the registry no longer holds it.
    pub fn close_queue(&self, id: QueueId) -> Result<Option<CompletionSignal>, GroupError> {
        self.close_queue_inner(id, None)
    }

    /// Like [`close_queue`](Self::close_queue), additionally running
    /// `on_closed` once the drain completes.
    pub fn close_queue_with<F>(
        &self,
        id: QueueId,
        on_closed: F,
    ) -> Result<Option<CompletionSignal>, GroupError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.close_queue_inner(id, Some(Box::new(on_closed)))
    }

    fn close_queue_inner(
        &self,
        id: QueueId,
        on_closed: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Option<CompletionSignal>, GroupError> {
        let queue = self.get_queue(id)?;
        let shared = Arc::clone(&self.shared);
        let signal = queue.request_close_with(move || {
            release_member(&shared, id);
            if let Some(callback) = on_closed {
                callback();
            }
        });
        Ok(signal)
    }

    /// Gracefully close every active member.
    ///
    /// Members already closing are skipped. The returned waiter completes
    /// once every issued close has drained.
    pub fn close_all(&self) -> GroupCloseWaiter {
        self.close_all_inner(None)
    }

    /// Like [`close_all`](Self::close_all); `on_closed` runs once per
    /// member as its drain completes.
    pub fn close_all_with<F>(&self, on_closed: F) -> GroupCloseWaiter
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_all_inner(Some(Arc::new(on_closed)))
    }

    fn close_all_inner(&self, on_closed: Option<Arc<dyn Fn() + Send + Sync>>) -> GroupCloseWaiter {
        let ids: Vec<QueueId> = self.lock_state().queues.keys().copied().collect();
        let mut signals = Vec::with_capacity(ids.len());
        for id in ids {
            let per_queue = on_closed.clone().map(|callback| -> Box<dyn FnOnce() + Send> {
                Box::new(move || callback())
            });
            // a member that vanished or was already closing is simply skipped
            if let Ok(Some(signal)) = self.close_queue_inner(id, per_queue) {
                signals.push(signal);
            }
        }
        GroupCloseWaiter { signals }
    }

    /// Close every member and block until all drains finish.
    pub fn shutdown(&self) {
        self.close_all().wait();
    }

    /// Any member with pending items?
    pub fn has_pending(&self) -> bool {
        self.lock_state().queues.values().any(TaskQueue::has_pending)
    }

    /// Any member already closed but still registered? Queues closed
    /// directly (or force-closed) never execute the group's release hook, so
    /// they linger here until closed through the group.
    pub fn has_closed_member(&self) -> bool {
        self.lock_state().queues.values().any(TaskQueue::is_closed)
    }

    /// Pending-work check for a single member.
    pub fn queue_has_pending(&self, id: QueueId) -> Result<bool, GroupError> {
        Ok(self.get_queue(id)?.has_pending())
    }

    /// Closed check for a single member.
    pub fn queue_is_closed(&self, id: QueueId) -> Result<bool, GroupError> {
        Ok(self.get_queue(id)?.is_closed())
    }

    /// Ids of the currently registered members, ascending.
    pub fn active_ids(&self) -> Vec<QueueId> {
        let mut ids: Vec<QueueId> = self.lock_state().queues.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        lock_ignore_poison(&self.shared.state)
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `id` from the registry and hand it back to the allocator.
///
/// Runs on the closing queue's consumer, as part of the close marker.
fn release_member(shared: &GroupShared, id: QueueId) {
    let mut state = lock_ignore_poison(&shared.state);
    if state.queues.remove(&id).is_some() {
        state.alloc.release(id);
        tracing::debug!(queue_id = %id, "queue closed, id released");
    }
}

/// Waiter aggregating the close signals issued by
/// [`TaskGroup::close_all`].
pub struct GroupCloseWaiter {
    signals: Vec<CompletionSignal>,
}

impl GroupCloseWaiter {
    /// Block until every issued close has drained. Order is unspecified;
    /// all must complete.
    pub fn wait(&self) {
        for signal in &self.signals {
            signal.wait();
        }
    }

    /// True once every issued close has drained.
    pub fn is_completed(&self) -> bool {
        self.signals.iter().all(CompletionSignal::is_completed)
    }

    /// Number of closes issued.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Builder for [`TaskGroup`].
pub struct TaskGroupBuilder {
    recycle_ids: bool,
    on_dispatch: Option<Arc<dyn Fn() + Send + Sync>>,
    on_close: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl TaskGroupBuilder {
    fn new() -> Self {
        Self {
            recycle_ids: false,
            on_dispatch: None,
            on_close: None,
        }
    }

    /// Reuse the ids of closed queues (lowest released id first) instead of
    /// growing the counter forever.
    pub fn recycle_ids(mut self) -> Self {
        self.recycle_ids = true;
        self
    }

    /// Observer installed on every queue this group spawns; runs on that
    /// queue's consumer before each executed item.
    pub fn on_dispatch<F>(mut self, observer: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_dispatch = Some(Arc::new(observer));
        self
    }

    /// Close callback installed on every queue this group spawns; runs once
    /// per queue when its consumer terminates.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> TaskGroup {
        let alloc = if self.recycle_ids {
            IdAllocator::recycling()
        } else {
            IdAllocator::monotonic()
        };
        TaskGroup {
            shared: Arc::new(GroupShared {
                state: Mutex::new(GroupState {
                    queues: HashMap::new(),
                    alloc,
                }),
                on_dispatch: self.on_dispatch,
                on_close: self.on_close,
            }),
        }
    }
}
