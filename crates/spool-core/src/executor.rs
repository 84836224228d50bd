//! Where queue consumer loops run.

use tokio::runtime::Handle;

/// Capability to run a closure somewhere.
///
/// A [`TaskQueue`](crate::queue::TaskQueue) submits its consumer loop here
/// exactly once at build time; the loop occupies its slot until the queue
/// closes. Implementations only decide *where* that happens, so queue logic
/// is identical on a dedicated thread and on a shared pool.
pub trait Executor {
    /// Run `work`, without waiting for it.
    fn execute(&self, work: Box<dyn FnOnce() + Send + 'static>);
}

/// Spawns one fresh thread per submission.
///
/// The default execution context: each queue built without an explicit
/// executor gets its own consumer thread.
pub struct DedicatedThread;

impl Executor for DedicatedThread {
    fn execute(&self, work: Box<dyn FnOnce() + Send + 'static>) {
        std::thread::spawn(work);
    }
}

/// Runs submissions on the tokio blocking pool.
///
/// The shared-pool context. Each open queue holds one blocking-pool slot;
/// close queues before shutting the runtime down, or runtime shutdown will
/// wait on their still-running consumer loops.
impl Executor for Handle {
    fn execute(&self, work: Box<dyn FnOnce() + Send + 'static>) {
        self.spawn_blocking(work);
    }
}
