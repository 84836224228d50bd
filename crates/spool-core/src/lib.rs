//! spool-core
//!
//! Building blocks for in-process task execution.
//!
//! - **signal**: one-shot completion futures with best-effort stop requests
//! - **queue**: single-consumer FIFO queues with graceful and forced close
//! - **group**: id-addressed collections of queues with random dispatch
//! - **store**: durable, resumable task batches persisted via atomic saves
//! - **executor**: where a queue's consumer runs, a dedicated thread or a
//!   shared pool such as a tokio runtime

pub mod error;
pub mod executor;
pub mod group;
pub mod queue;
pub mod signal;
pub mod store;

pub use error::{GroupError, QueueError, StoreError};
pub use executor::{DedicatedThread, Executor};
pub use group::{GroupCloseWaiter, QueueId, TaskGroup, TaskGroupBuilder};
pub use queue::{QueueState, TaskQueue, TaskQueueBuilder};
pub use signal::{CompletionSignal, task_stop_requested};
pub use store::{DurableTaskList, RunOutcome, StorePath, StoredTask, TaskError};
