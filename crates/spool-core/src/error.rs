use thiserror::Error;

use crate::group::QueueId;

/// Errors from [`TaskQueue`](crate::queue::TaskQueue) operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// Errors from [`TaskGroup`](crate::group::TaskGroup) operations.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("no queue registered under id={0}")]
    InvalidId(QueueId),

    #[error("no active queues to dispatch to")]
    NoActiveQueues,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from the durable task list and its file format.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic bytes: not a task list file")]
    InvalidMagic,

    #[error("unsupported task list version: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("task list file truncated")]
    Truncated,

    #[error("descriptor encode failed: {0}")]
    Encode(String),

    #[error("descriptor decode failed: {0}")]
    Decode(String),
}
