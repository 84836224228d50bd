//! Contract for tasks that survive a restart.

use std::error::Error;

use crate::error::StoreError;

/// Error type returned by a stored task's execution.
pub type TaskError = Box<dyn Error + Send + Sync>;

/// A task that can be written to disk and executed later.
///
/// Implementations describe the work declaratively rather than capturing
/// closures, so a list of them can be encoded, recovered after a restart,
/// and resumed from where it left off.
pub trait StoredTask: Clone + Send {
    /// Identity used for duplicate detection and targeted removal.
    type Id: PartialEq;

    /// Returns the identity of this task.
    fn id(&self) -> Self::Id;

    /// Performs the work this task describes.
    fn run(&self) -> Result<(), TaskError>;

    /// Encodes the task for persistence.
    fn encode(&self) -> Result<Vec<u8>, StoreError>;

    /// Decodes a task previously produced by [`encode`](Self::encode).
    fn decode(bytes: &[u8]) -> Result<Self, StoreError>;
}
