//! Queue id allocation policies.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a queue within a [`TaskGroup`](super::TaskGroup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(u32);

impl QueueId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id allocation strategy, fixed at group construction.
///
/// The recycling decision lives here, in one place, instead of a nullable
/// free-set checked at every call site.
#[derive(Debug)]
pub(super) enum IdAllocator {
    /// Ids increase monotonically and are never reused.
    Monotonic { next: u32 },

    /// Released ids return to a pool and are reused lowest-first before the
    /// counter grows.
    Recycling { next: u32, free: BTreeSet<u32> },
}

impl IdAllocator {
    pub(super) fn monotonic() -> Self {
        IdAllocator::Monotonic { next: 0 }
    }

    pub(super) fn recycling() -> Self {
        IdAllocator::Recycling {
            next: 0,
            free: BTreeSet::new(),
        }
    }

    /// Hand out the next id.
    pub(super) fn allocate(&mut self) -> QueueId {
        match self {
            IdAllocator::Monotonic { next } => {
                let id = *next;
                *next += 1;
                QueueId::new(id)
            }
            IdAllocator::Recycling { next, free } => {
                if let Some(id) = free.pop_first() {
                    QueueId::new(id)
                } else {
                    let id = *next;
                    *next += 1;
                    QueueId::new(id)
                }
            }
        }
    }

    /// Return an id that is no longer in use. No-op for the monotonic
    /// policy.
    pub(super) fn release(&mut self, id: QueueId) {
        match self {
            IdAllocator::Monotonic { .. } => {}
            IdAllocator::Recycling { next, free } => {
                // never recycle an id the counter has not issued
                if id.get() < *next {
                    free.insert(id.get());
                }
            }
        }
    }
}
