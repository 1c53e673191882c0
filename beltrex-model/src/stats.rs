use serde::{Deserialize, Serialize};

/// Counters exposed by every bounded-queue worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub queued: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Items currently sitting in the queue.
    pub depth: u64,
}
