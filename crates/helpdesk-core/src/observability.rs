use serde::{Deserialize, Serialize};

/// Snapshot of the job tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Rows nobody holds a lease on (eligible now or delayed).
    pub pending: usize,

    /// Rows under an unexpired lease.
    pub reserved: usize,

    /// Dead-letter rows.
    pub failed: usize,
}
