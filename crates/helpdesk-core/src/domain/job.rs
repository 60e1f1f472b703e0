//! Job rows: pending outbox work and its dead-letter counterpart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{FailedJobId, JobId};

/// Hard ceiling on `attempts`, independent of any job's own budget.
pub const MAX_ATTEMPTS_CEILING: u32 = 30;

/// A row in the job store.
///
/// Only `attempts` and `reserved_until` ever change; both are updated by a
/// successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub payload: String,

    /// Number of times this row has been leased, including the current lease.
    pub attempts: u32,

    pub available_at: DateTime<Utc>,
    pub reserved_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly created row: never leased, immediately unreserved.
    pub fn new(
        name: impl Into<String>,
        payload: impl Into<String>,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            name: name.into(),
            payload: payload.into(),
            attempts: 0,
            available_at,
            reserved_until: now,
            created_at: now,
        }
    }

    /// Can a worker lease this row at `now`?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.available_at <= now && self.reserved_until <= now
    }

    /// Take a lease until `until`.
    pub fn reserve(&mut self, until: DateTime<Utc>) {
        self.attempts += 1;
        self.reserved_until = until;
    }
}

/// A row in the dead-letter store. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub id: FailedJobId,
    pub name: String,
    pub payload: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl FailedJobRecord {
    pub fn new(
        name: impl Into<String>,
        payload: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FailedJobId::generate(),
            name: name.into(),
            payload: payload.into(),
            reason: reason.into(),
            created_at: now,
        }
    }
}
