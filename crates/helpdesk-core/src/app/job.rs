use std::time::Duration;

use async_trait::async_trait;

use crate::domain::JobError;

pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// A named unit of outbox work.
///
/// A row may be handled more than once (expired lease, crash before delete),
/// so `handle` must tolerate repeats.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, payload: &str) -> Result<(), JobError>;

    /// Hard deadline for one `handle` call. Exceeding it counts as a failed
    /// attempt.
    fn execution_timeout(&self) -> Duration {
        DEFAULT_EXECUTION_TIMEOUT
    }

    /// Attempts after which a failing row is dead-lettered.
    fn max_attempts(&self) -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }
}
