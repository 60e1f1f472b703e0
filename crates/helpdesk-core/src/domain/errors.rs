//! Errors, one enum per concern.
//!
//! Classification used by the engine:
//! - control flow: `StoreError::NoJobs`, `PoolError::NoAvailableManagers`
//! - handler failures: `JobError` (turned into retry / dead-letter decisions)
//! - infrastructure: `StoreError::Backend` and friends (fatal to a worker)

use std::time::Duration;

use thiserror::Error;

/// Errors raised by storage ports (job store, repositories, transactor).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No job is eligible for reservation right now.
    #[error("no jobs found")]
    NoJobs,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors raised by the manager pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no available managers")]
    NoAvailableManagers,

    #[error("manager pool operation cancelled")]
    Cancelled,
}

/// Errors returned from `Job::handle`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("execution timeout of {0:?} exceeded")]
    Timeout(Duration),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] EventStreamError),

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by the event stream port.
#[derive(Debug, Clone, Error)]
pub enum EventStreamError {
    #[error("event stream closed")]
    Closed,

    #[error("publish failed: {0}")]
    Publish(String),
}

/// Errors raised by the outbox engine itself.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("job already registered: {0}")]
    DuplicateJob(String),

    #[error("invalid outbox options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Errors raised by the manager load service.
#[derive(Debug, Error)]
pub enum ManagerLoadError {
    #[error("invalid manager load options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised when a manager reports being free.
#[derive(Debug, Error)]
pub enum FreeHandsError {
    #[error("manager overloaded: manager cannot take more problems")]
    ManagerOverloaded,

    #[error("manager load service call: {0}")]
    Load(#[from] ManagerLoadError),

    #[error("put manager in the pool: {0}")]
    Pool(#[from] PoolError),
}

/// Errors raised by the manager scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler options: {0}")]
    InvalidOptions(String),

    #[error("get manager from pool: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
