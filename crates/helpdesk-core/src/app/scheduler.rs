//! ManagerScheduler - binds pooled managers to problems awaiting one.
//!
//! # Tick
//! 1. `lim = pool.size()`, zero skips the tick
//! 2. up to `lim` oldest problems without a manager
//! 3. per problem: take a manager, then in one transaction bind it, write the
//!    client service message and enqueue the notification job
//! 4. a failed transaction puts the manager back (not transactional)
//!
//! The FIFO pool and oldest-first problems pair the Nth-longest-waiting
//! manager with the Nth-longest-waiting problem.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::domain::{PoolError, Problem, SchedulerError, StoreError, UserId};
use crate::ports::{
    Clock, JobEnqueuer, ManagerPool, MessageRepository, ProblemRepository, SystemClock,
    Transactor, tx_fn,
};

use super::jobs::manager_assigned;
use super::jobs::payload::simple_id;

pub const MIN_PERIOD: Duration = Duration::from_millis(100);
pub const MAX_PERIOD: Duration = Duration::from_secs(60);

pub struct ManagerScheduler {
    period: Duration,
    pool: Arc<dyn ManagerPool>,
    problems: Arc<dyn ProblemRepository>,
    messages: Arc<dyn MessageRepository>,
    outbox: Arc<dyn JobEnqueuer>,
    txtor: Arc<dyn Transactor>,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl ManagerScheduler {
    pub fn new(
        period: Duration,
        pool: Arc<dyn ManagerPool>,
        problems: Arc<dyn ProblemRepository>,
        messages: Arc<dyn MessageRepository>,
        outbox: Arc<dyn JobEnqueuer>,
        txtor: Arc<dyn Transactor>,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_PERIOD..=MAX_PERIOD).contains(&period) {
            return Err(SchedulerError::InvalidOptions(format!(
                "period must be in {MIN_PERIOD:?}..={MAX_PERIOD:?}, got {period:?}"
            )));
        }
        Ok(Self {
            period,
            pool,
            problems,
            messages,
            outbox,
            txtor,
            clock: Arc::new(SystemClock),
            span: tracing::info_span!("manager_scheduler"),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Tick every `period` until `cancel` fires.
    ///
    /// An empty pool mid-tick only ends that tick; any other error ends the
    /// loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        async {
            tracing::info!(period = ?self.period, "manager scheduler started");
            loop {
                match self.tick(&cancel).await {
                    Ok(assigned) if assigned > 0 => {
                        tracing::info!(assigned, "managers assigned");
                    }
                    Ok(_) => {}
                    Err(SchedulerError::Pool(PoolError::NoAvailableManagers)) => {
                        tracing::debug!("pool drained mid-tick");
                    }
                    Err(SchedulerError::Pool(PoolError::Cancelled)) if cancel.is_cancelled() => {
                        break;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "schedule managers to problems");
                        return Err(err);
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.period) => {}
                }
            }
            tracing::info!("manager scheduler stopped");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// One scheduling pass. Returns the number of problems assigned.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<usize, SchedulerError> {
        let limit = self.pool.size();
        if limit == 0 {
            return Ok(0);
        }

        let problems = self.problems.get_problems_without_manager(limit).await?;
        let mut assigned = 0;
        for problem in problems {
            let manager_id = self.pool.get(cancel).await?;

            if let Err(err) = self.assign(manager_id, &problem).await {
                self.put_back(manager_id).await;
                return Err(err.into());
            }
            tracing::debug!(problem_id = %problem.id, %manager_id, "manager assigned to problem");
            assigned += 1;
        }
        Ok(assigned)
    }

    async fn assign(&self, manager_id: UserId, problem: &Problem) -> Result<(), StoreError> {
        let problems = Arc::clone(&self.problems);
        let messages = Arc::clone(&self.messages);
        let outbox = Arc::clone(&self.outbox);
        let now = self.clock.now();
        let (problem_id, chat_id) = (problem.id, problem.chat_id);

        self.txtor
            .run_in_tx(tx_fn(move || async move {
                problems
                    .set_manager_for_problem(problem_id, manager_id)
                    .await?;
                let request_id = problems.get_problem_initial_request_id(problem_id).await?;
                let message_id = messages
                    .create_service_message_for_client(
                        request_id,
                        problem_id,
                        chat_id,
                        &format!("Manager {manager_id} will answer you"),
                    )
                    .await?;
                let payload = simple_id::marshal(message_id)
                    .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
                outbox
                    .put(manager_assigned::NAME, &payload, now)
                    .await
                    .map(|_| ())
            }))
            .await
    }

    /// Compensation for a failed assignment. Runs on a fresh token so that a
    /// shutdown in progress does not lose the manager.
    async fn put_back(&self, manager_id: UserId) {
        if let Err(err) = self.pool.put(&CancellationToken::new(), manager_id).await {
            tracing::error!(%manager_id, error = %err, "return manager to pool");
        } else {
            tracing::warn!(%manager_id, "assignment failed, manager returned to pool");
        }
    }
}
