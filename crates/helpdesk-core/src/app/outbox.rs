//! Outbox - at-least-once job engine.
//!
//! # Flow (per worker)
//! 1. `JobStore::find_and_reserve_job(now + reserve_for)` until `NoJobs`
//! 2. unknown name -> dead letter ("unknown job")
//! 3. `Job::handle` bounded by `execution_timeout`
//! 4. success -> delete the row; failure -> leave it for the next lease, or
//!    dead-letter once the attempt budget is spent
//! 5. sleep `idle_time`, repeat
//!
//! The reservation window is the retry backoff: a failed row becomes visible
//! again when `reserved_until` passes.
//!
//! Shutdown: the token is checked between rows and during the idle sleep.
//! A running `handle` is never interrupted by it, and the delete after a
//! successful `handle` always runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::domain::{JobError, JobId, JobRecord, MAX_ATTEMPTS_CEILING, OutboxError, StoreError};
use crate::ports::{Clock, JobEnqueuer, JobStore, SystemClock, Transactor, tx_fn};

use super::job::Job;
use super::registry::JobRegistry;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;
pub const MIN_IDLE_TIME: Duration = Duration::from_millis(100);
pub const MAX_IDLE_TIME: Duration = Duration::from_secs(10);
pub const MIN_RESERVE_FOR: Duration = Duration::from_secs(1);
pub const MAX_RESERVE_FOR: Duration = Duration::from_secs(600);

const UNKNOWN_JOB_REASON: &str = "unknown job";
const CEILING_REASON: &str = "attempts ceiling exceeded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxOptions {
    pub workers: usize,
    pub idle_time: Duration,
    pub reserve_for: Duration,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            idle_time: Duration::from_secs(1),
            reserve_for: Duration::from_secs(300),
        }
    }
}

impl OutboxOptions {
    pub fn validate(&self) -> Result<(), OutboxError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(OutboxError::InvalidOptions(format!(
                "workers must be in {MIN_WORKERS}..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if !(MIN_IDLE_TIME..=MAX_IDLE_TIME).contains(&self.idle_time) {
            return Err(OutboxError::InvalidOptions(format!(
                "idle_time must be in {MIN_IDLE_TIME:?}..={MAX_IDLE_TIME:?}, got {:?}",
                self.idle_time
            )));
        }
        if !(MIN_RESERVE_FOR..=MAX_RESERVE_FOR).contains(&self.reserve_for) {
            return Err(OutboxError::InvalidOptions(format!(
                "reserve_for must be in {MIN_RESERVE_FOR:?}..={MAX_RESERVE_FOR:?}, got {:?}",
                self.reserve_for
            )));
        }
        Ok(())
    }
}

pub struct Outbox {
    opts: OutboxOptions,
    lease: chrono::Duration,
    store: Arc<dyn JobStore>,
    txtor: Arc<dyn Transactor>,
    registry: JobRegistry,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl Outbox {
    pub fn new(
        opts: OutboxOptions,
        store: Arc<dyn JobStore>,
        txtor: Arc<dyn Transactor>,
    ) -> Result<Self, OutboxError> {
        opts.validate()?;
        let lease = chrono::Duration::from_std(opts.reserve_for)
            .map_err(|e| OutboxError::InvalidOptions(format!("reserve_for: {e}")))?;

        Ok(Self {
            opts,
            lease,
            store,
            txtor,
            registry: JobRegistry::new(),
            clock: Arc::new(SystemClock),
            span: tracing::info_span!("outbox"),
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

    pub fn register_job(&mut self, job: Arc<dyn Job>) -> Result<(), OutboxError> {
        self.registry.register(job)
    }

    /// Like [`Outbox::register_job`], but a duplicate name is a startup bug
    /// and panics.
    pub fn must_register_job(&mut self, job: Arc<dyn Job>) {
        if let Err(err) = self.register_job(job) {
            panic!("register job: {err}");
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn options(&self) -> &OutboxOptions {
        &self.opts
    }

    /// Run the workers until `cancel` fires or one of them fails.
    ///
    /// The first worker error cancels the others; `run` waits for all of them
    /// and returns that error.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), OutboxError> {
        let span = self.span.clone();
        self.run_workers(cancel).instrument(span).await
    }

    async fn run_workers(self: Arc<Self>, cancel: CancellationToken) -> Result<(), OutboxError> {
        let workers_cancel = cancel.child_token();
        let mut workers = JoinSet::new();

        tracing::info!(
            workers = self.opts.workers,
            jobs = ?self.registry.names().collect::<Vec<_>>(),
            "outbox started"
        );

        for worker_id in 0..self.opts.workers {
            let outbox = Arc::clone(&self);
            let cancel = workers_cancel.clone();
            let span = tracing::info_span!("worker", worker_id);
            workers.spawn(async move { outbox.worker(cancel).await }.instrument(span));
        }

        let mut first_err = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(OutboxError::Worker(e.to_string())));
            if let Err(err) = result {
                if first_err.is_none() {
                    tracing::error!(error = %err, "worker failed, stopping outbox");
                    workers_cancel.cancel();
                    first_err = Some(err);
                }
            }
        }

        tracing::info!("outbox stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn worker(&self, cancel: CancellationToken) -> Result<(), OutboxError> {
        tracing::debug!("worker started");
        loop {
            self.drain(&cancel).await?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.opts.idle_time) => {}
            }
        }
        tracing::debug!("worker stopped");
        Ok(())
    }

    /// Lease and process rows until the store has none eligible.
    async fn drain(&self, cancel: &CancellationToken) -> Result<(), OutboxError> {
        while !cancel.is_cancelled() {
            let until = self.clock.now() + self.lease;
            let job = match self.store.find_and_reserve_job(until).await {
                Ok(job) => job,
                Err(StoreError::NoJobs) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            self.process(job).await?;
        }
        Ok(())
    }

    async fn process(&self, job: JobRecord) -> Result<(), OutboxError> {
        let Some(handler) = self.registry.get(&job.name) else {
            tracing::warn!(job_id = %job.id, job_name = %job.name, "unknown job, moving to dead letters");
            return self.dead_letter(&job, UNKNOWN_JOB_REASON.to_string()).await;
        };

        if job.attempts > MAX_ATTEMPTS_CEILING {
            tracing::warn!(
                job_id = %job.id,
                job_name = %job.name,
                attempts = job.attempts,
                "attempts ceiling exceeded, moving to dead letters"
            );
            return self.dead_letter(&job, CEILING_REASON.to_string()).await;
        }

        let timeout = handler.execution_timeout();
        let result = match tokio::time::timeout(timeout, handler.handle(&job.payload)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(timeout)),
        };

        let max_attempts = handler.max_attempts().min(MAX_ATTEMPTS_CEILING);
        match result {
            Ok(()) => self.complete(&job).await,
            Err(err) if job.attempts >= max_attempts => {
                tracing::error!(
                    job_id = %job.id,
                    job_name = %job.name,
                    attempts = job.attempts,
                    error = %err,
                    "job failed permanently"
                );
                self.dead_letter(&job, format!("max attempts exceeded: {err}"))
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %job.id,
                    job_name = %job.name,
                    attempts = job.attempts,
                    max_attempts,
                    error = %err,
                    "job failed, will retry"
                );
                Ok(())
            }
        }
    }

    async fn complete(&self, job: &JobRecord) -> Result<(), OutboxError> {
        match self.store.delete_job(job.id).await {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, job_name = %job.name, attempts = job.attempts, "job done");
                Ok(())
            }
            // Lease expired mid-handle and another worker already finished it.
            Err(err) if err.is_not_found() => {
                tracing::warn!(job_id = %job.id, job_name = %job.name, "handled job already deleted");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn dead_letter(&self, job: &JobRecord, reason: String) -> Result<(), OutboxError> {
        let store = Arc::clone(&self.store);
        let (id, name, payload) = (job.id, job.name.clone(), job.payload.clone());

        // A missing row aborts the transaction so the failed copy is not kept twice.
        let result = self
            .txtor
            .run_in_tx(tx_fn(move || async move {
                store.create_failed_job(&name, &payload, &reason).await?;
                store.delete_job(id).await
            }))
            .await;

        match result {
            Ok(()) => Ok(()),
            // Lease expired mid-handle and another worker already moved it.
            Err(err) if err.is_not_found() => {
                tracing::warn!(job_id = %job.id, job_name = %job.name, "failed job already dead-lettered");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl JobEnqueuer for Outbox {
    async fn put(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let id = self.store.create_job(name, payload, available_at).await?;
        tracing::debug!(parent: &self.span, job_id = %id, job_name = name, "job enqueued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailedJobRecord;
    use crate::impls::MemoryDatabase;
    use crate::ports::TokioClock;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    // ---- jobs ----

    #[derive(Default)]
    struct CountingJob {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "count"
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob {
        calls: AtomicU32,
        max_attempts: u32,
    }

    impl FailingJob {
        fn new(max_attempts: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                max_attempts,
            }
        }
    }

    #[async_trait]
    impl Job for FailingJob {
        fn name(&self) -> &str {
            "fail"
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(JobError::Failed(format!("boom #{n}")))
        }

        fn max_attempts(&self) -> u32 {
            self.max_attempts
        }
    }

    #[derive(Default)]
    struct SlowJob {
        started: AtomicBool,
        finished: AtomicU32,
    }

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            self.started.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StuckJob;

    #[async_trait]
    impl Job for StuckJob {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        fn execution_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn max_attempts(&self) -> u32 {
            2
        }
    }

    /// Fails its first attempt for every payload, then succeeds.
    #[derive(Default)]
    struct FlakyJob {
        seen: Mutex<HashSet<String>>,
        done: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl Job for FlakyJob {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn handle(&self, payload: &str) -> Result<(), JobError> {
            if self.seen.lock().unwrap().insert(payload.to_string()) {
                return Err(JobError::Failed("first attempt".into()));
            }
            self.done.lock().unwrap().insert(payload.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingJob {
        done: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl Job for RecordingJob {
        fn name(&self) -> &str {
            "ok"
        }

        async fn handle(&self, payload: &str) -> Result<(), JobError> {
            self.done.lock().unwrap().insert(payload.to_string());
            Ok(())
        }
    }

    // ---- stores ----

    /// Counts reservation attempts.
    struct CountingStore {
        inner: Arc<MemoryDatabase>,
        reservations: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for CountingStore {
        async fn create_job(
            &self,
            name: &str,
            payload: &str,
            available_at: DateTime<Utc>,
        ) -> Result<JobId, StoreError> {
            self.inner.create_job(name, payload, available_at).await
        }

        async fn find_and_reserve_job(
            &self,
            until: DateTime<Utc>,
        ) -> Result<JobRecord, StoreError> {
            self.reservations.fetch_add(1, Ordering::SeqCst);
            self.inner.find_and_reserve_job(until).await
        }

        async fn create_failed_job(
            &self,
            name: &str,
            payload: &str,
            reason: &str,
        ) -> Result<(), StoreError> {
            self.inner.create_failed_job(name, payload, reason).await
        }

        async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
            self.inner.delete_job(id).await
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl JobStore for BrokenStore {
        async fn create_job(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<JobId, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn find_and_reserve_job(&self, _: DateTime<Utc>) -> Result<JobRecord, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn create_failed_job(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn delete_job(&self, _: JobId) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    // ---- helpers ----

    fn opts(workers: usize) -> OutboxOptions {
        OutboxOptions {
            workers,
            idle_time: Duration::from_millis(100),
            reserve_for: Duration::from_secs(1),
        }
    }

    fn database() -> (Arc<MemoryDatabase>, Arc<TokioClock>) {
        let clock = Arc::new(TokioClock::new());
        (Arc::new(MemoryDatabase::with_clock(clock.clone())), clock)
    }

    fn outbox(opts: OutboxOptions, db: &Arc<MemoryDatabase>, clock: &Arc<TokioClock>) -> Outbox {
        Outbox::new(opts, db.clone(), db.clone())
            .unwrap()
            .with_clock(clock.clone())
    }

    fn start(
        outbox: Outbox,
    ) -> (
        Arc<Outbox>,
        CancellationToken,
        JoinHandle<Result<(), OutboxError>>,
    ) {
        let outbox = Arc::new(outbox);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&outbox).run(cancel.clone()));
        (outbox, cancel, handle)
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn only_failed(db: &MemoryDatabase) -> FailedJobRecord {
        let failed = db.failed_jobs();
        assert_eq!(failed.len(), 1, "expected exactly one dead letter");
        failed.into_iter().next().unwrap()
    }

    // ---- options ----

    #[rstest]
    #[case(0, 100, 1_000)]
    #[case(33, 100, 1_000)]
    #[case(1, 99, 1_000)]
    #[case(1, 10_001, 1_000)]
    #[case(1, 100, 999)]
    #[case(1, 100, 600_001)]
    fn out_of_range_options_are_rejected(
        #[case] workers: usize,
        #[case] idle_ms: u64,
        #[case] reserve_ms: u64,
    ) {
        let opts = OutboxOptions {
            workers,
            idle_time: Duration::from_millis(idle_ms),
            reserve_for: Duration::from_millis(reserve_ms),
        };
        assert!(matches!(opts.validate(), Err(OutboxError::InvalidOptions(_))));
    }

    #[rstest]
    #[case(1, 100, 1_000)]
    #[case(32, 10_000, 600_000)]
    fn boundary_options_are_accepted(
        #[case] workers: usize,
        #[case] idle_ms: u64,
        #[case] reserve_ms: u64,
    ) {
        let opts = OutboxOptions {
            workers,
            idle_time: Duration::from_millis(idle_ms),
            reserve_for: Duration::from_millis(reserve_ms),
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "job already registered: count")]
    fn must_register_job_panics_on_duplicate() {
        let db = Arc::new(MemoryDatabase::new());
        let mut outbox = Outbox::new(OutboxOptions::default(), db.clone(), db).unwrap();
        outbox.must_register_job(Arc::new(CountingJob::default()));
        outbox.must_register_job(Arc::new(CountingJob::default()));
    }

    // ---- engine ----

    #[tokio::test(start_paused = true)]
    async fn put_is_not_deduplicated() {
        let (db, clock) = database();
        let outbox = outbox(opts(1), &db, &clock);

        let a = outbox.put("count", "same", clock.now()).await.unwrap();
        let b = outbox.put("count", "same", clock.now()).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(db.jobs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_job_is_handled_and_deleted() {
        let (db, clock) = database();
        let job = Arc::new(CountingJob::default());
        let mut outbox = outbox(opts(4), &db, &clock);
        outbox.register_job(job.clone()).unwrap();

        for i in 0..50 {
            outbox.put("count", &i.to_string(), clock.now()).await.unwrap();
        }

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| db.jobs().is_empty()).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(job.calls.load(Ordering::SeqCst), 50);
        assert!(db.failed_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_waits_for_available_at() {
        let (db, clock) = database();
        let job = Arc::new(CountingJob::default());
        let mut outbox = outbox(opts(1), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox
            .put("count", "later", clock.now() + chrono::Duration::seconds(5))
            .await
            .unwrap();

        let (_outbox, cancel, handle) = start(outbox);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);

        eventually(|| job.calls.load(Ordering::SeqCst) == 1).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_is_dead_lettered_once() {
        let (db, clock) = database();
        let job = Arc::new(CountingJob::default());
        let mut outbox = outbox(opts(2), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox.put("nobody-handles-this", "{}", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| !db.failed_jobs().is_empty()).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let failed = only_failed(&db);
        assert_eq!(failed.name, "nobody-handles-this");
        assert_eq!(failed.reason, "unknown job");
        assert!(db.jobs().is_empty());
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_is_attempted_max_attempts_times() {
        let (db, clock) = database();
        let job = Arc::new(FailingJob::new(3));
        let mut outbox = outbox(opts(2), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox.put("fail", "payload", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| !db.failed_jobs().is_empty()).await;

        // Nothing left to retry.
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
        let failed = only_failed(&db);
        assert_eq!(failed.payload, "payload");
        assert!(failed.reason.contains("boom #3"), "reason: {}", failed.reason);
        assert!(db.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_is_retried_after_the_lease_expires() {
        let (db, clock) = database();
        let job = Arc::new(FailingJob::new(5));
        let mut outbox = outbox(
            OutboxOptions {
                reserve_for: Duration::from_secs(10),
                ..opts(1)
            },
            &db,
            &clock,
        );
        outbox.register_job(job.clone()).unwrap();
        outbox.put("fail", "payload", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    /// Sleeps past the lease, then fails.
    struct OverrunningJob {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Job for OverrunningJob {
        fn name(&self) -> &str {
            "overrun"
        }

        async fn handle(&self, _payload: &str) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            Err(JobError::Failed("too slow".into()))
        }

        fn max_attempts(&self) -> u32 {
            1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_dead_letter_of_the_same_row_keeps_workers_running() {
        let (db, clock) = database();
        let job = Arc::new(OverrunningJob {
            calls: AtomicU32::new(0),
        });
        let mut outbox = outbox(opts(2), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox.put("overrun", "payload", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);

        // The second lease starts while the first handle is still sleeping.
        eventually(|| job.calls.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!handle.is_finished(), "outbox stopped on a duplicate dead letter");
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(job.calls.load(Ordering::SeqCst), 2);
        let failed = only_failed(&db);
        assert!(failed.reason.contains("too slow"), "reason: {}", failed.reason);
        assert!(db.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_a_failed_attempt() {
        let (db, clock) = database();
        let mut outbox = outbox(opts(1), &db, &clock);
        outbox.register_job(Arc::new(StuckJob)).unwrap();
        outbox.put("stuck", "{}", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| !db.failed_jobs().is_empty()).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let failed = only_failed(&db);
        assert!(failed.reason.contains("timeout"), "reason: {}", failed.reason);
    }

    #[tokio::test(start_paused = true)]
    async fn job_budget_is_capped_by_the_ceiling() {
        let (db, clock) = database();
        let job = Arc::new(FailingJob::new(100));
        let mut outbox = outbox(opts(1), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox.put("fail", "{}", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| !db.failed_jobs().is_empty()).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(job.calls.load(Ordering::SeqCst), MAX_ATTEMPTS_CEILING);
        only_failed(&db);
    }

    #[tokio::test(start_paused = true)]
    async fn row_past_the_ceiling_is_dead_lettered_without_handling() {
        let (db, clock) = database();
        let job = Arc::new(CountingJob::default());
        let mut outbox = outbox(opts(1), &db, &clock);
        outbox.register_job(job.clone()).unwrap();

        let mut row = JobRecord::new("count", "{}", clock.now(), clock.now());
        row.attempts = MAX_ATTEMPTS_CEILING;
        db.insert_job(row);

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| !db.failed_jobs().is_empty()).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(only_failed(&db).reason, "attempts ceiling exceeded");
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_polls_once_per_idle_time() {
        let (db, clock) = database();
        let store = Arc::new(CountingStore {
            inner: db.clone(),
            reservations: AtomicUsize::new(0),
        });
        let outbox = Outbox::new(
            OutboxOptions {
                idle_time: Duration::from_secs(1),
                ..opts(1)
            },
            store.clone(),
            db.clone(),
        )
        .unwrap()
        .with_clock(clock);

        let (_outbox, cancel, handle) = start(outbox);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.reservations.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(store.reservations.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(db.jobs().is_empty());
        assert!(db.failed_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn store_error_stops_every_worker() {
        let (db, clock) = database();
        let outbox = Outbox::new(opts(3), Arc::new(BrokenStore), db)
            .unwrap()
            .with_clock(clock);

        let (_outbox, _cancel, handle) = start(outbox);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, OutboxError::Store(StoreError::Backend(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn handled_job_is_deleted_even_when_shutdown_starts_mid_handle() {
        let (db, clock) = database();
        let job = Arc::new(SlowJob::default());
        let mut outbox = outbox(opts(1), &db, &clock);
        outbox.register_job(job.clone()).unwrap();
        outbox.put("slow", "{}", clock.now()).await.unwrap();

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| job.started.load(Ordering::SeqCst)).await;
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
        assert!(db.jobs().is_empty());
        assert!(db.failed_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_workload_settles() {
        let (db, clock) = database();
        let ok = Arc::new(RecordingJob::default());
        let flaky = Arc::new(FlakyJob::default());
        let mut outbox = outbox(opts(4), &db, &clock);
        outbox.register_job(ok.clone()).unwrap();
        outbox.register_job(flaky.clone()).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let mut want_ok = HashSet::new();
        let mut want_flaky = HashSet::new();
        let mut unknown = 0;
        for i in 0..200 {
            let payload = i.to_string();
            let delay = chrono::Duration::milliseconds(rng.gen_range(0..3_000));
            let name = match rng.gen_range(0..10) {
                0..=5 => {
                    want_ok.insert(payload.clone());
                    "ok"
                }
                6..=8 => {
                    want_flaky.insert(payload.clone());
                    "flaky"
                }
                _ => {
                    unknown += 1;
                    "ghost"
                }
            };
            outbox.put(name, &payload, clock.now() + delay).await.unwrap();
        }

        let (_outbox, cancel, handle) = start(outbox);
        eventually(|| db.jobs().is_empty()).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*ok.done.lock().unwrap(), want_ok);
        assert_eq!(*flaky.done.lock().unwrap(), want_flaky);
        let failed = db.failed_jobs();
        assert_eq!(failed.len(), unknown);
        assert!(failed.iter().all(|f| f.name == "ghost" && f.reason == "unknown job"));
    }
}
