//! MemoryDatabase - in-process implementation of every storage port.
//!
//! Used by tests and the demo binary. One `MemoryDatabase` holds all tables,
//! so a transaction can span jobs, problems and messages the way a real
//! database transaction does.
//!
//! # Locking
//! - `tables` (std Mutex) is only held for the synchronous body of one
//!   operation, never across an await.
//! - `tx_lock` (tokio Mutex) serialises writers. A transaction holds it for
//!   its whole duration; operations outside a transaction take it per call.
//!   Operations inside a transaction recognise it through the `CURRENT_TX`
//!   task-local and do not take it again.
//!
//! Every reservation runs under `tx_lock`, so no two callers can lease the
//! same row, and none of them ever waits on a row held by another one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Chat, ChatId, FailedJobRecord, JobId, JobRecord, Message, MessageId, Problem, ProblemId,
    RequestId, StoreError, UserId,
};
use crate::observability::JobCounts;
use crate::ports::{
    ChatRepository, Clock, JobStore, MessageRepository, ProblemRepository, SystemClock,
    Transactor, TxFn,
};

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// ID of the `MemoryDatabase` whose transaction the current task runs in.
    static CURRENT_TX: u64;
}

#[derive(Debug, Clone, Default)]
struct Tables {
    jobs: Vec<JobRecord>,
    failed_jobs: Vec<FailedJobRecord>,
    chats: Vec<Chat>,
    problems: Vec<Problem>,
    messages: Vec<Message>,
}

impl Tables {
    fn problem_mut(&mut self, id: ProblemId) -> Result<&mut Problem, StoreError> {
        self.problems
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::not_found("problem", id))
    }

    fn has_manager_visible_message(&self, problem_id: ProblemId) -> bool {
        self.messages
            .iter()
            .any(|m| m.problem_id == problem_id && m.is_visible_for_manager)
    }
}

/// Restores the snapshot on drop unless committed. Drop also runs while a
/// panic unwinds out of the transaction body.
struct Rollback<'a> {
    tables: &'a Mutex<Tables>,
    snapshot: Option<Tables>,
}

impl<'a> Rollback<'a> {
    fn begin(tables: &'a Mutex<Tables>) -> Self {
        let snapshot = lock(tables).clone();
        Self {
            tables,
            snapshot: Some(snapshot),
        }
    }

    fn commit(mut self) {
        self.snapshot = None;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *lock(self.tables) = snapshot;
        }
    }
}

fn lock(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MemoryDatabase {
    id: u64,
    tables: Mutex<Tables>,
    tx_lock: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
            tables: Mutex::new(Tables::default()),
            tx_lock: tokio::sync::Mutex::new(()),
            clock,
        }
    }

    fn in_tx(&self) -> bool {
        CURRENT_TX.try_with(|id| *id == self.id).unwrap_or(false)
    }

    /// Run one operation with writer exclusion.
    async fn access<R, F>(&self, op: F) -> R
    where
        F: FnOnce(&mut Tables, DateTime<Utc>) -> R + Send,
        R: Send,
    {
        let _writer = if self.in_tx() {
            None
        } else {
            Some(self.tx_lock.lock().await)
        };
        let now = self.clock.now();
        op(&mut lock(&self.tables), now)
    }

    // ---- seeding ----

    pub async fn create_chat(&self, client_id: UserId) -> ChatId {
        self.access(|t, now| {
            let chat = Chat {
                id: ChatId::generate(),
                client_id,
                created_at: now,
            };
            let id = chat.id;
            t.chats.push(chat);
            id
        })
        .await
    }

    pub async fn create_problem(&self, chat_id: ChatId) -> Result<ProblemId, StoreError> {
        self.access(|t, now| {
            if !t.chats.iter().any(|c| c.id == chat_id) {
                return Err(StoreError::not_found("chat", chat_id));
            }
            let problem = Problem {
                id: ProblemId::generate(),
                chat_id,
                manager_id: None,
                resolved_at: None,
                created_at: now,
            };
            let id = problem.id;
            t.problems.push(problem);
            Ok(id)
        })
        .await
    }

    /// Store a client message. A problem only becomes schedulable once it has
    /// a manager-visible message.
    pub async fn create_client_message(
        &self,
        problem_id: ProblemId,
        body: &str,
        visible_for_manager: bool,
    ) -> Result<MessageId, StoreError> {
        let body = body.to_string();
        self.access(move |t, now| -> Result<MessageId, StoreError> {
            let chat_id = t.problem_mut(problem_id)?.chat_id;
            let client_id = t
                .chats
                .iter()
                .find(|c| c.id == chat_id)
                .map(|c| c.client_id)
                .ok_or_else(|| StoreError::not_found("chat", chat_id))?;
            let message = Message {
                id: MessageId::generate(),
                chat_id,
                problem_id,
                author_id: Some(client_id),
                initial_request_id: RequestId::generate(),
                body,
                is_visible_for_client: true,
                is_visible_for_manager: visible_for_manager,
                is_service: false,
                created_at: now,
            };
            let id = message.id;
            t.messages.push(message);
            Ok(id)
        })
        .await
    }

    pub async fn resolve_problem(&self, problem_id: ProblemId) -> Result<(), StoreError> {
        self.access(|t, now| -> Result<(), StoreError> {
            t.problem_mut(problem_id)?.resolved_at = Some(now);
            Ok(())
        })
        .await
    }

    // ---- inspection ----

    pub fn jobs(&self) -> Vec<JobRecord> {
        lock(&self.tables).jobs.clone()
    }

    pub fn failed_jobs(&self) -> Vec<FailedJobRecord> {
        lock(&self.tables).failed_jobs.clone()
    }

    pub fn problems(&self) -> Vec<Problem> {
        lock(&self.tables).problems.clone()
    }

    pub fn problem(&self, id: ProblemId) -> Option<Problem> {
        lock(&self.tables).problems.iter().find(|p| p.id == id).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.tables).messages.clone()
    }

    pub fn counts(&self) -> JobCounts {
        let now = self.clock.now();
        let tables = lock(&self.tables);
        let reserved = tables.jobs.iter().filter(|j| j.reserved_until > now).count();
        JobCounts {
            pending: tables.jobs.len() - reserved,
            reserved,
            failed: tables.failed_jobs.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_job(&self, job: JobRecord) {
        lock(&self.tables).jobs.push(job);
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transactor for MemoryDatabase {
    async fn run_in_tx(&self, f: TxFn) -> Result<(), StoreError> {
        if self.in_tx() {
            return f().await;
        }

        let _writer = self.tx_lock.lock().await;
        let rollback = Rollback::begin(&self.tables);
        let result = CURRENT_TX.scope(self.id, f()).await;
        if result.is_ok() {
            rollback.commit();
        }
        result
    }
}

#[async_trait]
impl JobStore for MemoryDatabase {
    async fn create_job(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let (name, payload) = (name.to_string(), payload.to_string());
        self.access(move |t, now| {
            let job = JobRecord::new(name, payload, available_at, now);
            let id = job.id;
            t.jobs.push(job);
            Ok(id)
        })
        .await
    }

    async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        self.access(|t, now| -> Result<JobRecord, StoreError> {
            let job = t
                .jobs
                .iter_mut()
                .filter(|j| j.is_eligible(now))
                .min_by_key(|j| j.created_at)
                .ok_or(StoreError::NoJobs)?;
            job.reserve(until);
            Ok(job.clone())
        })
        .await
    }

    async fn create_failed_job(
        &self,
        name: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let record = (name.to_string(), payload.to_string(), reason.to_string());
        self.access(move |t, now| {
            let (name, payload, reason) = record;
            t.failed_jobs
                .push(FailedJobRecord::new(name, payload, reason, now));
            Ok(())
        })
        .await
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.access(|t, _| -> Result<(), StoreError> {
            let pos = t
                .jobs
                .iter()
                .position(|j| j.id == id)
                .ok_or_else(|| StoreError::not_found("job", id))?;
            t.jobs.remove(pos);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ProblemRepository for MemoryDatabase {
    async fn get_problems_without_manager(&self, limit: usize) -> Result<Vec<Problem>, StoreError> {
        if limit == 0 {
            return Err(StoreError::InvalidArgument("limit must be positive".into()));
        }
        self.access(|t, _| -> Result<Vec<Problem>, StoreError> {
            let mut problems: Vec<Problem> = t
                .problems
                .iter()
                .filter(|p| p.awaits_manager() && t.has_manager_visible_message(p.id))
                .cloned()
                .collect();
            problems.sort_by_key(|p| p.created_at);
            problems.truncate(limit);
            Ok(problems)
        })
        .await
    }

    async fn set_manager_for_problem(
        &self,
        problem_id: ProblemId,
        manager_id: UserId,
    ) -> Result<(), StoreError> {
        self.access(|t, _| -> Result<(), StoreError> {
            let problem = t.problem_mut(problem_id)?;
            if let Some(current) = problem.manager_id {
                return Err(StoreError::Conflict(format!(
                    "{problem_id} already has manager {current}"
                )));
            }
            problem.manager_id = Some(manager_id);
            Ok(())
        })
        .await
    }

    async fn get_problem_initial_request_id(
        &self,
        problem_id: ProblemId,
    ) -> Result<RequestId, StoreError> {
        self.access(|t, _| {
            t.messages
                .iter()
                .filter(|m| m.problem_id == problem_id && m.is_visible_for_manager)
                .min_by_key(|m| m.created_at)
                .map(|m| m.initial_request_id)
                .ok_or_else(|| StoreError::not_found("manager-visible message of", problem_id))
        })
        .await
    }

    async fn get_manager_open_problems_count(
        &self,
        manager_id: UserId,
    ) -> Result<usize, StoreError> {
        self.access(|t, _| {
            Ok(t.problems
                .iter()
                .filter(|p| p.is_open() && p.manager_id == Some(manager_id))
                .count())
        })
        .await
    }
}

#[async_trait]
impl MessageRepository for MemoryDatabase {
    async fn create_service_message_for_client(
        &self,
        request_id: RequestId,
        problem_id: ProblemId,
        chat_id: ChatId,
        body: &str,
    ) -> Result<MessageId, StoreError> {
        let body = body.to_string();
        self.access(move |t, now| {
            let message = Message {
                id: MessageId::generate(),
                chat_id,
                problem_id,
                author_id: None,
                initial_request_id: request_id,
                body,
                is_visible_for_client: true,
                is_visible_for_manager: false,
                is_service: true,
                created_at: now,
            };
            let id = message.id;
            t.messages.push(message);
            Ok(id)
        })
        .await
    }

    async fn get_message_by_id(&self, message_id: MessageId) -> Result<Message, StoreError> {
        self.access(|t, _| {
            t.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("message", message_id))
        })
        .await
    }
}

#[async_trait]
impl ChatRepository for MemoryDatabase {
    async fn get_chat_client(&self, chat_id: ChatId) -> Result<UserId, StoreError> {
        self.access(|t, _| {
            t.chats
                .iter()
                .find(|c| c.id == chat_id)
                .map(|c| c.client_id)
                .ok_or_else(|| StoreError::not_found("chat", chat_id))
        })
        .await
    }

    async fn get_chat_manager(&self, chat_id: ChatId) -> Result<UserId, StoreError> {
        self.access(|t, _| {
            t.problems
                .iter()
                .filter(|p| p.chat_id == chat_id && p.is_open())
                .find_map(|p| p.manager_id)
                .ok_or_else(|| StoreError::not_found("manager of chat", chat_id))
        })
        .await
    }
}
