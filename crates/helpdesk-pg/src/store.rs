//! PgStore - `JobStore` + `Transactor` on PostgreSQL.
//!
//! # Transactions
//! `run_in_tx` begins a transaction and publishes it through the `CURRENT_TX`
//! task-local. Every store call made while the closure runs picks it up and
//! executes on the transaction connection instead of checking one out of the
//! pool. A panic drops the transaction, which sqlx rolls back.
//!
//! # Reservation
//! One statement: the inner `SELECT ... FOR UPDATE SKIP LOCKED` picks the
//! oldest eligible row nobody else is locking, the outer `UPDATE` bumps
//! `attempts` and moves `reserved_until`. Concurrent callers never wait on
//! each other's rows.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use helpdesk_core::domain::{FailedJobId, JobId, JobRecord, StoreError};
use helpdesk_core::observability::JobCounts;
use helpdesk_core::ports::{JobStore, Transactor, TxFn};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

#[derive(Clone)]
struct CurrentTx {
    store_id: u64,
    tx: SharedTx,
}

tokio::task_local! {
    static CURRENT_TX: CurrentTx;
}

/// Connection for one statement: the open transaction or a pooled connection.
enum Conn {
    Pool(PoolConnection<Postgres>),
    Tx(OwnedMutexGuard<Option<Transaction<'static, Postgres>>>),
}

impl Conn {
    fn get(&mut self) -> Result<&mut PgConnection, StoreError> {
        match self {
            Conn::Pool(conn) => Ok(&mut **conn),
            Conn::Tx(guard) => guard
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or_else(|| StoreError::Backend("transaction already finished".into())),
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_ulid(raw: &str) -> Result<Ulid, StoreError> {
    Ulid::from_string(raw).map_err(|e| StoreError::Backend(format!("bad id '{raw}' in row: {e}")))
}

fn row_to_job(row: &PgRow) -> Result<JobRecord, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let attempts: i32 = row.try_get("attempts").map_err(backend)?;
    Ok(JobRecord {
        id: JobId::from_ulid(parse_ulid(&id)?),
        name: row.try_get("name").map_err(backend)?,
        payload: row.try_get("payload").map_err(backend)?,
        attempts: u32::try_from(attempts).unwrap_or_default(),
        available_at: row.try_get("available_at").map_err(backend)?,
        reserved_until: row.try_get("reserved_until").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

pub struct PgStore {
    id: u64,
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            pool,
        }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migrate: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn counts(&self) -> Result<JobCounts, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT count(*) FROM jobs WHERE reserved_until <= now()) AS pending,
                (SELECT count(*) FROM jobs WHERE reserved_until > now())  AS reserved,
                (SELECT count(*) FROM failed_jobs)                        AS failed
            "#,
        )
        .fetch_one(self.conn().await?.get()?)
        .await
        .map_err(backend)?;

        let count = |col: &str| -> Result<usize, StoreError> {
            let n: i64 = row.try_get(col).map_err(backend)?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        Ok(JobCounts {
            pending: count("pending")?,
            reserved: count("reserved")?,
            failed: count("failed")?,
        })
    }

    fn current_tx(&self) -> Option<SharedTx> {
        CURRENT_TX
            .try_with(|cur| (cur.store_id == self.id).then(|| Arc::clone(&cur.tx)))
            .ok()
            .flatten()
    }

    async fn conn(&self) -> Result<Conn, StoreError> {
        if let Some(tx) = self.current_tx() {
            return Ok(Conn::Tx(tx.lock_owned().await));
        }
        let conn = self.pool.acquire().await.map_err(backend)?;
        Ok(Conn::Pool(conn))
    }
}

#[async_trait]
impl Transactor for PgStore {
    async fn run_in_tx(&self, f: TxFn) -> Result<(), StoreError> {
        if self.current_tx().is_some() {
            return f().await;
        }

        let tx = self.pool.begin().await.map_err(backend)?;
        let shared: SharedTx = Arc::new(Mutex::new(Some(tx)));
        let scope = CurrentTx {
            store_id: self.id,
            tx: Arc::clone(&shared),
        };

        let result = CURRENT_TX.scope(scope, f()).await;

        let tx = shared
            .lock()
            .await
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".into()))?;
        match result {
            Ok(()) => tx.commit().await.map_err(backend),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let id = JobId::generate();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, payload, attempts, available_at, reserved_until, created_at)
            VALUES ($1, $2, $3, 0, $4, now(), clock_timestamp())
            "#,
        )
        .bind(id.as_ulid().to_string())
        .bind(name)
        .bind(payload)
        .bind(available_at)
        .execute(self.conn().await?.get()?)
        .await
        .map_err(backend)?;

        Ok(id)
    }

    async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1, reserved_until = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE available_at <= now() AND reserved_until <= now()
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, name, payload, attempts, available_at, reserved_until, created_at
            "#,
        )
        .bind(until)
        .fetch_optional(self.conn().await?.get()?)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NoJobs),
        }
    }

    async fn create_failed_job(
        &self,
        name: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO failed_jobs (id, name, payload, reason) VALUES ($1, $2, $3, $4)")
            .bind(FailedJobId::generate().as_ulid().to_string())
            .bind(name)
            .bind(payload)
            .bind(reason)
            .execute(self.conn().await?.get()?)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_ulid().to_string())
            .execute(self.conn().await?.get()?)
            .await
            .map_err(backend)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::not_found("job", id));
        }
        Ok(())
    }
}
