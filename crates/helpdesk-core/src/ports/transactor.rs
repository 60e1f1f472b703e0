//! Transactor port - run a unit of work inside one storage transaction.
//!
//! The closure does not receive a handle. Repository calls made while the
//! returned future runs pick the open transaction up from task-local state,
//! the same way every `JobStore` / repository implementation in this
//! workspace does.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::domain::StoreError;

pub type TxFuture = Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>>;

pub type TxFn = Box<dyn FnOnce() -> TxFuture + Send>;

#[async_trait]
pub trait Transactor: Send + Sync {
    /// Commit when `f` resolves to `Ok`, roll back on `Err` or panic.
    ///
    /// Nested calls join the outer transaction.
    async fn run_in_tx(&self, f: TxFn) -> Result<(), StoreError>;
}

/// Box an async closure into a [`TxFn`].
///
/// ```ignore
/// txtor.run_in_tx(tx_fn(move || async move {
///     store.create_failed_job(&name, &payload, &reason).await?;
///     store.delete_job(id).await
/// })).await?;
/// ```
pub fn tx_fn<F, Fut>(f: F) -> TxFn
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
{
    Box::new(move || -> TxFuture { Box::pin(f()) })
}
