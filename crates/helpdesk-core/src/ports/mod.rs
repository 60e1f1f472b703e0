//! Ports - abstraction layer.
//!
//! Each trait is the seam to a resource owned outside the core (database,
//! event stream, manager pool backend). Storage ports share one rule: a call
//! made inside `Transactor::run_in_tx` joins that transaction.

pub mod clock;
pub mod enqueuer;
pub mod event_stream;
pub mod job_store;
pub mod manager_pool;
pub mod repositories;
pub mod transactor;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::enqueuer::JobEnqueuer;
pub use self::event_stream::EventStream;
pub use self::job_store::JobStore;
pub use self::manager_pool::ManagerPool;
pub use self::repositories::{ChatRepository, MessageRepository, ProblemRepository};
pub use self::transactor::{Transactor, TxFn, TxFuture, tx_fn};
