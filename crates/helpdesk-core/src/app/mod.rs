//! App - application layer.
//!
//! Combines the ports into the running pieces:
//! - **Outbox**: job registry plus worker loops
//! - **ManagerScheduler**: periodic manager-to-problem binding
//! - **ManagerLoad** / **FreeHands**: who may enter the manager pool
//! - **jobs**: concrete outbox jobs and payload codecs

pub mod free_hands;
pub mod job;
pub mod jobs;
pub mod manager_load;
pub mod outbox;
pub mod registry;
pub mod scheduler;

pub use self::free_hands::FreeHands;
pub use self::job::{DEFAULT_EXECUTION_TIMEOUT, DEFAULT_MAX_ATTEMPTS, Job};
pub use self::manager_load::ManagerLoad;
pub use self::outbox::{Outbox, OutboxOptions};
pub use self::registry::JobRegistry;
pub use self::scheduler::ManagerScheduler;
