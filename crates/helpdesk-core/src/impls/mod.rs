//! Impls - in-process adapters for the ports.
//!
//! Used by tests and the demo binary; production wiring swaps the storage
//! for `helpdesk-pg`.

pub mod inmem_events;
pub mod inmem_pool;
pub mod memory;

pub use self::inmem_events::InMemoryEventStream;
pub use self::inmem_pool::InMemoryManagerPool;
pub use self::memory::MemoryDatabase;
