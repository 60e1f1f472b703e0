//! Concrete outbox jobs and their payload codecs.

pub mod manager_assigned;
pub mod payload;

pub use self::manager_assigned::ManagerAssignedToProblemJob;
pub use self::payload::simple_id;
