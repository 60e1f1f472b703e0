//! Domain model (IDs, job rows, chats/problems/messages, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod problem;

pub use self::errors::{
    EventStreamError, FreeHandsError, JobError, ManagerLoadError, OutboxError, PoolError,
    SchedulerError, StoreError,
};
pub use self::events::Event;
pub use self::ids::{
    ChatId, EventId, FailedJobId, Id, IdMarker, JobId, MessageId, ParseIdError, ProblemId,
    RequestId, UserId,
};
pub use self::job::{FailedJobRecord, JobRecord, MAX_ATTEMPTS_CEILING};
pub use self::problem::{Chat, Message, Problem};
