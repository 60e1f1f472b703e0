//! Domain identifiers (strongly-typed IDs).
//!
//! Every entity gets its own `Id<T>`. All of them share one ULID-backed
//! implementation, and the phantom marker keeps a `JobId` from being passed
//! where a `UserId` is expected.
//!
//! ## Text form
//! `Display` renders `<prefix><ulid>` (for example `job-01HV...`), and
//! `FromStr` accepts exactly that form. Job payloads that carry a single ID
//! rely on this, see [`crate::app::jobs::payload::simple_id`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for ID types.
///
/// Provides the prefix used by `Display` / `FromStr`.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ID type.
///
/// `T` only exists at compile time (PhantomData), so every `Id<T>` is
/// exactly one ULID wide.
#[repr(transparent)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

// Manual impls: deriving them would demand the same bounds on the marker.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> Id<T> {
    /// Generate a fresh ID.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// The all-zero ID, used as "no value" by payload codecs.
    pub fn nil() -> Self {
        Self::from_ulid(Ulid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.ulid.is_nil()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing an ID from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("expected prefix '{expected}' in '{input}'")]
    MissingPrefix { expected: &'static str, input: String },

    #[error("invalid ulid in '{input}': {reason}")]
    InvalidUlid { input: String, reason: String },
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| ParseIdError::MissingPrefix {
                expected: T::prefix(),
                input: s.to_string(),
            })?;
        let ulid = Ulid::from_string(raw).map_err(|e| ParseIdError::InvalidUlid {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_ulid(ulid))
    }
}

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident, $alias:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }

        $(#[$doc])*
        pub type $alias = Id<$marker>;
    };
}

id_marker!(
    /// Identifier of a pending outbox job row.
    Job, JobId, "job-"
);
id_marker!(
    /// Identifier of a dead-lettered job row.
    FailedJob, FailedJobId, "failedjob-"
);
id_marker!(
    /// Identifier of a client or manager.
    User, UserId, "user-"
);
id_marker!(Problem, ProblemId, "problem-");
id_marker!(Chat, ChatId, "chat-");
id_marker!(Message, MessageId, "msg-");
id_marker!(
    /// Identifier of the client request that produced a message.
    Request, RequestId, "req-"
);
id_marker!(Event, EventId, "event-");
