//! Core error types for focuskit-core.
//!
//! One tagged taxonomy instead of sentinel error values: every failure a
//! caller can act on has its own variant, and classifier helpers let the
//! API layer branch without matching the full enum.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::reminder::Reminder;
use crate::session::PomodoroSession;
use crate::task::Task;

/// Entity kinds the engine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Session,
    Reminder,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Task => write!(f, "task"),
            EntityKind::Session => write!(f, "session"),
            EntityKind::Reminder => write!(f, "reminder"),
        }
    }
}

/// The authoritative record returned with a version conflict.
///
/// Clients resolve conflicts by re-reading this record and retrying;
/// the engine never merges on their behalf.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum ConflictRecord {
    Task(Box<Task>),
    Session(Box<PomodoroSession>),
    Reminder(Box<Reminder>),
}

impl ConflictRecord {
    /// Current stored version of the conflicting record.
    pub fn current_version(&self) -> i64 {
        match self {
            ConflictRecord::Task(t) => t.sync_version,
            ConflictRecord::Session(s) => s.sync_version,
            ConflictRecord::Reminder(r) => r.sync_version,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ConflictRecord::Task(_) => EntityKind::Task,
            ConflictRecord::Session(_) => EntityKind::Session,
            ConflictRecord::Reminder(_) => EntityKind::Reminder,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ConflictRecord::Task(t) => &t.id,
            ConflictRecord::Session(s) => &s.id,
            ConflictRecord::Reminder(r) => &r.id,
        }
    }
}

/// Core error type for focuskit-core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input. Reported before any version check, so a
    /// validation failure never consumes a version slot.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Entity absent, soft-deleted, or owned by someone else. The three
    /// cases are indistinguishable so ownership is never leaked.
    #[error("{entity} not found")]
    NotFound { entity: EntityKind },

    /// Optimistic version mismatch. Carries the current authoritative
    /// record so the client can merge and retry.
    #[error("version conflict on {} (submitted {submitted}, stored {})", current.entity_kind(), current.current_version())]
    Conflict {
        submitted: i64,
        current: ConflictRecord,
    },

    /// Illegal state-machine move. State is left unchanged.
    #[error("invalid {entity} transition: {operation} from {from}")]
    InvalidTransition {
        entity: EntityKind,
        from: String,
        operation: String,
    },

    /// Snooze budget exhausted; the reminder stays `sent`.
    #[error("snooze limit reached ({count}/{max})")]
    SnoozeLimitReached { count: u32, max: u32 },

    /// Notification delivery failed.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Persistence failure. Fatal to the request; no partial writes.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, EngineError::InvalidTransition { .. })
    }

    pub fn is_snooze_limit(&self) -> bool {
        matches!(self, EngineError::SnoozeLimitReached { .. })
    }

    /// The authoritative record carried by a `Conflict`, if any.
    pub fn conflict_record(&self) -> Option<&ConflictRecord> {
        match self {
            EngineError::Conflict { current, .. } => Some(current),
            _ => None,
        }
    }
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{field}' must not be empty")]
    Empty { field: &'static str },

    #[error("'{field}' exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("too many tags: {count} (limit {max})")]
    TooManyTags { count: usize, max: usize },

    #[error("subtasks may not have their own subtasks")]
    SubtaskDepthExceeded,

    #[error("due date {value} is outside the accepted range")]
    DueDateOutOfRange { value: chrono::DateTime<chrono::Utc> },

    #[error("progress must be within 0..=100, got {0}")]
    ProgressOutOfRange(u8),

    #[error("rating must be within 1..=5, got {0}")]
    RatingOutOfRange(u8),

    #[error("un-completing a task requires an explicit progress below 100")]
    UncompleteWithoutProgress,

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Delivery errors, split by retry eligibility.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// Network-shaped failure; the scheduler retries these with backoff.
    #[error("transient delivery failure: {reason}")]
    Transient { reason: String },

    /// Unrecoverable failure (e.g. invalid address); never retried.
    #[error("permanent delivery failure: {reason}")]
    Permanent { reason: String },

    /// Transient failures persisted past the retry budget.
    #[error("delivery retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

impl DeliveryError {
    /// Whether another attempt could still succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient { .. })
    }
}

/// Persistence-layer errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    #[error("database is locked")]
    Locked,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for EngineError.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers() {
        let err = EngineError::Validation(ValidationError::Empty { field: "title" });
        assert!(err.is_validation());
        assert!(!err.is_conflict());

        let err = EngineError::NotFound {
            entity: EntityKind::Task,
        };
        assert!(err.is_not_found());

        let err = EngineError::SnoozeLimitReached { count: 3, max: 3 };
        assert!(err.is_snooze_limit());
    }

    #[test]
    fn delivery_retry_eligibility() {
        assert!(DeliveryError::Transient {
            reason: "timeout".into()
        }
        .is_retryable());
        assert!(!DeliveryError::Permanent {
            reason: "bad address".into()
        }
        .is_retryable());
        assert!(!DeliveryError::RetriesExhausted {
            attempts: 3,
            reason: "timeout".into()
        }
        .is_retryable());
    }
}
