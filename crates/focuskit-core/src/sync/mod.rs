//! Batch sync types.
//!
//! A device submits the changes it queued while offline; each change
//! carries the version its copy was based on. Per-change outcomes are
//! strongly typed: applied, conflict (with the authoritative record
//! echoed back), or rejected.

pub mod coordinator;

pub use coordinator::SyncCoordinator;

use serde::{Deserialize, Serialize};

use crate::error::{ConflictRecord, EntityKind};
use crate::reminder::ReminderDraft;
use crate::session::{CompletionInput, SessionAction, SessionDraft};
use crate::task::{TaskDraft, TaskPatch};

/// One queued client-side change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientChange {
    /// Client-local correlation id, echoed back in the result.
    pub change_id: String,
    #[serde(flatten)]
    pub op: ChangeOp,
}

/// The operation a change performs. Mutating ops carry the version the
/// client last observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    CreateTask {
        draft: TaskDraft,
    },
    UpdateTask {
        id: String,
        patch: TaskPatch,
        expected_version: i64,
    },
    DeleteTask {
        id: String,
        expected_version: i64,
    },
    CreateSession {
        draft: SessionDraft,
    },
    SessionTransition {
        id: String,
        action: SessionAction,
        /// Ratings/notes; only meaningful for `complete`.
        #[serde(default)]
        completion: Option<CompletionInput>,
        expected_version: i64,
    },
    CreateReminder {
        draft: ReminderDraft,
    },
    AcknowledgeReminder {
        id: String,
        expected_version: i64,
    },
    SnoozeReminder {
        id: String,
        minutes: i64,
        expected_version: i64,
    },
    CancelReminder {
        id: String,
        expected_version: i64,
    },
}

/// Why a change was rejected outright (no retry will help without a
/// different request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    Validation,
    NotFound,
    InvalidTransition,
    SnoozeLimitReached,
    Delivery,
}

/// Outcome of a single change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// The change landed; clients must adopt the new version.
    Applied {
        entity: EntityKind,
        id: String,
        new_version: i64,
    },
    /// Version mismatch. The authoritative record is echoed back for
    /// client-side merge and retry; the engine never merges.
    Conflict {
        entity: EntityKind,
        id: String,
        submitted_version: i64,
        current: ConflictRecord,
    },
    Rejected {
        kind: RejectKind,
        reason: String,
    },
}

impl ChangeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ChangeOutcome::Applied { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ChangeOutcome::Conflict { .. })
    }
}

/// Per-change result, correlated by `change_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResult {
    pub change_id: String,
    pub outcome: ChangeOutcome,
}

/// Result of one batch application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub owner_id: String,
    pub results: Vec<ChangeResult>,
    pub applied: usize,
    pub conflicts: usize,
    pub rejected: usize,
}

impl SyncReport {
    pub(crate) fn new(owner_id: &str, results: Vec<ChangeResult>) -> Self {
        let applied = results.iter().filter(|r| r.outcome.is_applied()).count();
        let conflicts = results.iter().filter(|r| r.outcome.is_conflict()).count();
        let rejected = results.len() - applied - conflicts;
        Self {
            owner_id: owner_id.to_string(),
            results,
            applied,
            conflicts,
            rejected,
        }
    }
}
