//! Pomodoro session model and transition table.
//!
//! ```text
//! ready -> running -> (paused -> running | completed | cancelled)
//! ```
//!
//! `completed` and `cancelled` are terminal. Illegal moves fail with
//! `InvalidTransition` and leave the session untouched.

pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What kind of step this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Work,
    ShortBreak,
    LongBreak,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ready,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Operations on the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Complete,
    Cancel,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Start => "start",
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Complete => "complete",
            SessionAction::Cancel => "cancel",
        }
    }

    /// Whether this action is legal from `from`.
    pub fn legal_from(&self, from: SessionStatus) -> bool {
        match self {
            SessionAction::Start => {
                matches!(from, SessionStatus::Ready | SessionStatus::Paused)
            }
            SessionAction::Pause => matches!(from, SessionStatus::Running),
            SessionAction::Resume => matches!(from, SessionStatus::Paused),
            SessionAction::Complete => {
                matches!(from, SessionStatus::Running | SessionStatus::Paused)
            }
            SessionAction::Cancel => !from.is_terminal(),
        }
    }

    pub fn target(&self) -> SessionStatus {
        match self {
            SessionAction::Start | SessionAction::Resume => SessionStatus::Running,
            SessionAction::Pause => SessionStatus::Paused,
            SessionAction::Complete => SessionStatus::Completed,
            SessionAction::Cancel => SessionStatus::Cancelled,
        }
    }
}

/// A single Pomodoro session.
///
/// References a task by id without owning it; the task may be deleted
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PomodoroSession {
    pub id: String,
    pub owner_id: String,
    pub task_id: Option<String>,
    pub kind: SessionType,
    pub planned_minutes: u32,
    /// Remaining time in milliseconds; flushed against the clock on
    /// pause/complete/cancel.
    pub remaining_ms: u64,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock instant the session last entered `running`.
    pub last_resumed_at: Option<DateTime<Utc>>,
    /// 1..=5, optional, recorded at completion.
    pub productivity_rating: Option<u8>,
    /// 1..=5, optional, recorded at completion.
    pub focus_rating: Option<u8>,
    pub interruptions: u32,
    pub notes: Option<String>,
    pub sync_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PomodoroSession {
    pub fn from_draft(
        owner_id: impl Into<String>,
        draft: SessionDraft,
        now: DateTime<Utc>,
    ) -> Self {
        PomodoroSession {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.into(),
            task_id: draft.task_id,
            kind: draft.kind,
            planned_minutes: draft.planned_minutes,
            remaining_ms: u64::from(draft.planned_minutes) * 60_000,
            status: SessionStatus::Ready,
            started_at: None,
            completed_at: None,
            last_resumed_at: None,
            productivity_rating: None,
            focus_rating: None,
            interruptions: 0,
            notes: None,
            sync_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Minutes actually spent, derived from the flushed remaining time.
    pub fn elapsed_minutes(&self) -> u64 {
        let planned_ms = u64::from(self.planned_minutes) * 60_000;
        planned_ms.saturating_sub(self.remaining_ms) / 60_000
    }

    /// Subtract wall-clock time spent running since the last resume.
    pub(crate) fn flush_elapsed(&mut self, now: DateTime<Utc>) {
        if let Some(resumed) = self.last_resumed_at {
            let elapsed_ms = (now - resumed).num_milliseconds().max(0) as u64;
            self.remaining_ms = self.remaining_ms.saturating_sub(elapsed_ms);
            self.last_resumed_at = Some(now);
        }
    }
}

/// Fields a client supplies when creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDraft {
    #[serde(default)]
    pub task_id: Option<String>,
    pub kind: SessionType,
    pub planned_minutes: u32,
}

impl SessionDraft {
    pub fn work(planned_minutes: u32, task_id: Option<String>) -> Self {
        SessionDraft {
            task_id,
            kind: SessionType::Work,
            planned_minutes,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.planned_minutes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "planned_minutes",
                message: "planned duration must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Ratings and notes recorded when a session completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionInput {
    #[serde(default)]
    pub productivity_rating: Option<u8>,
    #[serde(default)]
    pub focus_rating: Option<u8>,
    #[serde(default)]
    pub interruptions: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompletionInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for rating in [self.productivity_rating, self.focus_rating].into_iter().flatten() {
            if !(1..=5).contains(&rating) {
                return Err(ValidationError::RatingOutOfRange(rating));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use SessionAction::*;
        use SessionStatus::*;

        assert!(Start.legal_from(Ready));
        assert!(Start.legal_from(Paused));
        assert!(!Start.legal_from(Running));
        assert!(!Start.legal_from(Completed));

        assert!(Pause.legal_from(Running));
        assert!(!Pause.legal_from(Ready));
        assert!(!Pause.legal_from(Paused));

        assert!(Resume.legal_from(Paused));
        assert!(!Resume.legal_from(Running));

        assert!(Complete.legal_from(Running));
        assert!(Complete.legal_from(Paused));
        assert!(!Complete.legal_from(Ready));

        assert!(Cancel.legal_from(Ready));
        assert!(Cancel.legal_from(Running));
        assert!(Cancel.legal_from(Paused));
        assert!(!Cancel.legal_from(Cancelled));
        assert!(!Cancel.legal_from(Completed));
    }

    #[test]
    fn draft_starts_ready_with_full_budget() {
        let now = chrono::Utc::now();
        let session = PomodoroSession::from_draft("owner-1", SessionDraft::work(25, None), now);
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(session.remaining_ms, 25 * 60_000);
        assert_eq!(session.sync_version, 1);
        assert!(session.started_at.is_none());
    }

    #[test]
    fn elapsed_minutes_from_remaining() {
        let now = chrono::Utc::now();
        let mut session = PomodoroSession::from_draft("owner-1", SessionDraft::work(25, None), now);
        session.remaining_ms = 0;
        assert_eq!(session.elapsed_minutes(), 25);

        session.remaining_ms = 10 * 60_000;
        assert_eq!(session.elapsed_minutes(), 15);
    }

    #[test]
    fn completion_input_rating_bounds() {
        let ok = CompletionInput {
            productivity_rating: Some(5),
            focus_rating: Some(1),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = CompletionInput {
            focus_rating: Some(6),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let zero = CompletionInput {
            productivity_rating: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn zero_length_draft_rejected() {
        assert!(SessionDraft::work(0, None).validate().is_err());
    }
}
