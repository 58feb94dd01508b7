//! Session operations over the transition table.
//!
//! Each operation loads the session, validates the move, applies the
//! effects to a copy, and compare-and-swaps on the loaded version. An
//! illegal move or a stale version leaves the stored record untouched;
//! there are no partial effects.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{ConflictRecord, EngineError, EntityKind, Result};
use crate::events::Event;
use crate::stats::StatisticsAggregator;
use crate::storage::{CasOutcome, SessionRepository};

use super::{
    CompletionInput, PomodoroSession, SessionAction, SessionDraft, SessionStatus, SessionType,
};

/// Owner-scoped session operations.
#[derive(Clone)]
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    stats: Arc<StatisticsAggregator>,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        stats: Arc<StatisticsAggregator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repo, stats, clock }
    }

    /// Create a session in `ready` at version 1.
    pub fn create(&self, owner_id: &str, draft: SessionDraft) -> Result<PomodoroSession> {
        draft.validate()?;
        let session = PomodoroSession::from_draft(owner_id, draft, self.clock.now());
        self.repo.insert_session(&session)?;
        debug!(owner_id, session_id = %session.id, "session created");
        Ok(session)
    }

    pub fn get(&self, owner_id: &str, id: &str) -> Result<PomodoroSession> {
        self.load(owner_id, id)
    }

    /// `ready|paused -> running`. Records `started_at` on the first
    /// entry only.
    pub fn start(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<(PomodoroSession, Event)> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, SessionAction::Start, expected_version)?;

        let mut updated = current.clone();
        updated.status = SessionStatus::Running;
        if updated.started_at.is_none() {
            updated.started_at = Some(now);
        }
        updated.last_resumed_at = Some(now);
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let session = self.write(updated, current.sync_version, expected_version)?;
        let event = Event::SessionStarted {
            session_id: session.id.clone(),
            kind: session.kind,
            task_id: session.task_id.clone(),
            at: now,
        };
        Ok((session, event))
    }

    /// `running -> paused`, flushing the elapsed wall-clock time.
    pub fn pause(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<(PomodoroSession, Event)> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, SessionAction::Pause, expected_version)?;

        let mut updated = current.clone();
        updated.flush_elapsed(now);
        updated.status = SessionStatus::Paused;
        updated.last_resumed_at = None;
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let session = self.write(updated, current.sync_version, expected_version)?;
        let event = Event::SessionPaused {
            session_id: session.id.clone(),
            remaining_ms: session.remaining_ms,
            at: now,
        };
        Ok((session, event))
    }

    /// `paused -> running`.
    pub fn resume(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<(PomodoroSession, Event)> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, SessionAction::Resume, expected_version)?;

        let mut updated = current.clone();
        updated.status = SessionStatus::Running;
        updated.last_resumed_at = Some(now);
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let session = self.write(updated, current.sync_version, expected_version)?;
        let event = Event::SessionResumed {
            session_id: session.id.clone(),
            remaining_ms: session.remaining_ms,
            at: now,
        };
        Ok((session, event))
    }

    /// `running|paused -> completed`.
    ///
    /// For a work session linked to a task, the task's pomodoro counter
    /// increments in the same storage transaction as the terminal write;
    /// either both land or neither does. The owner-day rollup is
    /// invalidated afterwards so the next stats read recomputes it.
    pub fn complete(
        &self,
        owner_id: &str,
        id: &str,
        input: CompletionInput,
        expected_version: Option<i64>,
    ) -> Result<(PomodoroSession, Event)> {
        input.validate()?;
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, SessionAction::Complete, expected_version)?;

        let mut updated = current.clone();
        if updated.status == SessionStatus::Running {
            updated.flush_elapsed(now);
        }
        updated.status = SessionStatus::Completed;
        updated.completed_at = Some(now);
        updated.last_resumed_at = None;
        updated.productivity_rating = input.productivity_rating;
        updated.focus_rating = input.focus_rating;
        updated.interruptions = input.interruptions;
        updated.notes = input.notes;
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let counted_task = match updated.kind {
            SessionType::Work => updated.task_id.clone(),
            _ => None,
        };
        let session = match self.repo.complete_session_with_task(
            &updated,
            current.sync_version,
            counted_task.as_deref(),
            now,
        )? {
            CasOutcome::Applied(session) => session,
            CasOutcome::VersionMismatch(current) => {
                return Err(conflict(expected_version, current));
            }
        };

        self.stats.invalidate(owner_id, now.date_naive());
        debug!(owner_id, session_id = %session.id, "session completed");
        let event = Event::SessionCompleted {
            session_id: session.id.clone(),
            kind: session.kind,
            task_id: session.task_id.clone(),
            elapsed_minutes: session.elapsed_minutes(),
            at: now,
        };
        Ok((session, event))
    }

    /// Any non-terminal state `-> cancelled`.
    pub fn cancel(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<(PomodoroSession, Event)> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, SessionAction::Cancel, expected_version)?;

        let mut updated = current.clone();
        if updated.status == SessionStatus::Running {
            updated.flush_elapsed(now);
        }
        updated.status = SessionStatus::Cancelled;
        updated.last_resumed_at = None;
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let session = self.write(updated, current.sync_version, expected_version)?;
        let event = Event::SessionCancelled {
            session_id: session.id.clone(),
            at: now,
        };
        Ok((session, event))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn load(&self, owner_id: &str, id: &str) -> Result<PomodoroSession> {
        self.repo
            .get_session(owner_id, id)?
            .ok_or(EngineError::NotFound {
                entity: EntityKind::Session,
            })
    }

    /// Load + version guard + transition check, in that order.
    fn guarded(
        &self,
        owner_id: &str,
        id: &str,
        action: SessionAction,
        expected_version: Option<i64>,
    ) -> Result<PomodoroSession> {
        let current = self.load(owner_id, id)?;
        if let Some(expected) = expected_version {
            if expected != current.sync_version {
                return Err(conflict(expected_version, current));
            }
        }
        if !action.legal_from(current.status) {
            warn!(
                owner_id,
                session_id = id,
                from = current.status.as_str(),
                operation = action.as_str(),
                "invalid session transition"
            );
            return Err(EngineError::InvalidTransition {
                entity: EntityKind::Session,
                from: current.status.as_str().to_string(),
                operation: action.as_str().to_string(),
            });
        }
        Ok(current)
    }

    fn write(
        &self,
        updated: PomodoroSession,
        loaded_version: i64,
        expected_version: Option<i64>,
    ) -> Result<PomodoroSession> {
        match self.repo.update_session_if_version(&updated, loaded_version)? {
            CasOutcome::Applied(session) => Ok(session),
            CasOutcome::VersionMismatch(current) => Err(conflict(expected_version, current)),
        }
    }
}

fn conflict(expected_version: Option<i64>, current: PomodoroSession) -> EngineError {
    EngineError::Conflict {
        submitted: expected_version.unwrap_or(current.sync_version),
        current: ConflictRecord::Session(Box::new(current)),
    }
}
