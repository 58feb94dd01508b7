//! Batch application of client changes.
//!
//! Changes apply in submission order through the same services the
//! interactive API uses, so every invariant (validation ordering,
//! version checks, transition table, side effects) holds identically for
//! synced edits. A conflict or rejection never aborts the rest of the
//! batch; only a storage failure does.

use chrono::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::reminder::scheduler::ReminderScheduler;
use crate::session::state_machine::SessionService;
use crate::session::SessionAction;
use crate::sync::{ChangeOp, ChangeOutcome, ChangeResult, ClientChange, RejectKind, SyncReport};
use crate::task::store::TaskStore;

#[derive(Clone)]
pub struct SyncCoordinator {
    tasks: TaskStore,
    sessions: SessionService,
    reminders: ReminderScheduler,
}

impl SyncCoordinator {
    pub fn new(tasks: TaskStore, sessions: SessionService, reminders: ReminderScheduler) -> Self {
        Self {
            tasks,
            sessions,
            reminders,
        }
    }

    /// Apply a batch of queued changes for one owner.
    ///
    /// Returns per-change outcomes; fails as a whole only when storage
    /// itself fails (in which case nothing further is attempted).
    pub fn apply_batch(&self, owner_id: &str, changes: Vec<ClientChange>) -> Result<SyncReport> {
        debug!(owner_id, count = changes.len(), "applying sync batch");
        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            let outcome = match self.apply_one(owner_id, &change.op) {
                Ok(outcome) => outcome,
                Err(err) => classify(err)?,
            };
            results.push(ChangeResult {
                change_id: change.change_id,
                outcome,
            });
        }
        let report = SyncReport::new(owner_id, results);
        info!(
            owner_id,
            applied = report.applied,
            conflicts = report.conflicts,
            rejected = report.rejected,
            "sync batch done"
        );
        Ok(report)
    }

    fn apply_one(&self, owner_id: &str, op: &ChangeOp) -> Result<ChangeOutcome> {
        use crate::error::EntityKind::*;

        let outcome = match op {
            ChangeOp::CreateTask { draft } => {
                let task = self.tasks.create(owner_id, draft.clone())?;
                applied(Task, task.id, task.sync_version)
            }
            ChangeOp::UpdateTask {
                id,
                patch,
                expected_version,
            } => {
                let task = self.tasks.update(owner_id, id, patch, *expected_version)?;
                applied(Task, task.id, task.sync_version)
            }
            ChangeOp::DeleteTask {
                id,
                expected_version,
            } => {
                let task = self.tasks.soft_delete(owner_id, id, *expected_version)?;
                applied(Task, task.id, task.sync_version)
            }
            ChangeOp::CreateSession { draft } => {
                let session = self.sessions.create(owner_id, draft.clone())?;
                applied(Session, session.id, session.sync_version)
            }
            ChangeOp::SessionTransition {
                id,
                action,
                completion,
                expected_version,
            } => {
                let expected = Some(*expected_version);
                let (session, _event) = match action {
                    SessionAction::Start => self.sessions.start(owner_id, id, expected)?,
                    SessionAction::Pause => self.sessions.pause(owner_id, id, expected)?,
                    SessionAction::Resume => self.sessions.resume(owner_id, id, expected)?,
                    SessionAction::Complete => self.sessions.complete(
                        owner_id,
                        id,
                        completion.clone().unwrap_or_default(),
                        expected,
                    )?,
                    SessionAction::Cancel => self.sessions.cancel(owner_id, id, expected)?,
                };
                applied(Session, session.id, session.sync_version)
            }
            ChangeOp::CreateReminder { draft } => {
                let reminder = self.reminders.schedule(owner_id, draft.clone())?;
                applied(Reminder, reminder.id, reminder.sync_version)
            }
            ChangeOp::AcknowledgeReminder {
                id,
                expected_version,
            } => {
                let outcome =
                    self.reminders
                        .acknowledge(owner_id, id, Some(*expected_version))?;
                applied(
                    Reminder,
                    outcome.reminder.id,
                    outcome.reminder.sync_version,
                )
            }
            ChangeOp::SnoozeReminder {
                id,
                minutes,
                expected_version,
            } => {
                let (reminder, _event) = self.reminders.snooze(
                    owner_id,
                    id,
                    Duration::minutes(*minutes),
                    Some(*expected_version),
                )?;
                applied(Reminder, reminder.id, reminder.sync_version)
            }
            ChangeOp::CancelReminder {
                id,
                expected_version,
            } => {
                let reminder = self
                    .reminders
                    .cancel(owner_id, id, Some(*expected_version))?;
                applied(Reminder, reminder.id, reminder.sync_version)
            }
        };
        Ok(outcome)
    }
}

fn applied(entity: crate::error::EntityKind, id: String, new_version: i64) -> ChangeOutcome {
    ChangeOutcome::Applied {
        entity,
        id,
        new_version,
    }
}

/// Turn a per-change engine error into its outcome. Storage failures
/// stay errors and abort the batch.
fn classify(err: EngineError) -> Result<ChangeOutcome> {
    let outcome = match &err {
        EngineError::Conflict { submitted, current } => ChangeOutcome::Conflict {
            entity: current.entity_kind(),
            id: current.entity_id().to_string(),
            submitted_version: *submitted,
            current: current.clone(),
        },
        EngineError::Validation(_) => rejected(RejectKind::Validation, &err),
        EngineError::NotFound { .. } => rejected(RejectKind::NotFound, &err),
        EngineError::InvalidTransition { .. } => rejected(RejectKind::InvalidTransition, &err),
        EngineError::SnoozeLimitReached { .. } => rejected(RejectKind::SnoozeLimitReached, &err),
        EngineError::Delivery(_) => rejected(RejectKind::Delivery, &err),
        EngineError::Storage(_) => return Err(err),
    };
    Ok(outcome)
}

fn rejected(kind: RejectKind, err: &EngineError) -> ChangeOutcome {
    ChangeOutcome::Rejected {
        kind,
        reason: err.to_string(),
    }
}
