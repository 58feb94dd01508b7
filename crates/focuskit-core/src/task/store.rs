//! Versioned task operations.
//!
//! Every mutation is read-then-decide: the caller supplies the version it
//! last observed, the store compares it against the stored record and
//! fails with a conflict carrying the authoritative copy on mismatch.
//! Field validation runs before any version comparison, so a malformed
//! request never consumes a version slot.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{ConflictRecord, EngineError, EntityKind, Result};
use crate::recurrence;
use crate::stats::StatisticsAggregator;
use crate::storage::{CasOutcome, TaskRepository};

use super::{validate_draft, validate_patch, Task, TaskDraft, TaskPatch, TaskPriority};

/// Filter for [`TaskStore::list_by_filter`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub priority: Option<TaskPriority>,
    pub tag: Option<String>,
    pub project_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub due_before: Option<DateTime<Utc>>,
    pub include_deleted: bool,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if !self.include_deleted && task.deleted {
            return false;
        }
        if let Some(completed) = self.completed {
            if task.completed != completed {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !task.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(project_id) = &self.project_id {
            if task.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        if let Some(parent_id) = &self.parent_task_id {
            if task.parent_task_id.as_deref() != Some(parent_id.as_str()) {
                return false;
            }
        }
        if let Some(due_before) = self.due_before {
            match task.due_date {
                Some(due) if due < due_before => {}
                _ => return false,
            }
        }
        true
    }
}

/// Owner-scoped task store with optimistic versioning.
#[derive(Clone)]
pub struct TaskStore {
    repo: Arc<dyn TaskRepository>,
    stats: Arc<StatisticsAggregator>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        stats: Arc<StatisticsAggregator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repo, stats, clock }
    }

    pub fn create(&self, owner_id: &str, draft: TaskDraft) -> Result<Task> {
        let now = self.clock.now();

        let parent = match &draft.parent_task_id {
            Some(parent_id) => Some(self.load(owner_id, parent_id)?),
            None => None,
        };
        validate_draft(&draft, parent.as_ref(), now)?;

        let task = Task::from_draft(owner_id, draft, now);
        self.repo.insert_task(&task)?;
        debug!(owner_id, task_id = %task.id, "task created");
        Ok(task)
    }

    pub fn get(&self, owner_id: &str, id: &str) -> Result<Task> {
        self.load(owner_id, id)
    }

    /// Apply a patch against the version the client last observed.
    ///
    /// On success the version increments by exactly 1. Completing a
    /// recurring task materializes the next instance as a fresh row at
    /// version 1.
    pub fn update(
        &self,
        owner_id: &str,
        id: &str,
        patch: &TaskPatch,
        expected_version: i64,
    ) -> Result<Task> {
        let now = self.clock.now();
        let current = self.load(owner_id, id)?;

        validate_patch(patch, &current, now)?;
        if expected_version != current.sync_version {
            return Err(conflict(expected_version, current));
        }

        let completing = patch.completes(&current);
        let mut updated = current.clone();
        updated.apply_patch(patch, now);
        updated.sync_version = current.sync_version + 1;

        // Decide on the successor before the write so the spawn counter
        // lands in the same version bump.
        let next_due = if completing {
            self.next_occurrence(&updated)
        } else {
            None
        };
        if next_due.is_some() {
            updated.occurrences_spawned += 1;
        }

        let updated = match self.repo.update_task_if_version(&updated, current.sync_version)? {
            CasOutcome::Applied(task) => task,
            CasOutcome::VersionMismatch(current) => {
                return Err(conflict(expected_version, current))
            }
        };

        if completing {
            if let Some(done_at) = updated.completed_at {
                self.stats.invalidate(owner_id, done_at.date_naive());
            }
            if let Some(due) = next_due {
                let next = self.materialize_next(&updated, due, now)?;
                info!(owner_id, task_id = %updated.id, next_id = %next.id, "materialized next occurrence");
            }
        }
        Ok(updated)
    }

    /// Soft delete: the row keeps its history and version counter; hard
    /// purge is out of scope.
    pub fn soft_delete(&self, owner_id: &str, id: &str, expected_version: i64) -> Result<Task> {
        let now = self.clock.now();
        let current = self.load(owner_id, id)?;
        if expected_version != current.sync_version {
            return Err(conflict(expected_version, current));
        }

        let mut updated = current.clone();
        updated.deleted = true;
        updated.deleted_at = Some(now);
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        match self.repo.update_task_if_version(&updated, current.sync_version)? {
            CasOutcome::Applied(task) => {
                debug!(owner_id, task_id = %task.id, "task soft-deleted");
                Ok(task)
            }
            CasOutcome::VersionMismatch(current) => Err(conflict(expected_version, current)),
        }
    }

    pub fn list_by_project(&self, owner_id: &str, project_id: &str) -> Result<Vec<Task>> {
        self.list_by_filter(
            owner_id,
            &TaskFilter {
                project_id: Some(project_id.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn list_by_filter(&self, owner_id: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self
            .repo
            .list_tasks(owner_id)?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn load(&self, owner_id: &str, id: &str) -> Result<Task> {
        match self.repo.get_task(owner_id, id)? {
            Some(task) if !task.deleted => Ok(task),
            _ => Err(EngineError::NotFound {
                entity: EntityKind::Task,
            }),
        }
    }

    fn next_occurrence(&self, completed: &Task) -> Option<chrono::NaiveDate> {
        let rule = completed.recurrence.as_ref()?;
        let from = completed
            .completed_at
            .map(|at| at.date_naive())
            .unwrap_or_else(|| self.clock.now().date_naive());
        recurrence::next(rule, from, completed.occurrences_spawned)
    }

    fn materialize_next(
        &self,
        completed: &Task,
        due: chrono::NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let time_of_day = completed
            .due_date
            .map(|d| d.time())
            .unwrap_or(NaiveTime::MIN);
        let mut next = Task::from_draft(
            completed.owner_id.clone(),
            TaskDraft {
                title: completed.title.clone(),
                description: completed.description.clone(),
                priority: completed.priority,
                due_date: Some(due.and_time(time_of_day).and_utc()),
                tags: completed.tags.clone(),
                project_id: completed.project_id.clone(),
                parent_task_id: completed.parent_task_id.clone(),
                estimated_pomodoros: completed.estimated_pomodoros,
                recurrence: completed.recurrence.clone(),
            },
            now,
        );
        next.occurrences_spawned = completed.occurrences_spawned;
        self.repo.insert_task(&next)?;
        Ok(next)
    }
}

fn conflict(submitted: i64, current: Task) -> EngineError {
    EngineError::Conflict {
        submitted,
        current: ConflictRecord::Task(Box::new(current)),
    }
}
