//! Task model, drafts, patches, and field validation.
//!
//! Validation runs before any version check so a malformed request never
//! consumes a version slot. The completion invariant
//! `progress == 100 <=> completed` is normalized on every mutation, in
//! both directions.

pub mod store;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::recurrence::RecurrenceRule;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_TAGS: usize = 50;

/// Earliest year a due date may fall in.
const DUE_DATE_FLOOR_YEAR: i32 = 2000;
/// Due dates further out than this many years are rejected.
const DUE_DATE_HORIZON_YEARS: i64 = 100;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// A task owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Parent task when this is a subtask. Subtasks may not have their
    /// own subtasks (depth <= 2), checked at create/update time.
    pub parent_task_id: Option<String>,
    pub estimated_pomodoros: u32,
    pub actual_pomodoros: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0..=100. Exactly 100 iff `completed`.
    pub progress: u8,
    /// Rule for materializing the next instance on completion.
    pub recurrence: Option<RecurrenceRule>,
    /// How many successor instances this series has produced so far.
    /// Carried forward onto each materialized row.
    pub occurrences_spawned: u32,
    /// Optimistic concurrency counter. Starts at 1, +1 per successful
    /// mutation, compared on every update.
    pub sync_version: i64,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh task from a validated draft. Version starts at 1.
    pub fn from_draft(owner_id: impl Into<String>, draft: TaskDraft, now: DateTime<Utc>) -> Self {
        Task {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.into(),
            project_id: draft.project_id,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            due_date: draft.due_date,
            tags: draft.tags,
            parent_task_id: draft.parent_task_id,
            estimated_pomodoros: draft.estimated_pomodoros,
            actual_pomodoros: 0,
            completed: false,
            completed_at: None,
            progress: 0,
            recurrence: draft.recurrence,
            occurrences_spawned: 0,
            sync_version: 1,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a validated patch, normalizing the completion invariant.
    ///
    /// Setting progress to 100 marks the task complete; an explicit
    /// progress below 100 un-completes it. The version bump happens at
    /// the store, not here.
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = Some(due_date);
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(project_id) = &patch.project_id {
            self.project_id = Some(project_id.clone());
        }
        if let Some(estimated) = patch.estimated_pomodoros {
            self.estimated_pomodoros = estimated;
        }
        if let Some(recurrence) = &patch.recurrence {
            self.recurrence = Some(recurrence.clone());
        }

        if let Some(progress) = patch.progress {
            self.progress = progress;
            if progress == 100 {
                self.mark_completed(now);
            } else {
                self.completed = false;
                self.completed_at = None;
            }
        }
        match patch.completed {
            Some(true) => {
                self.progress = 100;
                self.mark_completed(now);
            }
            Some(false) => {
                // Validation guarantees an explicit progress < 100
                // accompanied this, which already cleared the flag.
                self.completed = false;
                self.completed_at = None;
            }
            None => {}
        }

        self.updated_at = now;
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        if !self.completed {
            self.completed = true;
            self.completed_at = Some(now);
        }
    }
}

/// Fields a client supplies when creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default = "default_estimated_pomodoros")]
    pub estimated_pomodoros: u32,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
}

fn default_estimated_pomodoros() -> u32 {
    1
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        TaskDraft {
            title: title.into(),
            estimated_pomodoros: 1,
            ..Default::default()
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub estimated_pomodoros: Option<u32>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
}

impl TaskPatch {
    pub fn completing() -> Self {
        TaskPatch {
            completed: Some(true),
            ..Default::default()
        }
    }

    /// Whether applying this patch to `current` would complete it.
    pub fn completes(&self, current: &Task) -> bool {
        if current.completed {
            return false;
        }
        self.completed == Some(true) || self.progress == Some(100)
    }
}

// ── Field validation ─────────────────────────────────────────────────

pub(crate) fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::Empty { field: "title" });
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TooLong {
            field: "title",
            max: MAX_TITLE_LEN,
        });
    }
    Ok(())
}

pub(crate) fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description",
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(())
}

pub(crate) fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags {
            count: tags.len(),
            max: MAX_TAGS,
        });
    }
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::Empty { field: "tags" });
    }
    Ok(())
}

/// Past due dates are accepted (offline clients submit late edits); only
/// wildly implausible values are rejected.
pub(crate) fn validate_due_date(
    due: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    let horizon = now + Duration::days(365 * DUE_DATE_HORIZON_YEARS);
    if due.year() < DUE_DATE_FLOOR_YEAR || due > horizon {
        return Err(ValidationError::DueDateOutOfRange { value: due });
    }
    Ok(())
}

pub(crate) fn validate_progress(progress: u8) -> Result<(), ValidationError> {
    if progress > 100 {
        return Err(ValidationError::ProgressOutOfRange(progress));
    }
    Ok(())
}

/// Validate a draft. `parent` must be the resolved parent task when
/// `parent_task_id` is set; the store looks it up before calling.
pub fn validate_draft(
    draft: &TaskDraft,
    parent: Option<&Task>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    validate_title(&draft.title)?;
    if let Some(description) = &draft.description {
        validate_description(description)?;
    }
    validate_tags(&draft.tags)?;
    if let Some(due) = draft.due_date {
        validate_due_date(due, now)?;
    }
    if let Some(parent) = parent {
        if parent.parent_task_id.is_some() {
            return Err(ValidationError::SubtaskDepthExceeded);
        }
    }
    if let Some(rule) = &draft.recurrence {
        rule.validate()?;
    }
    Ok(())
}

/// Validate a patch against the task it would apply to.
pub fn validate_patch(
    patch: &TaskPatch,
    current: &Task,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    if let Some(description) = &patch.description {
        validate_description(description)?;
    }
    if let Some(tags) = &patch.tags {
        validate_tags(tags)?;
    }
    if let Some(due) = patch.due_date {
        validate_due_date(due, now)?;
    }
    if let Some(progress) = patch.progress {
        validate_progress(progress)?;
    }
    if let Some(rule) = &patch.recurrence {
        rule.validate()?;
    }
    // Un-completing must state the new progress explicitly; the engine
    // never invents one.
    if patch.completed == Some(false)
        && current.completed
        && !matches!(patch.progress, Some(p) if p < 100)
    {
        return Err(ValidationError::UncompleteWithoutProgress);
    }
    // Contradictory patch: completed=false alongside progress=100.
    if patch.completed == Some(false) && patch.progress == Some(100) {
        return Err(ValidationError::UncompleteWithoutProgress);
    }
    Ok(())
}
