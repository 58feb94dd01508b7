//! Persistence interface consumed by the engine.
//!
//! One repository trait per entity, all owner-scoped: every lookup takes
//! the owner id, and a record owned by someone else is indistinguishable
//! from a missing one. Mutations go through per-entity compare-and-swap
//! on `sync_version`; the store never holds long locks across requests.
//!
//! Callers pass the updated entity with `sync_version` already set to
//! `expected + 1`; the repository atomically verifies the stored version
//! still equals `expected` before writing.

mod config;
pub mod database;
pub mod memory;

pub use config::{DeliveryPolicy, EngineConfig, PomodoroConfig, ReminderPolicy};
pub use database::SqliteStore;
pub use memory::InMemoryStore;

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::reminder::delivery::DeliveryAttempt;
use crate::reminder::Reminder;
use crate::session::PomodoroSession;
use crate::task::Task;

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    /// The write landed; the stored record now equals this.
    Applied(T),
    /// The stored version moved on; carries the current record.
    VersionMismatch(T),
}

pub trait TaskRepository: Send + Sync {
    fn insert_task(&self, task: &Task) -> Result<(), StorageError>;
    fn get_task(&self, owner_id: &str, id: &str) -> Result<Option<Task>, StorageError>;
    fn update_task_if_version(
        &self,
        task: &Task,
        expected: i64,
    ) -> Result<CasOutcome<Task>, StorageError>;
    fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, StorageError>;
    fn list_tasks_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError>;
    fn list_tasks_updated_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError>;
}

pub trait SessionRepository: Send + Sync {
    fn insert_session(&self, session: &PomodoroSession) -> Result<(), StorageError>;
    fn get_session(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<PomodoroSession>, StorageError>;
    fn update_session_if_version(
        &self,
        session: &PomodoroSession,
        expected: i64,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError>;
    fn list_sessions_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PomodoroSession>, StorageError>;

    /// Write the terminal session state and bump the linked task's
    /// `actual_pomodoros` as one atomic unit: either both land or
    /// neither does. A missing or deleted task skips the increment but
    /// still commits the session write.
    fn complete_session_with_task(
        &self,
        session: &PomodoroSession,
        expected: i64,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError>;
}

pub trait ReminderRepository: Send + Sync {
    fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StorageError>;
    fn get_reminder(&self, owner_id: &str, id: &str) -> Result<Option<Reminder>, StorageError>;
    fn update_reminder_if_version(
        &self,
        reminder: &Reminder,
        expected: i64,
    ) -> Result<CasOutcome<Reminder>, StorageError>;
    /// Pending reminders past their scheduled time plus snoozed ones
    /// past their snooze window.
    fn list_due_reminders(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StorageError>;
    /// All non-terminal reminders for the owner.
    fn list_active_reminders(&self, owner_id: &str) -> Result<Vec<Reminder>, StorageError>;
    fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StorageError>;
    fn list_delivery_attempts(
        &self,
        owner_id: &str,
        reminder_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StorageError>;
}

/// The full persistence surface the engine consumes.
pub trait EngineRepository: TaskRepository + SessionRepository + ReminderRepository {}

impl<T: TaskRepository + SessionRepository + ReminderRepository> EngineRepository for T {}

/// Returns `~/.config/focuskit[-dev]/` based on FOCUSKIT_ENV.
///
/// Set FOCUSKIT_ENV=dev to use the development data directory.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FOCUSKIT_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("focuskit-dev")
    } else {
        base_dir.join("focuskit")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
