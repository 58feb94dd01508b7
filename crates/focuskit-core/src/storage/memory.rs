//! In-memory store for tests and embedded use.
//!
//! Entities live behind per-key `Arc<Mutex<_>>` entries inside a shared
//! map, so compare-and-swap on one record never blocks writers of
//! another. The outer `RwLock` only guards map membership.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::reminder::delivery::DeliveryAttempt;
use crate::reminder::{Reminder, ReminderStatus};
use crate::session::PomodoroSession;
use crate::task::Task;

use super::{CasOutcome, ReminderRepository, SessionRepository, TaskRepository};

type Key = (String, String);
type Shard<T> = RwLock<HashMap<Key, Arc<Mutex<T>>>>;

#[derive(Default)]
pub struct InMemoryStore {
    tasks: Shard<Task>,
    sessions: Shard<PomodoroSession>,
    reminders: Shard<Reminder>,
    delivery_log: Mutex<Vec<DeliveryAttempt>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(owner_id: &str, id: &str) -> Key {
    (owner_id.to_string(), id.to_string())
}

fn insert_new<T>(shard: &Shard<T>, k: Key, value: T) -> Result<(), StorageError> {
    let mut map = shard.write().unwrap();
    if map.contains_key(&k) {
        return Err(StorageError::QueryFailed(format!(
            "duplicate id: {}",
            k.1
        )));
    }
    map.insert(k, Arc::new(Mutex::new(value)));
    Ok(())
}

fn entry<T>(shard: &Shard<T>, owner_id: &str, id: &str) -> Option<Arc<Mutex<T>>> {
    shard.read().unwrap().get(&key(owner_id, id)).cloned()
}

fn get_clone<T: Clone>(shard: &Shard<T>, owner_id: &str, id: &str) -> Option<T> {
    entry(shard, owner_id, id).map(|cell| cell.lock().unwrap().clone())
}

/// Per-key compare-and-swap: the entry mutex is the only lock held while
/// the version is checked and the value replaced.
fn cas<T: Clone>(
    shard: &Shard<T>,
    owner_id: &str,
    id: &str,
    updated: &T,
    expected: i64,
    version_of: impl Fn(&T) -> i64,
) -> Result<CasOutcome<T>, StorageError> {
    let cell = entry(shard, owner_id, id).ok_or_else(|| {
        StorageError::QueryFailed(format!("missing row during conditional update: {id}"))
    })?;
    let mut stored = cell.lock().unwrap();
    if version_of(&stored) != expected {
        return Ok(CasOutcome::VersionMismatch(stored.clone()));
    }
    *stored = updated.clone();
    Ok(CasOutcome::Applied(updated.clone()))
}

fn list_owned<T: Clone>(shard: &Shard<T>, owner_id: &str) -> Vec<T> {
    shard
        .read()
        .unwrap()
        .iter()
        .filter(|((owner, _), _)| owner == owner_id)
        .map(|(_, cell)| cell.lock().unwrap().clone())
        .collect()
}

impl TaskRepository for InMemoryStore {
    fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        insert_new(&self.tasks, key(&task.owner_id, &task.id), task.clone())
    }

    fn get_task(&self, owner_id: &str, id: &str) -> Result<Option<Task>, StorageError> {
        Ok(get_clone(&self.tasks, owner_id, id))
    }

    fn update_task_if_version(
        &self,
        task: &Task,
        expected: i64,
    ) -> Result<CasOutcome<Task>, StorageError> {
        cas(&self.tasks, &task.owner_id, &task.id, task, expected, |t| {
            t.sync_version
        })
    }

    fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, StorageError> {
        let mut tasks = list_owned(&self.tasks, owner_id);
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    fn list_tasks_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        Ok(list_owned(&self.tasks, owner_id)
            .into_iter()
            .filter(|t| {
                !t.deleted
                    && t.completed_at
                        .map(|at| at >= start && at < end)
                        .unwrap_or(false)
            })
            .collect())
    }

    fn list_tasks_updated_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        Ok(list_owned(&self.tasks, owner_id)
            .into_iter()
            .filter(|t| !t.deleted && t.updated_at >= start && t.updated_at < end)
            .collect())
    }
}

impl SessionRepository for InMemoryStore {
    fn insert_session(&self, session: &PomodoroSession) -> Result<(), StorageError> {
        insert_new(
            &self.sessions,
            key(&session.owner_id, &session.id),
            session.clone(),
        )
    }

    fn get_session(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<PomodoroSession>, StorageError> {
        Ok(get_clone(&self.sessions, owner_id, id))
    }

    fn update_session_if_version(
        &self,
        session: &PomodoroSession,
        expected: i64,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError> {
        cas(
            &self.sessions,
            &session.owner_id,
            &session.id,
            session,
            expected,
            |s| s.sync_version,
        )
    }

    fn list_sessions_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PomodoroSession>, StorageError> {
        Ok(list_owned(&self.sessions, owner_id)
            .into_iter()
            .filter(|s| {
                s.completed_at
                    .map(|at| at >= start && at < end)
                    .unwrap_or(false)
            })
            .collect())
    }

    fn complete_session_with_task(
        &self,
        session: &PomodoroSession,
        expected: i64,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError> {
        let cell = entry(&self.sessions, &session.owner_id, &session.id).ok_or_else(|| {
            StorageError::QueryFailed(format!(
                "missing row during conditional update: {}",
                session.id
            ))
        })?;
        // The session entry lock is held across both writes; this is the
        // only code path that takes a task lock while holding a session
        // lock, so the ordering cannot deadlock.
        let mut stored = cell.lock().unwrap();
        if stored.sync_version != expected {
            return Ok(CasOutcome::VersionMismatch(stored.clone()));
        }
        if let Some(task_id) = task_id {
            if let Some(task_cell) = entry(&self.tasks, &session.owner_id, task_id) {
                let mut task = task_cell.lock().unwrap();
                if !task.deleted {
                    task.actual_pomodoros += 1;
                    task.sync_version += 1;
                    task.updated_at = now;
                }
            }
        }
        *stored = session.clone();
        Ok(CasOutcome::Applied(session.clone()))
    }
}

impl ReminderRepository for InMemoryStore {
    fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StorageError> {
        insert_new(
            &self.reminders,
            key(&reminder.owner_id, &reminder.id),
            reminder.clone(),
        )
    }

    fn get_reminder(&self, owner_id: &str, id: &str) -> Result<Option<Reminder>, StorageError> {
        Ok(get_clone(&self.reminders, owner_id, id))
    }

    fn update_reminder_if_version(
        &self,
        reminder: &Reminder,
        expected: i64,
    ) -> Result<CasOutcome<Reminder>, StorageError> {
        cas(
            &self.reminders,
            &reminder.owner_id,
            &reminder.id,
            reminder,
            expected,
            |r| r.sync_version,
        )
    }

    fn list_due_reminders(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StorageError> {
        Ok(list_owned(&self.reminders, owner_id)
            .into_iter()
            .filter(|r| match r.status {
                ReminderStatus::Pending => now >= r.remind_at,
                ReminderStatus::Snoozed => r.snooze_until.map(|u| now >= u).unwrap_or(false),
                _ => false,
            })
            .collect())
    }

    fn list_active_reminders(&self, owner_id: &str) -> Result<Vec<Reminder>, StorageError> {
        Ok(list_owned(&self.reminders, owner_id)
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect())
    }

    fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StorageError> {
        self.delivery_log.lock().unwrap().push(attempt.clone());
        Ok(())
    }

    fn list_delivery_attempts(
        &self,
        owner_id: &str,
        reminder_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StorageError> {
        Ok(self
            .delivery_log
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.owner_id == owner_id && a.reminder_id == reminder_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDraft;

    fn now() -> DateTime<Utc> {
        "2026-03-10T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let store = InMemoryStore::new();
        let task = Task::from_draft("owner-1", TaskDraft::new("a"), now());
        store.insert_task(&task).unwrap();
        assert!(store.insert_task(&task).is_err());
    }

    #[test]
    fn ownership_scopes_lookups() {
        let store = InMemoryStore::new();
        let task = Task::from_draft("owner-1", TaskDraft::new("a"), now());
        store.insert_task(&task).unwrap();

        assert!(store.get_task("owner-1", &task.id).unwrap().is_some());
        assert!(store.get_task("owner-2", &task.id).unwrap().is_none());
    }

    #[test]
    fn cas_detects_stale_version() {
        let store = InMemoryStore::new();
        let mut task = Task::from_draft("owner-1", TaskDraft::new("a"), now());
        store.insert_task(&task).unwrap();

        task.title = "b".into();
        task.sync_version = 2;
        match store.update_task_if_version(&task, 1).unwrap() {
            CasOutcome::Applied(t) => assert_eq!(t.sync_version, 2),
            CasOutcome::VersionMismatch(_) => panic!("expected applied"),
        }

        // Same expected version again: stale.
        task.sync_version = 2;
        match store.update_task_if_version(&task, 1).unwrap() {
            CasOutcome::VersionMismatch(current) => assert_eq!(current.sync_version, 2),
            CasOutcome::Applied(_) => panic!("expected mismatch"),
        }
    }

    #[test]
    fn concurrent_cas_single_winner() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(InMemoryStore::new());
        let task = Task::from_draft("owner-1", TaskDraft::new("contended"), now());
        store.insert_task(&task).unwrap();

        let wins = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let wins = Arc::clone(&wins);
            let mut updated = task.clone();
            handles.push(std::thread::spawn(move || {
                updated.title = format!("writer-{i}");
                updated.sync_version = 2;
                if let CasOutcome::Applied(_) = store.update_task_if_version(&updated, 1).unwrap() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
