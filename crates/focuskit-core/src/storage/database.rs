//! SQLite-backed store.
//!
//! Conditional writes are single `UPDATE ... WHERE sync_version = ?`
//! statements, so the compare-and-swap happens inside SQLite without any
//! lock held by the engine. The session-completion pair (terminal session
//! write + task counter bump) runs in one transaction.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::StorageError;
use crate::recurrence::RecurrenceRule;
use crate::reminder::delivery::{AttemptOutcome, DeliveryAttempt};
use crate::reminder::{DeliveryMethod, Reminder, ReminderKind, ReminderStatus};
use crate::session::{PomodoroSession, SessionStatus, SessionType};
use crate::task::{Task, TaskPriority};

use super::{data_dir, CasOutcome, ReminderRepository, SessionRepository, TaskRepository};

// === Helper functions ===

fn format_priority(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
        TaskPriority::Urgent => "urgent",
    }
}

fn parse_priority(s: &str) -> TaskPriority {
    match s {
        "low" => TaskPriority::Low,
        "high" => TaskPriority::High,
        "urgent" => TaskPriority::Urgent,
        _ => TaskPriority::Medium,
    }
}

fn format_session_type(kind: SessionType) -> &'static str {
    match kind {
        SessionType::Work => "work",
        SessionType::ShortBreak => "short_break",
        SessionType::LongBreak => "long_break",
    }
}

fn parse_session_type(s: &str) -> SessionType {
    match s {
        "short_break" => SessionType::ShortBreak,
        "long_break" => SessionType::LongBreak,
        _ => SessionType::Work,
    }
}

fn parse_session_status(s: &str) -> SessionStatus {
    match s {
        "running" => SessionStatus::Running,
        "paused" => SessionStatus::Paused,
        "completed" => SessionStatus::Completed,
        "cancelled" => SessionStatus::Cancelled,
        _ => SessionStatus::Ready,
    }
}

fn format_reminder_kind(kind: ReminderKind) -> &'static str {
    match kind {
        ReminderKind::TaskDue => "task_due",
        ReminderKind::SessionBreak => "session_break",
        ReminderKind::Custom => "custom",
    }
}

fn parse_reminder_kind(s: &str) -> ReminderKind {
    match s {
        "task_due" => ReminderKind::TaskDue,
        "session_break" => ReminderKind::SessionBreak,
        _ => ReminderKind::Custom,
    }
}

fn parse_delivery_method(s: &str) -> DeliveryMethod {
    match s {
        "email" => DeliveryMethod::Email,
        "desktop" => DeliveryMethod::Desktop,
        _ => DeliveryMethod::Push,
    }
}

fn parse_reminder_status(s: &str) -> ReminderStatus {
    match s {
        "sent" => ReminderStatus::Sent,
        "acknowledged" => ReminderStatus::Acknowledged,
        "snoozed" => ReminderStatus::Snoozed,
        "cancelled" => ReminderStatus::Cancelled,
        "expired" => ReminderStatus::Expired,
        _ => ReminderStatus::Pending,
    }
}

fn parse_attempt_outcome(s: &str) -> AttemptOutcome {
    match s {
        "success" => AttemptOutcome::Success,
        "permanent" => AttemptOutcome::Permanent,
        "exhausted" => AttemptOutcome::Exhausted,
        _ => AttemptOutcome::Transient,
    }
}

/// Parse datetime from RFC3339 with fallback to the stored-as-is epoch.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn format_datetime_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(|dt| dt.to_rfc3339())
}

fn rule_to_json(rule: &Option<RecurrenceRule>) -> Result<Option<String>, StorageError> {
    rule.as_ref()
        .map(|r| serde_json::to_string(r))
        .transpose()
        .map_err(StorageError::from)
}

fn rule_from_json(json: Option<String>) -> Result<Option<RecurrenceRule>, StorageError> {
    json.map(|j| serde_json::from_str(&j))
        .transpose()
        .map_err(StorageError::from)
}

const TASK_COLUMNS: &str = "id, owner_id, project_id, title, description, priority, due_date, \
     tags, parent_task_id, estimated_pomodoros, actual_pomodoros, completed, completed_at, \
     progress, recurrence, occurrences_spawned, sync_version, deleted, deleted_at, \
     created_at, updated_at";

const SESSION_COLUMNS: &str = "id, owner_id, task_id, kind, planned_minutes, remaining_ms, \
     status, started_at, completed_at, last_resumed_at, productivity_rating, focus_rating, \
     interruptions, notes, sync_version, created_at, updated_at";

const REMINDER_COLUMNS: &str = "id, owner_id, task_id, remind_at, kind, method, recurring, \
     recurrence, occurrences_spawned, status, snooze_count, snooze_until, priority, sent_at, \
     acknowledged_at, sync_version, created_at, updated_at";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<(Task, Option<String>)> {
    let priority: String = row.get(5)?;
    let tags_json: String = row.get(7)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let recurrence_json: Option<String> = row.get(14)?;
    let task = Task {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        priority: parse_priority(&priority),
        due_date: parse_datetime_opt(row.get(6)?),
        tags,
        parent_task_id: row.get(8)?,
        estimated_pomodoros: row.get::<_, i64>(9)? as u32,
        actual_pomodoros: row.get::<_, i64>(10)? as u32,
        completed: row.get(11)?,
        completed_at: parse_datetime_opt(row.get(12)?),
        progress: row.get::<_, i64>(13)? as u8,
        recurrence: None, // filled in by the caller from the JSON column
        occurrences_spawned: row.get::<_, i64>(15)? as u32,
        sync_version: row.get(16)?,
        deleted: row.get(17)?,
        deleted_at: parse_datetime_opt(row.get(18)?),
        created_at: parse_datetime(&row.get::<_, String>(19)?),
        updated_at: parse_datetime(&row.get::<_, String>(20)?),
    };
    Ok((task, recurrence_json))
}

fn finish_task(raw: (Task, Option<String>)) -> Result<Task, StorageError> {
    let (mut task, recurrence_json) = raw;
    task.recurrence = rule_from_json(recurrence_json)?;
    Ok(task)
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<PomodoroSession> {
    let kind: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok(PomodoroSession {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        task_id: row.get(2)?,
        kind: parse_session_type(&kind),
        planned_minutes: row.get::<_, i64>(4)? as u32,
        remaining_ms: row.get::<_, i64>(5)? as u64,
        status: parse_session_status(&status),
        started_at: parse_datetime_opt(row.get(7)?),
        completed_at: parse_datetime_opt(row.get(8)?),
        last_resumed_at: parse_datetime_opt(row.get(9)?),
        productivity_rating: row.get::<_, Option<i64>>(10)?.map(|v| v as u8),
        focus_rating: row.get::<_, Option<i64>>(11)?.map(|v| v as u8),
        interruptions: row.get::<_, i64>(12)? as u32,
        notes: row.get(13)?,
        sync_version: row.get(14)?,
        created_at: parse_datetime(&row.get::<_, String>(15)?),
        updated_at: parse_datetime(&row.get::<_, String>(16)?),
    })
}

fn row_to_reminder(row: &rusqlite::Row) -> rusqlite::Result<(Reminder, Option<String>)> {
    let kind: String = row.get(4)?;
    let method: String = row.get(5)?;
    let status: String = row.get(9)?;
    let priority: String = row.get(12)?;
    let recurrence_json: Option<String> = row.get(7)?;
    let reminder = Reminder {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        task_id: row.get(2)?,
        remind_at: parse_datetime(&row.get::<_, String>(3)?),
        kind: parse_reminder_kind(&kind),
        method: parse_delivery_method(&method),
        recurring: row.get(6)?,
        recurrence: None,
        occurrences_spawned: row.get::<_, i64>(8)? as u32,
        status: parse_reminder_status(&status),
        snooze_count: row.get::<_, i64>(10)? as u32,
        snooze_until: parse_datetime_opt(row.get(11)?),
        priority: parse_priority(&priority),
        sent_at: parse_datetime_opt(row.get(13)?),
        acknowledged_at: parse_datetime_opt(row.get(14)?),
        sync_version: row.get(15)?,
        created_at: parse_datetime(&row.get::<_, String>(16)?),
        updated_at: parse_datetime(&row.get::<_, String>(17)?),
    };
    Ok((reminder, recurrence_json))
}

fn finish_reminder(raw: (Reminder, Option<String>)) -> Result<Reminder, StorageError> {
    let (mut reminder, recurrence_json) = raw;
    reminder.recurrence = rule_from_json(recurrence_json)?;
    Ok(reminder)
}

/// SQLite store.
///
/// The connection is behind a mutex; statements are short-lived so the
/// guard is never held across engine logic.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the store at `~/.config/focuskit/focuskit.db`.
    pub fn open_default() -> Result<Self, StorageError> {
        let path = data_dir()?.join("focuskit.db");
        Self::open(&path)
    }

    /// Open (and migrate) the store at an explicit path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (tests, ephemeral use).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS tasks (
                    id                  TEXT NOT NULL,
                    owner_id            TEXT NOT NULL,
                    project_id          TEXT,
                    title               TEXT NOT NULL,
                    description         TEXT,
                    priority            TEXT NOT NULL,
                    due_date            TEXT,
                    tags                TEXT NOT NULL DEFAULT '[]',
                    parent_task_id      TEXT,
                    estimated_pomodoros INTEGER NOT NULL DEFAULT 1,
                    actual_pomodoros    INTEGER NOT NULL DEFAULT 0,
                    completed           INTEGER NOT NULL DEFAULT 0,
                    completed_at        TEXT,
                    progress            INTEGER NOT NULL DEFAULT 0,
                    recurrence          TEXT,
                    occurrences_spawned INTEGER NOT NULL DEFAULT 0,
                    sync_version        INTEGER NOT NULL,
                    deleted             INTEGER NOT NULL DEFAULT 0,
                    deleted_at          TEXT,
                    created_at          TEXT NOT NULL,
                    updated_at          TEXT NOT NULL,
                    PRIMARY KEY (owner_id, id)
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    id                  TEXT NOT NULL,
                    owner_id            TEXT NOT NULL,
                    task_id             TEXT,
                    kind                TEXT NOT NULL,
                    planned_minutes     INTEGER NOT NULL,
                    remaining_ms        INTEGER NOT NULL,
                    status              TEXT NOT NULL,
                    started_at          TEXT,
                    completed_at        TEXT,
                    last_resumed_at     TEXT,
                    productivity_rating INTEGER,
                    focus_rating        INTEGER,
                    interruptions       INTEGER NOT NULL DEFAULT 0,
                    notes               TEXT,
                    sync_version        INTEGER NOT NULL,
                    created_at          TEXT NOT NULL,
                    updated_at          TEXT NOT NULL,
                    PRIMARY KEY (owner_id, id)
                );

                CREATE TABLE IF NOT EXISTS reminders (
                    id                  TEXT NOT NULL,
                    owner_id            TEXT NOT NULL,
                    task_id             TEXT,
                    remind_at           TEXT NOT NULL,
                    kind                TEXT NOT NULL,
                    method              TEXT NOT NULL,
                    recurring           INTEGER NOT NULL DEFAULT 0,
                    recurrence          TEXT,
                    occurrences_spawned INTEGER NOT NULL DEFAULT 0,
                    status              TEXT NOT NULL,
                    snooze_count        INTEGER NOT NULL DEFAULT 0,
                    snooze_until        TEXT,
                    priority            TEXT NOT NULL,
                    sent_at             TEXT,
                    acknowledged_at     TEXT,
                    sync_version        INTEGER NOT NULL,
                    created_at          TEXT NOT NULL,
                    updated_at          TEXT NOT NULL,
                    PRIMARY KEY (owner_id, id)
                );

                CREATE TABLE IF NOT EXISTS delivery_log (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    reminder_id TEXT NOT NULL,
                    owner_id    TEXT NOT NULL,
                    method      TEXT NOT NULL,
                    attempt     INTEGER NOT NULL,
                    outcome     TEXT NOT NULL,
                    detail      TEXT,
                    at          TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_owner_completed_at
                    ON tasks(owner_id, completed_at);
                CREATE INDEX IF NOT EXISTS idx_tasks_owner_updated_at
                    ON tasks(owner_id, updated_at);
                CREATE INDEX IF NOT EXISTS idx_sessions_owner_completed_at
                    ON sessions(owner_id, completed_at);
                CREATE INDEX IF NOT EXISTS idx_reminders_owner_status
                    ON reminders(owner_id, status);
                CREATE INDEX IF NOT EXISTS idx_delivery_log_reminder
                    ON delivery_log(owner_id, reminder_id);",
            )
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))
    }

    fn select_task(
        conn: &Connection,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Task>, StorageError> {
        let raw = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 AND id = ?2"),
                params![owner_id, id],
                row_to_task,
            )
            .optional()?;
        raw.map(finish_task).transpose()
    }

    fn select_session(
        conn: &Connection,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<PomodoroSession>, StorageError> {
        Ok(conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_id = ?1 AND id = ?2"),
                params![owner_id, id],
                row_to_session,
            )
            .optional()?)
    }

    fn select_reminder(
        conn: &Connection,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Reminder>, StorageError> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders WHERE owner_id = ?1 AND id = ?2"
                ),
                params![owner_id, id],
                row_to_reminder,
            )
            .optional()?;
        raw.map(finish_reminder).transpose()
    }

    /// Conditional session update usable both standalone and inside the
    /// completion transaction.
    fn cas_session(
        tx: &Transaction,
        session: &PomodoroSession,
        expected: i64,
    ) -> Result<bool, StorageError> {
        let changed = tx.execute(
            "UPDATE sessions SET
                 task_id = ?1, kind = ?2, planned_minutes = ?3, remaining_ms = ?4,
                 status = ?5, started_at = ?6, completed_at = ?7, last_resumed_at = ?8,
                 productivity_rating = ?9, focus_rating = ?10, interruptions = ?11,
                 notes = ?12, sync_version = ?13, updated_at = ?14
             WHERE owner_id = ?15 AND id = ?16 AND sync_version = ?17",
            params![
                session.task_id,
                format_session_type(session.kind),
                i64::from(session.planned_minutes),
                session.remaining_ms as i64,
                session.status.as_str(),
                format_datetime_opt(session.started_at),
                format_datetime_opt(session.completed_at),
                format_datetime_opt(session.last_resumed_at),
                session.productivity_rating.map(i64::from),
                session.focus_rating.map(i64::from),
                i64::from(session.interruptions),
                session.notes,
                session.sync_version,
                session.updated_at.to_rfc3339(),
                session.owner_id,
                session.id,
                expected,
            ],
        )?;
        Ok(changed == 1)
    }
}

impl TaskRepository for SqliteStore {
    fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        let recurrence = rule_to_json(&task.recurrence)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21)"
            ),
            params![
                task.id,
                task.owner_id,
                task.project_id,
                task.title,
                task.description,
                format_priority(task.priority),
                format_datetime_opt(task.due_date),
                serde_json::to_string(&task.tags)?,
                task.parent_task_id,
                i64::from(task.estimated_pomodoros),
                i64::from(task.actual_pomodoros),
                task.completed,
                format_datetime_opt(task.completed_at),
                i64::from(task.progress),
                recurrence,
                i64::from(task.occurrences_spawned),
                task.sync_version,
                task.deleted,
                format_datetime_opt(task.deleted_at),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_task(&self, owner_id: &str, id: &str) -> Result<Option<Task>, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::select_task(&conn, owner_id, id)
    }

    fn update_task_if_version(
        &self,
        task: &Task,
        expected: i64,
    ) -> Result<CasOutcome<Task>, StorageError> {
        let recurrence = rule_to_json(&task.recurrence)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tasks SET
                 project_id = ?1, title = ?2, description = ?3, priority = ?4, due_date = ?5,
                 tags = ?6, parent_task_id = ?7, estimated_pomodoros = ?8,
                 actual_pomodoros = ?9, completed = ?10, completed_at = ?11, progress = ?12,
                 recurrence = ?13, occurrences_spawned = ?14, sync_version = ?15,
                 deleted = ?16, deleted_at = ?17, updated_at = ?18
             WHERE owner_id = ?19 AND id = ?20 AND sync_version = ?21",
            params![
                task.project_id,
                task.title,
                task.description,
                format_priority(task.priority),
                format_datetime_opt(task.due_date),
                serde_json::to_string(&task.tags)?,
                task.parent_task_id,
                i64::from(task.estimated_pomodoros),
                i64::from(task.actual_pomodoros),
                task.completed,
                format_datetime_opt(task.completed_at),
                i64::from(task.progress),
                recurrence,
                i64::from(task.occurrences_spawned),
                task.sync_version,
                task.deleted,
                format_datetime_opt(task.deleted_at),
                task.updated_at.to_rfc3339(),
                task.owner_id,
                task.id,
                expected,
            ],
        )?;
        if changed == 1 {
            return Ok(CasOutcome::Applied(task.clone()));
        }
        match Self::select_task(&conn, &task.owner_id, &task.id)? {
            Some(current) => Ok(CasOutcome::VersionMismatch(current)),
            None => Err(StorageError::QueryFailed(format!(
                "missing row during conditional update: {}",
                task.id
            ))),
        }
    }

    fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![owner_id], row_to_task)?;
        rows.map(|raw| finish_task(raw?)).collect()
    }

    fn list_tasks_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE owner_id = ?1 AND deleted = 0
               AND completed_at IS NOT NULL AND completed_at >= ?2 AND completed_at < ?3"
        ))?;
        let rows = stmt.query_map(
            params![owner_id, start.to_rfc3339(), end.to_rfc3339()],
            row_to_task,
        )?;
        rows.map(|raw| finish_task(raw?)).collect()
    }

    fn list_tasks_updated_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE owner_id = ?1 AND deleted = 0 AND updated_at >= ?2 AND updated_at < ?3"
        ))?;
        let rows = stmt.query_map(
            params![owner_id, start.to_rfc3339(), end.to_rfc3339()],
            row_to_task,
        )?;
        rows.map(|raw| finish_task(raw?)).collect()
    }
}

impl SessionRepository for SqliteStore {
    fn insert_session(&self, session: &PomodoroSession) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                session.id,
                session.owner_id,
                session.task_id,
                format_session_type(session.kind),
                i64::from(session.planned_minutes),
                session.remaining_ms as i64,
                session.status.as_str(),
                format_datetime_opt(session.started_at),
                format_datetime_opt(session.completed_at),
                format_datetime_opt(session.last_resumed_at),
                session.productivity_rating.map(i64::from),
                session.focus_rating.map(i64::from),
                i64::from(session.interruptions),
                session.notes,
                session.sync_version,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_session(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<PomodoroSession>, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::select_session(&conn, owner_id, id)
    }

    fn update_session_if_version(
        &self,
        session: &PomodoroSession,
        expected: i64,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let applied = Self::cas_session(&tx, session, expected)?;
        if applied {
            tx.commit()?;
            return Ok(CasOutcome::Applied(session.clone()));
        }
        match Self::select_session(&tx, &session.owner_id, &session.id)? {
            Some(current) => Ok(CasOutcome::VersionMismatch(current)),
            None => Err(StorageError::QueryFailed(format!(
                "missing row during conditional update: {}",
                session.id
            ))),
        }
    }

    fn list_sessions_completed_between(
        &self,
        owner_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PomodoroSession>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE owner_id = ?1
               AND completed_at IS NOT NULL AND completed_at >= ?2 AND completed_at < ?3"
        ))?;
        let rows = stmt.query_map(
            params![owner_id, start.to_rfc3339(), end.to_rfc3339()],
            row_to_session,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }

    fn complete_session_with_task(
        &self,
        session: &PomodoroSession,
        expected: i64,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PomodoroSession>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let applied = Self::cas_session(&tx, session, expected)?;
        if !applied {
            return match Self::select_session(&tx, &session.owner_id, &session.id)? {
                Some(current) => Ok(CasOutcome::VersionMismatch(current)),
                None => Err(StorageError::QueryFailed(format!(
                    "missing row during conditional update: {}",
                    session.id
                ))),
            };
        }
        if let Some(task_id) = task_id {
            // The weak task reference may point at a deleted or missing
            // row; the session write still stands in that case.
            tx.execute(
                "UPDATE tasks SET
                     actual_pomodoros = actual_pomodoros + 1,
                     sync_version = sync_version + 1,
                     updated_at = ?1
                 WHERE owner_id = ?2 AND id = ?3 AND deleted = 0",
                params![now.to_rfc3339(), session.owner_id, task_id],
            )?;
        }
        tx.commit()?;
        Ok(CasOutcome::Applied(session.clone()))
    }
}

impl ReminderRepository for SqliteStore {
    fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StorageError> {
        let recurrence = rule_to_json(&reminder.recurrence)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO reminders ({REMINDER_COLUMNS}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18)"
            ),
            params![
                reminder.id,
                reminder.owner_id,
                reminder.task_id,
                reminder.remind_at.to_rfc3339(),
                format_reminder_kind(reminder.kind),
                reminder.method.as_str(),
                reminder.recurring,
                recurrence,
                i64::from(reminder.occurrences_spawned),
                reminder.status.as_str(),
                i64::from(reminder.snooze_count),
                format_datetime_opt(reminder.snooze_until),
                format_priority(reminder.priority),
                format_datetime_opt(reminder.sent_at),
                format_datetime_opt(reminder.acknowledged_at),
                reminder.sync_version,
                reminder.created_at.to_rfc3339(),
                reminder.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_reminder(&self, owner_id: &str, id: &str) -> Result<Option<Reminder>, StorageError> {
        let conn = self.conn.lock().unwrap();
        Self::select_reminder(&conn, owner_id, id)
    }

    fn update_reminder_if_version(
        &self,
        reminder: &Reminder,
        expected: i64,
    ) -> Result<CasOutcome<Reminder>, StorageError> {
        let recurrence = rule_to_json(&reminder.recurrence)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE reminders SET
                 task_id = ?1, remind_at = ?2, kind = ?3, method = ?4, recurring = ?5,
                 recurrence = ?6, occurrences_spawned = ?7, status = ?8, snooze_count = ?9,
                 snooze_until = ?10, priority = ?11, sent_at = ?12, acknowledged_at = ?13,
                 sync_version = ?14, updated_at = ?15
             WHERE owner_id = ?16 AND id = ?17 AND sync_version = ?18",
            params![
                reminder.task_id,
                reminder.remind_at.to_rfc3339(),
                format_reminder_kind(reminder.kind),
                reminder.method.as_str(),
                reminder.recurring,
                recurrence,
                i64::from(reminder.occurrences_spawned),
                reminder.status.as_str(),
                i64::from(reminder.snooze_count),
                format_datetime_opt(reminder.snooze_until),
                format_priority(reminder.priority),
                format_datetime_opt(reminder.sent_at),
                format_datetime_opt(reminder.acknowledged_at),
                reminder.sync_version,
                reminder.updated_at.to_rfc3339(),
                reminder.owner_id,
                reminder.id,
                expected,
            ],
        )?;
        if changed == 1 {
            return Ok(CasOutcome::Applied(reminder.clone()));
        }
        match Self::select_reminder(&conn, &reminder.owner_id, &reminder.id)? {
            Some(current) => Ok(CasOutcome::VersionMismatch(current)),
            None => Err(StorageError::QueryFailed(format!(
                "missing row during conditional update: {}",
                reminder.id
            ))),
        }
    }

    fn list_due_reminders(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE owner_id = ?1
               AND ((status = 'pending' AND remind_at <= ?2)
                 OR (status = 'snoozed' AND snooze_until IS NOT NULL AND snooze_until <= ?2))"
        ))?;
        let rows = stmt.query_map(params![owner_id, now.to_rfc3339()], row_to_reminder)?;
        rows.map(|raw| finish_reminder(raw?)).collect()
    }

    fn list_active_reminders(&self, owner_id: &str) -> Result<Vec<Reminder>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE owner_id = ?1 AND status IN ('pending', 'sent', 'snoozed')"
        ))?;
        let rows = stmt.query_map(params![owner_id], row_to_reminder)?;
        rows.map(|raw| finish_reminder(raw?)).collect()
    }

    fn append_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO delivery_log (reminder_id, owner_id, method, attempt, outcome, detail, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.reminder_id,
                attempt.owner_id,
                attempt.method.as_str(),
                i64::from(attempt.attempt),
                attempt.outcome.as_str(),
                attempt.detail,
                attempt.at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_delivery_attempts(
        &self,
        owner_id: &str,
        reminder_id: &str,
    ) -> Result<Vec<DeliveryAttempt>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT reminder_id, owner_id, method, attempt, outcome, detail, at
             FROM delivery_log WHERE owner_id = ?1 AND reminder_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![owner_id, reminder_id], |row| {
            let method: String = row.get(2)?;
            let outcome: String = row.get(4)?;
            Ok(DeliveryAttempt {
                reminder_id: row.get(0)?,
                owner_id: row.get(1)?,
                method: parse_delivery_method(&method),
                attempt: row.get::<_, i64>(3)? as u32,
                outcome: parse_attempt_outcome(&outcome),
                detail: row.get(5)?,
                at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
    }
}
