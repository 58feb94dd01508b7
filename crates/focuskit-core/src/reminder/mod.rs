//! Reminder model and status lifecycle.
//!
//! ```text
//! pending -> sent -> (acknowledged | snoozed -> sent ...)
//! ```
//!
//! `acknowledged`, `cancelled`, and `expired` are terminal. Snoozing is
//! bounded; the default budget is three snoozes per reminder.

pub mod delivery;
pub mod scheduler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::recurrence::RecurrenceRule;
use crate::task::TaskPriority;

/// Default snooze budget.
pub const DEFAULT_MAX_SNOOZES: u32 = 3;

/// What the reminder is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    TaskDue,
    SessionBreak,
    Custom,
}

/// Channel the notification goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Push,
    Email,
    Desktop,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Push => "push",
            DeliveryMethod::Email => "email",
            DeliveryMethod::Desktop => "desktop",
        }
    }
}

/// Reminder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Acknowledged,
    Snoozed,
    Cancelled,
    Expired,
}

impl ReminderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReminderStatus::Acknowledged | ReminderStatus::Cancelled | ReminderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Acknowledged => "acknowledged",
            ReminderStatus::Snoozed => "snoozed",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Expired => "expired",
        }
    }
}

/// A scheduled reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub task_id: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub kind: ReminderKind,
    pub method: DeliveryMethod,
    pub recurring: bool,
    pub recurrence: Option<RecurrenceRule>,
    /// Successor instances materialized in this series so far.
    pub occurrences_spawned: u32,
    pub status: ReminderStatus,
    /// Snoozes consumed. Capped by the scheduler's budget.
    pub snooze_count: u32,
    /// Set iff status is `snoozed`; always in the future when written.
    pub snooze_until: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub sent_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub sync_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn from_draft(
        owner_id: impl Into<String>,
        draft: ReminderDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Reminder {
            id: format!("reminder-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.into(),
            task_id: draft.task_id,
            remind_at: draft.remind_at,
            kind: draft.kind,
            method: draft.method,
            recurring: draft.recurrence.is_some(),
            recurrence: draft.recurrence,
            occurrences_spawned: 0,
            status: ReminderStatus::Pending,
            snooze_count: 0,
            snooze_until: None,
            priority: draft.priority,
            sent_at: None,
            acknowledged_at: None,
            sync_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The instant this reminder is measured against: the snooze window
    /// when snoozed, the scheduled time otherwise.
    pub fn effective_due(&self) -> DateTime<Utc> {
        match self.status {
            ReminderStatus::Snoozed => self.snooze_until.unwrap_or(self.remind_at),
            _ => self.remind_at,
        }
    }
}

/// Fields a client supplies when scheduling a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderDraft {
    #[serde(default)]
    pub task_id: Option<String>,
    pub remind_at: DateTime<Utc>,
    pub kind: ReminderKind,
    pub method: DeliveryMethod,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub priority: TaskPriority,
}

impl ReminderDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-10T09:00:00Z".parse().unwrap()
    }

    fn draft() -> ReminderDraft {
        ReminderDraft {
            task_id: None,
            remind_at: now(),
            kind: ReminderKind::Custom,
            method: DeliveryMethod::Push,
            recurrence: None,
            priority: TaskPriority::Medium,
        }
    }

    #[test]
    fn draft_starts_pending() {
        let reminder = Reminder::from_draft("owner-1", draft(), now());
        assert_eq!(reminder.status, ReminderStatus::Pending);
        assert_eq!(reminder.snooze_count, 0);
        assert!(!reminder.recurring);
        assert_eq!(reminder.sync_version, 1);
    }

    #[test]
    fn recurring_flag_follows_rule() {
        let mut d = draft();
        d.recurrence = Some(crate::recurrence::RecurrenceRule::daily(1));
        let reminder = Reminder::from_draft("owner-1", d, now());
        assert!(reminder.recurring);
    }

    #[test]
    fn effective_due_prefers_snooze_window() {
        let mut reminder = Reminder::from_draft("owner-1", draft(), now());
        assert_eq!(reminder.effective_due(), reminder.remind_at);

        reminder.status = ReminderStatus::Snoozed;
        let until = now() + chrono::Duration::minutes(10);
        reminder.snooze_until = Some(until);
        assert_eq!(reminder.effective_due(), until);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ReminderStatus::Acknowledged.is_terminal());
        assert!(ReminderStatus::Cancelled.is_terminal());
        assert!(ReminderStatus::Expired.is_terminal());
        assert!(!ReminderStatus::Pending.is_terminal());
        assert!(!ReminderStatus::Sent.is_terminal());
        assert!(!ReminderStatus::Snoozed.is_terminal());
    }
}
