//! Engine events.
//!
//! Mutating operations return an `Event` alongside the updated entity so
//! the API layer can fan state changes out to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reminder::DeliveryMethod;
use crate::session::SessionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: String,
        kind: SessionType,
        task_id: Option<String>,
        at: DateTime<Utc>,
    },
    SessionPaused {
        session_id: String,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        session_id: String,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        kind: SessionType,
        task_id: Option<String>,
        elapsed_minutes: u64,
        at: DateTime<Utc>,
    },
    SessionCancelled {
        session_id: String,
        at: DateTime<Utc>,
    },
    ReminderSent {
        reminder_id: String,
        method: DeliveryMethod,
        at: DateTime<Utc>,
    },
    ReminderSnoozed {
        reminder_id: String,
        snooze_count: u32,
        snooze_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    ReminderExpired {
        reminder_id: String,
        at: DateTime<Utc>,
    },
}
