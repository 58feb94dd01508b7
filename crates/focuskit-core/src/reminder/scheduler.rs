//! Reminder scheduling: due checks, delivery with bounded retry, snooze,
//! acknowledgement, and the expiry sweep.
//!
//! Delivery is fire-and-forget from the engine's point of view: `send`
//! hands the reminder to the transport, records every attempt in the
//! delivery log, and only writes `sent` after the transport succeeds.
//! A send cancelled mid-flight (dropped future) therefore leaves the
//! reminder `pending`/`snoozed` and safe to retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ConflictRecord, DeliveryError, EngineError, EntityKind, Result};
use crate::events::Event;
use crate::recurrence;
use crate::storage::{CasOutcome, DeliveryPolicy, ReminderPolicy, ReminderRepository};

use super::delivery::{
    AttemptOutcome, DeliveryAttempt, DeliveryOutcome, NotificationDelivery, RetryPolicy,
};
use super::{Reminder, ReminderDraft, ReminderStatus, DEFAULT_MAX_SNOOZES};

/// Result of acknowledging a reminder: the terminal record plus the next
/// instance when the reminder recurs.
#[derive(Debug, Clone)]
pub struct AcknowledgeOutcome {
    pub reminder: Reminder,
    pub next_occurrence: Option<Reminder>,
}

/// Owner-scoped reminder operations.
#[derive(Clone)]
pub struct ReminderScheduler {
    repo: Arc<dyn ReminderRepository>,
    delivery: Arc<dyn NotificationDelivery>,
    clock: Arc<dyn Clock>,
    max_snoozes: u32,
    retry: RetryPolicy,
    expire_after: Duration,
}

impl ReminderScheduler {
    pub fn new(
        repo: Arc<dyn ReminderRepository>,
        delivery: Arc<dyn NotificationDelivery>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            delivery,
            clock,
            max_snoozes: DEFAULT_MAX_SNOOZES,
            retry: RetryPolicy::default(),
            expire_after: Duration::hours(24),
        }
    }

    pub fn with_policy(
        repo: Arc<dyn ReminderRepository>,
        delivery: Arc<dyn NotificationDelivery>,
        clock: Arc<dyn Clock>,
        reminders: &ReminderPolicy,
        delivery_policy: &DeliveryPolicy,
    ) -> Self {
        Self {
            repo,
            delivery,
            clock,
            max_snoozes: reminders.max_snoozes,
            retry: delivery_policy.retry_policy(),
            expire_after: Duration::hours(i64::from(reminders.expire_after_hours)),
        }
    }

    /// Create a pending reminder at version 1.
    pub fn schedule(&self, owner_id: &str, draft: ReminderDraft) -> Result<Reminder> {
        draft.validate()?;
        let reminder = Reminder::from_draft(owner_id, draft, self.clock.now());
        self.repo.insert_reminder(&reminder)?;
        debug!(owner_id, reminder_id = %reminder.id, "reminder scheduled");
        Ok(reminder)
    }

    pub fn get(&self, owner_id: &str, id: &str) -> Result<Reminder> {
        self.load(owner_id, id)
    }

    /// Whether a reminder should fire at `now`: pending reminders past
    /// their scheduled time, snoozed ones past their snooze window.
    pub fn is_due(reminder: &Reminder, now: DateTime<Utc>) -> bool {
        match reminder.status {
            ReminderStatus::Pending => now >= reminder.remind_at,
            ReminderStatus::Snoozed => reminder
                .snooze_until
                .map(|until| now >= until)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// All of an owner's currently due reminders.
    pub fn due(&self, owner_id: &str) -> Result<Vec<Reminder>> {
        Ok(self.repo.list_due_reminders(owner_id, self.clock.now())?)
    }

    /// Deliver a reminder and mark it `sent`.
    ///
    /// Legal only from `pending`/`snoozed`. Transient transport failures
    /// retry with capped exponential backoff; permanent ones fail
    /// immediately. Every attempt lands in the delivery log. The status
    /// write happens strictly after a successful delivery, so dropping
    /// this future never produces a half-sent reminder.
    pub async fn send(&self, owner_id: &str, id: &str) -> Result<(Reminder, Event)> {
        let current = self.load(owner_id, id)?;
        if !matches!(
            current.status,
            ReminderStatus::Pending | ReminderStatus::Snoozed
        ) {
            return Err(self.invalid_transition(&current, "send"));
        }

        let attempts = self.retry.max_retries + 1;
        let mut attempt = 1;
        loop {
            match self.delivery.deliver(&current, current.method).await {
                DeliveryOutcome::Delivered => {
                    self.log_attempt(&current, attempt, AttemptOutcome::Success, None)?;
                    break;
                }
                DeliveryOutcome::TransientFailure(reason) => {
                    if attempt >= attempts {
                        self.log_attempt(
                            &current,
                            attempt,
                            AttemptOutcome::Exhausted,
                            Some(&reason),
                        )?;
                        warn!(owner_id, reminder_id = id, %reason, "delivery retries exhausted");
                        return Err(DeliveryError::RetriesExhausted {
                            attempts,
                            reason,
                        }
                        .into());
                    }
                    self.log_attempt(&current, attempt, AttemptOutcome::Transient, Some(&reason))?;
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    attempt += 1;
                }
                DeliveryOutcome::PermanentFailure(reason) => {
                    self.log_attempt(&current, attempt, AttemptOutcome::Permanent, Some(&reason))?;
                    warn!(owner_id, reminder_id = id, %reason, "permanent delivery failure");
                    return Err(DeliveryError::Permanent { reason }.into());
                }
            }
        }

        let now = self.clock.now();
        let mut updated = current.clone();
        updated.status = ReminderStatus::Sent;
        updated.sent_at = Some(now);
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let reminder = self.write(updated, current.sync_version, None)?;
        info!(owner_id, reminder_id = %reminder.id, method = reminder.method.as_str(), "reminder sent");
        let event = Event::ReminderSent {
            reminder_id: reminder.id.clone(),
            method: reminder.method,
            at: now,
        };
        Ok((reminder, event))
    }

    /// `sent -> acknowledged`. A recurring reminder materializes its
    /// next instance as a fresh pending row at version 1.
    pub fn acknowledge(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<AcknowledgeOutcome> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, expected_version)?;
        if current.status != ReminderStatus::Sent {
            return Err(self.invalid_transition(&current, "acknowledge"));
        }

        let mut updated = current.clone();
        updated.status = ReminderStatus::Acknowledged;
        updated.acknowledged_at = Some(now);
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let next_date = updated.recurrence.as_ref().and_then(|rule| {
            recurrence::next(
                rule,
                updated.remind_at.date_naive(),
                updated.occurrences_spawned,
            )
        });
        if next_date.is_some() {
            updated.occurrences_spawned += 1;
        }

        let reminder = self.write(updated, current.sync_version, expected_version)?;

        let next_occurrence = match next_date {
            Some(date) => {
                let remind_at = date.and_time(reminder.remind_at.time()).and_utc();
                let mut next = Reminder::from_draft(
                    owner_id,
                    ReminderDraft {
                        task_id: reminder.task_id.clone(),
                        remind_at,
                        kind: reminder.kind,
                        method: reminder.method,
                        recurrence: reminder.recurrence.clone(),
                        priority: reminder.priority,
                    },
                    now,
                );
                next.occurrences_spawned = reminder.occurrences_spawned;
                self.repo.insert_reminder(&next)?;
                info!(owner_id, reminder_id = %reminder.id, next_id = %next.id, "materialized next occurrence");
                Some(next)
            }
            None => None,
        };

        Ok(AcknowledgeOutcome {
            reminder,
            next_occurrence,
        })
    }

    /// `sent -> snoozed`, bounded by the snooze budget. Hitting the cap
    /// fails with `SnoozeLimitReached` and leaves the reminder `sent`.
    pub fn snooze(
        &self,
        owner_id: &str,
        id: &str,
        duration: Duration,
        expected_version: Option<i64>,
    ) -> Result<(Reminder, Event)> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, expected_version)?;
        if current.status != ReminderStatus::Sent {
            return Err(self.invalid_transition(&current, "snooze"));
        }
        if current.snooze_count >= self.max_snoozes {
            return Err(EngineError::SnoozeLimitReached {
                count: current.snooze_count,
                max: self.max_snoozes,
            });
        }

        let snooze_until = now + duration;
        let mut updated = current.clone();
        updated.status = ReminderStatus::Snoozed;
        updated.snooze_until = Some(snooze_until);
        updated.snooze_count = current.snooze_count + 1;
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;

        let reminder = self.write(updated, current.sync_version, expected_version)?;
        debug!(owner_id, reminder_id = %reminder.id, count = reminder.snooze_count, "reminder snoozed");
        let event = Event::ReminderSnoozed {
            reminder_id: reminder.id.clone(),
            snooze_count: reminder.snooze_count,
            snooze_until,
            at: now,
        };
        Ok((reminder, event))
    }

    /// Any non-terminal state `-> cancelled`.
    pub fn cancel(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<Reminder> {
        let now = self.clock.now();
        let current = self.guarded(owner_id, id, expected_version)?;
        if current.status.is_terminal() {
            return Err(self.invalid_transition(&current, "cancel"));
        }

        let mut updated = current.clone();
        updated.status = ReminderStatus::Cancelled;
        updated.updated_at = now;
        updated.sync_version = current.sync_version + 1;
        self.write(updated, current.sync_version, expected_version)
    }

    /// Expire non-terminal reminders whose effective due time is more
    /// than the expiry window in the past. A racing writer wins its
    /// record; the sweep just skips it.
    pub fn expire_sweep(&self, owner_id: &str) -> Result<Vec<(Reminder, Event)>> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for current in self.repo.list_active_reminders(owner_id)? {
            if now - current.effective_due() <= self.expire_after {
                continue;
            }
            let mut updated = current.clone();
            updated.status = ReminderStatus::Expired;
            updated.updated_at = now;
            updated.sync_version = current.sync_version + 1;
            match self
                .repo
                .update_reminder_if_version(&updated, current.sync_version)?
            {
                CasOutcome::Applied(reminder) => {
                    debug!(owner_id, reminder_id = %reminder.id, "reminder expired");
                    let event = Event::ReminderExpired {
                        reminder_id: reminder.id.clone(),
                        at: now,
                    };
                    expired.push((reminder, event));
                }
                CasOutcome::VersionMismatch(_) => {
                    debug!(owner_id, reminder_id = %current.id, "expiry lost race, skipping");
                }
            }
        }
        Ok(expired)
    }

    /// The delivery log for one reminder, oldest first.
    pub fn delivery_log(&self, owner_id: &str, id: &str) -> Result<Vec<DeliveryAttempt>> {
        Ok(self.repo.list_delivery_attempts(owner_id, id)?)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn load(&self, owner_id: &str, id: &str) -> Result<Reminder> {
        self.repo
            .get_reminder(owner_id, id)?
            .ok_or(EngineError::NotFound {
                entity: EntityKind::Reminder,
            })
    }

    fn guarded(
        &self,
        owner_id: &str,
        id: &str,
        expected_version: Option<i64>,
    ) -> Result<Reminder> {
        let current = self.load(owner_id, id)?;
        if let Some(expected) = expected_version {
            if expected != current.sync_version {
                return Err(conflict(expected_version, current));
            }
        }
        Ok(current)
    }

    fn write(
        &self,
        updated: Reminder,
        loaded_version: i64,
        expected_version: Option<i64>,
    ) -> Result<Reminder> {
        match self
            .repo
            .update_reminder_if_version(&updated, loaded_version)?
        {
            CasOutcome::Applied(reminder) => Ok(reminder),
            CasOutcome::VersionMismatch(current) => Err(conflict(expected_version, current)),
        }
    }

    fn invalid_transition(&self, current: &Reminder, operation: &str) -> EngineError {
        EngineError::InvalidTransition {
            entity: EntityKind::Reminder,
            from: current.status.as_str().to_string(),
            operation: operation.to_string(),
        }
    }

    fn log_attempt(
        &self,
        reminder: &Reminder,
        attempt: u32,
        outcome: AttemptOutcome,
        detail: Option<&str>,
    ) -> Result<()> {
        self.repo.append_delivery_attempt(&DeliveryAttempt {
            reminder_id: reminder.id.clone(),
            owner_id: reminder.owner_id.clone(),
            method: reminder.method,
            attempt,
            outcome,
            detail: detail.map(str::to_string),
            at: self.clock.now(),
        })?;
        Ok(())
    }
}

fn conflict(expected_version: Option<i64>, current: Reminder) -> EngineError {
    EngineError::Conflict {
        submitted: expected_version.unwrap_or(current.sync_version),
        current: ConflictRecord::Reminder(Box::new(current)),
    }
}
