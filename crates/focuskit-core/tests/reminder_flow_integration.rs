//! Integration tests for reminder delivery, snooze bounds, expiry, and
//! cancellation safety.

use std::sync::Arc;

use chrono::Duration;
use focuskit_core::{
    Clock, DeliveryMethod, DeliveryOutcome, Engine, EngineConfig, InMemoryStore, ManualClock,
    NotificationDelivery, Reminder, ReminderDraft, ReminderKind, ReminderScheduler,
    ReminderStatus, TaskPriority,
};

struct NullDelivery;

#[async_trait::async_trait]
impl NotificationDelivery for NullDelivery {
    async fn deliver(&self, _: &Reminder, _: DeliveryMethod) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}

/// Transport that never completes, standing in for a hung network call.
struct StallingDelivery;

#[async_trait::async_trait]
impl NotificationDelivery for StallingDelivery {
    async fn deliver(&self, _: &Reminder, _: DeliveryMethod) -> DeliveryOutcome {
        std::future::pending().await
    }
}

fn engine_with(delivery: Arc<dyn NotificationDelivery>) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new("2026-03-10T09:00:00Z".parse().unwrap()));
    let engine = Engine::new(
        Arc::new(InMemoryStore::new()),
        delivery,
        Arc::clone(&clock) as Arc<dyn Clock>,
        &EngineConfig::default(),
    );
    (engine, clock)
}

fn draft(remind_at: chrono::DateTime<chrono::Utc>) -> ReminderDraft {
    ReminderDraft {
        task_id: None,
        remind_at,
        kind: ReminderKind::Custom,
        method: DeliveryMethod::Push,
        recurrence: None,
        priority: TaskPriority::Medium,
    }
}

#[tokio::test]
async fn snooze_defers_due_by_exactly_the_window() {
    let (engine, clock) = engine_with(Arc::new(NullDelivery));

    // Due at T.
    let reminder = engine.reminders.schedule("owner-1", draft(clock.now())).unwrap();
    engine.reminders.send("owner-1", &reminder.id).await.unwrap();

    // Snoozed for 10 minutes at T+1.
    clock.advance(Duration::minutes(1));
    engine
        .reminders
        .snooze("owner-1", &reminder.id, Duration::minutes(10), None)
        .unwrap();

    // Not due at T+10; due at T+11.
    clock.advance(Duration::minutes(9));
    let current = engine.reminders.get("owner-1", &reminder.id).unwrap();
    assert!(!ReminderScheduler::is_due(&current, clock.now()));
    assert!(engine.reminders.due("owner-1").unwrap().is_empty());

    clock.advance(Duration::minutes(1));
    assert!(ReminderScheduler::is_due(&current, clock.now()));
    assert_eq!(engine.reminders.due("owner-1").unwrap().len(), 1);
}

#[tokio::test]
async fn snooze_budget_is_three_by_default() {
    let (engine, clock) = engine_with(Arc::new(NullDelivery));
    let reminder = engine.reminders.schedule("owner-1", draft(clock.now())).unwrap();

    for _ in 0..3 {
        engine.reminders.send("owner-1", &reminder.id).await.unwrap();
        engine
            .reminders
            .snooze("owner-1", &reminder.id, Duration::minutes(5), None)
            .unwrap();
        clock.advance(Duration::minutes(6));
    }

    engine.reminders.send("owner-1", &reminder.id).await.unwrap();
    let err = engine
        .reminders
        .snooze("owner-1", &reminder.id, Duration::minutes(5), None)
        .unwrap_err();
    assert!(err.is_snooze_limit());

    // The failed snooze left the reminder `sent` and unversioned.
    let current = engine.reminders.get("owner-1", &reminder.id).unwrap();
    assert_eq!(current.status, ReminderStatus::Sent);
    assert_eq!(current.snooze_count, 3);
}

#[tokio::test]
async fn cancelled_send_leaves_reminder_pending() {
    let (engine, clock) = engine_with(Arc::new(StallingDelivery));
    let reminder = engine.reminders.schedule("owner-1", draft(clock.now())).unwrap();

    // Caller context expires while the transport hangs; dropping the
    // future must not produce a half-sent reminder.
    let send = engine.reminders.send("owner-1", &reminder.id);
    let result = tokio::time::timeout(std::time::Duration::from_millis(20), send).await;
    assert!(result.is_err());

    let current = engine.reminders.get("owner-1", &reminder.id).unwrap();
    assert_eq!(current.status, ReminderStatus::Pending);
    assert_eq!(current.sync_version, 1);
}

#[tokio::test]
async fn expiry_sweep_only_touches_stale_reminders() {
    let (engine, clock) = engine_with(Arc::new(NullDelivery));

    let stale = engine
        .reminders
        .schedule("owner-1", draft(clock.now() - Duration::hours(25)))
        .unwrap();
    let fresh = engine
        .reminders
        .schedule("owner-1", draft(clock.now() - Duration::hours(23)))
        .unwrap();

    let expired = engine.reminders.expire_sweep("owner-1").unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0.id, stale.id);

    assert_eq!(
        engine.reminders.get("owner-1", &stale.id).unwrap().status,
        ReminderStatus::Expired
    );
    assert_eq!(
        engine.reminders.get("owner-1", &fresh.id).unwrap().status,
        ReminderStatus::Pending
    );
}

#[tokio::test]
async fn snoozed_reminder_expires_from_its_snooze_window() {
    let (engine, clock) = engine_with(Arc::new(NullDelivery));
    let reminder = engine
        .reminders
        .schedule("owner-1", draft(clock.now() - Duration::hours(30)))
        .unwrap();
    engine.reminders.send("owner-1", &reminder.id).await.unwrap();
    engine
        .reminders
        .snooze("owner-1", &reminder.id, Duration::minutes(10), None)
        .unwrap();

    // The snooze moved the effective due time to now+10m, so the sweep
    // leaves it alone despite the old remind_at.
    assert!(engine.reminders.expire_sweep("owner-1").unwrap().is_empty());

    clock.advance(Duration::hours(25));
    let expired = engine.reminders.expire_sweep("owner-1").unwrap();
    assert_eq!(expired.len(), 1);
}

#[tokio::test]
async fn acknowledged_recurring_reminder_chains_instances() {
    let (engine, clock) = engine_with(Arc::new(NullDelivery));
    let mut d = draft(clock.now());
    d.recurrence = Some(focuskit_core::RecurrenceRule::daily(1));
    let reminder = engine.reminders.schedule("owner-1", d).unwrap();

    engine.reminders.send("owner-1", &reminder.id).await.unwrap();
    let outcome = engine.reminders.acknowledge("owner-1", &reminder.id, None).unwrap();
    let next = outcome.next_occurrence.expect("recurring reminder spawns next");

    assert_eq!(next.remind_at, reminder.remind_at + Duration::days(1));
    assert_eq!(next.status, ReminderStatus::Pending);

    // The chain keeps going from the new instance.
    clock.advance(Duration::days(1));
    engine.reminders.send("owner-1", &next.id).await.unwrap();
    let outcome = engine.reminders.acknowledge("owner-1", &next.id, None).unwrap();
    let third = outcome.next_occurrence.expect("chain continues");
    assert_eq!(third.remind_at, reminder.remind_at + Duration::days(2));
    assert_eq!(third.occurrences_spawned, 2);
}
