//! Integration tests for the optimistic-concurrency contract.
//!
//! The two-client scenario runs against both store implementations to
//! keep them behaviorally identical: create at v1, both clients fetch,
//! the first edit wins, the stale edit conflicts and receives the
//! authoritative record.

use std::sync::Arc;

use focuskit_core::{
    ChangeOp, ChangeOutcome, ClientChange, Clock, ConflictRecord, DeliveryMethod,
    DeliveryOutcome, Engine, EngineConfig, EngineRepository, InMemoryStore, ManualClock,
    NotificationDelivery, Reminder, SqliteStore, TaskDraft, TaskPatch,
};

struct NullDelivery;

#[async_trait::async_trait]
impl NotificationDelivery for NullDelivery {
    async fn deliver(&self, _: &Reminder, _: DeliveryMethod) -> DeliveryOutcome {
        DeliveryOutcome::Delivered
    }
}

fn engine<S: EngineRepository + 'static>(store: Arc<S>) -> Engine {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new("2026-03-10T09:00:00Z".parse().unwrap()));
    Engine::new(
        store,
        Arc::new(NullDelivery),
        clock,
        &EngineConfig::default(),
    )
}

fn two_clients_race_scenario(engine: &Engine) {
    let task = engine.tasks.create("owner-1", TaskDraft::new("draft the plan")).unwrap();
    assert_eq!(task.sync_version, 1);

    // Both clients fetch v1.
    let seen_by_a = engine.tasks.get("owner-1", &task.id).unwrap();
    let seen_by_b = engine.tasks.get("owner-1", &task.id).unwrap();
    assert_eq!(seen_by_a.sync_version, 1);
    assert_eq!(seen_by_b.sync_version, 1);

    // Client A lands first.
    let updated = engine
        .tasks
        .update(
            "owner-1",
            &task.id,
            &TaskPatch {
                title: Some("plan, revised by A".into()),
                ..Default::default()
            },
            seen_by_a.sync_version,
        )
        .unwrap();
    assert_eq!(updated.sync_version, 2);

    // Client B submits against the version it fetched.
    let err = engine
        .tasks
        .update(
            "owner-1",
            &task.id,
            &TaskPatch {
                title: Some("plan, revised by B".into()),
                ..Default::default()
            },
            seen_by_b.sync_version,
        )
        .unwrap_err();
    assert!(err.is_conflict());
    match err.conflict_record() {
        Some(ConflictRecord::Task(current)) => {
            assert_eq!(current.sync_version, 2);
            assert_eq!(current.title, "plan, revised by A");
        }
        _ => panic!("expected the authoritative task record"),
    }

    // B re-reads and retries; the retry succeeds at v3.
    let fresh = engine.tasks.get("owner-1", &task.id).unwrap();
    let merged = engine
        .tasks
        .update(
            "owner-1",
            &task.id,
            &TaskPatch {
                title: Some("plan, merged".into()),
                ..Default::default()
            },
            fresh.sync_version,
        )
        .unwrap();
    assert_eq!(merged.sync_version, 3);
}

#[test]
fn two_clients_race_in_memory() {
    two_clients_race_scenario(&engine(Arc::new(InMemoryStore::new())));
}

#[test]
fn two_clients_race_sqlite() {
    two_clients_race_scenario(&engine(Arc::new(SqliteStore::open_memory().unwrap())));
}

#[test]
fn sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("focuskit.db");

    let task = {
        let engine = engine(Arc::new(SqliteStore::open(&path).unwrap()));
        engine.tasks.create("owner-1", TaskDraft::new("durable")).unwrap()
    };

    let engine = engine(Arc::new(SqliteStore::open(&path).unwrap()));
    let loaded = engine.tasks.get("owner-1", &task.id).unwrap();
    assert_eq!(loaded.title, "durable");
    assert_eq!(loaded.sync_version, 1);
}

#[test]
fn batch_sync_reports_every_outcome_kind() {
    let engine = engine(Arc::new(InMemoryStore::new()));
    let task = engine.tasks.create("owner-1", TaskDraft::new("shared")).unwrap();

    // Another device advanced the task before this batch arrives.
    engine
        .tasks
        .update(
            "owner-1",
            &task.id,
            &TaskPatch {
                progress: Some(50),
                ..Default::default()
            },
            1,
        )
        .unwrap();

    let report = engine
        .sync
        .apply_batch(
            "owner-1",
            vec![
                ClientChange {
                    change_id: "q-1".into(),
                    op: ChangeOp::UpdateTask {
                        id: task.id.clone(),
                        patch: TaskPatch {
                            progress: Some(75),
                            ..Default::default()
                        },
                        expected_version: 1,
                    },
                },
                ClientChange {
                    change_id: "q-2".into(),
                    op: ChangeOp::CreateTask {
                        draft: TaskDraft::new("queued offline"),
                    },
                },
                ClientChange {
                    change_id: "q-3".into(),
                    op: ChangeOp::UpdateTask {
                        id: "task-does-not-exist".into(),
                        patch: TaskPatch::default(),
                        expected_version: 1,
                    },
                },
            ],
        )
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.results[0].change_id, "q-1");
    assert!(matches!(
        report.results[0].outcome,
        ChangeOutcome::Conflict {
            submitted_version: 1,
            ..
        }
    ));
}

#[test]
fn deletion_is_soft_and_versioned() {
    let engine = engine(Arc::new(SqliteStore::open_memory().unwrap()));
    let task = engine.tasks.create("owner-1", TaskDraft::new("short-lived")).unwrap();

    // Stale delete conflicts like any other mutation.
    engine
        .tasks
        .update(
            "owner-1",
            &task.id,
            &TaskPatch {
                priority: Some(focuskit_core::TaskPriority::High),
                ..Default::default()
            },
            1,
        )
        .unwrap();
    assert!(engine
        .tasks
        .soft_delete("owner-1", &task.id, 1)
        .unwrap_err()
        .is_conflict());

    let deleted = engine.tasks.soft_delete("owner-1", &task.id, 2).unwrap();
    assert!(deleted.deleted);
    assert!(deleted.deleted_at.is_some());
    assert_eq!(deleted.sync_version, 3);

    assert!(engine.tasks.get("owner-1", &task.id).unwrap_err().is_not_found());
}
