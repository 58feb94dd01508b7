//! Property-based tests for versioning and recurrence expansion.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use proptest::prelude::*;

use focuskit_core::{
    recurrence, Clock, InMemoryStore, ManualClock, RecurrenceEnd, RecurrenceRule,
    SessionRepository, StatisticsAggregator, TaskDraft, TaskPatch, TaskPriority,
    TaskRepository, TaskStore, WeekdaySet,
};

fn task_store() -> TaskStore {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new("2026-03-10T09:00:00Z".parse().unwrap()));
    let stats = Arc::new(StatisticsAggregator::new(
        Arc::clone(&store) as Arc<dyn SessionRepository>,
        Arc::clone(&store) as Arc<dyn TaskRepository>,
    ));
    TaskStore::new(store, stats, clock as Arc<dyn Clock>)
}

fn arb_patch() -> impl Strategy<Value = TaskPatch> {
    prop_oneof![
        "[a-z][a-z ]{0,39}".prop_map(|title| TaskPatch {
            title: Some(title),
            ..Default::default()
        }),
        // Stays below 100 so the sequence never completes the task.
        (0u8..=99).prop_map(|progress| TaskPatch {
            progress: Some(progress),
            ..Default::default()
        }),
        prop_oneof![
            Just(TaskPriority::Low),
            Just(TaskPriority::Medium),
            Just(TaskPriority::High),
            Just(TaskPriority::Urgent),
        ]
        .prop_map(|priority| TaskPatch {
            priority: Some(priority),
            ..Default::default()
        }),
        proptest::collection::vec("[a-z]{1,8}", 0..5).prop_map(|tags| TaskPatch {
            tags: Some(tags),
            ..Default::default()
        }),
    ]
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

proptest! {
    #[test]
    fn version_advances_by_exactly_one_per_update(
        patches in proptest::collection::vec(arb_patch(), 1..20)
    ) {
        let tasks = task_store();
        let task = tasks.create("owner-1", TaskDraft::new("subject")).unwrap();
        let mut version = task.sync_version;

        for patch in &patches {
            let updated = tasks.update("owner-1", &task.id, patch, version).unwrap();
            prop_assert_eq!(updated.sync_version, version + 1);
            version = updated.sync_version;
        }
        prop_assert_eq!(version, 1 + patches.len() as i64);
    }

    #[test]
    fn stale_version_always_conflicts(
        patches in proptest::collection::vec(arb_patch(), 2..10),
        stale_pick in 0usize..8,
    ) {
        let tasks = task_store();
        let task = tasks.create("owner-1", TaskDraft::new("subject")).unwrap();
        let mut version = task.sync_version;

        for patch in &patches {
            version = tasks.update("owner-1", &task.id, patch, version).unwrap().sync_version;
        }

        let stale = 1 + (stale_pick as i64 % (version - 1).max(1));
        prop_assume!(stale < version);
        let err = tasks
            .update("owner-1", &task.id, &TaskPatch::default(), stale)
            .unwrap_err();
        prop_assert!(err.is_conflict());
    }

    #[test]
    fn daily_next_lands_interval_days_out(
        interval in 1u32..365,
        offset in 0i64..3650,
    ) {
        let from = base_date() + Duration::days(offset);
        let rule = RecurrenceRule::daily(interval);
        prop_assert_eq!(
            recurrence::next(&rule, from, 0),
            Some(from + Duration::days(i64::from(interval)))
        );
    }

    #[test]
    fn until_end_never_yields_past_the_cutoff(
        interval in 1u32..60,
        offset in 0i64..3650,
        window in 0i64..120,
    ) {
        let from = base_date() + Duration::days(offset);
        let cutoff = from + Duration::days(window);
        let rule = RecurrenceRule::daily(interval).with_end(RecurrenceEnd::Until { date: cutoff });
        if let Some(next) = recurrence::next(&rule, from, 0) {
            prop_assert!(next <= cutoff);
        }
    }

    #[test]
    fn weekly_next_is_later_and_lands_on_a_selected_day(
        days in proptest::collection::btree_set(0u8..=6, 1..=7),
        interval in 1u32..8,
        offset in 0i64..3650,
    ) {
        let from = base_date() + Duration::days(offset);
        let day_vec: Vec<u8> = days.iter().copied().collect();
        let set = WeekdaySet::from_days(&day_vec).unwrap();
        let rule = RecurrenceRule::weekly(interval, set);

        let next = recurrence::next(&rule, from, 0).expect("unbounded weekly rule");
        prop_assert!(next > from);
        prop_assert!(set.contains(next.weekday().num_days_from_sunday() as u8));
    }

    #[test]
    fn monthly_never_exceeds_the_requested_day(
        day_of_month in 1u8..=31,
        interval in 1u32..24,
        offset in 0i64..3650,
    ) {
        let from = base_date() + Duration::days(offset);
        let rule = RecurrenceRule::monthly(interval, day_of_month);

        let next = recurrence::next(&rule, from, 0).expect("unbounded monthly rule");
        prop_assert!(next.day() <= u32::from(day_of_month));
        // Clamping only shortens: the result is the last day of a short
        // month or exactly the requested day.
        let month_len = (28..=31)
            .rev()
            .find(|&d| NaiveDate::from_ymd_opt(next.year(), next.month(), d).is_some())
            .unwrap();
        prop_assert!(next.day() == u32::from(day_of_month) || next.day() == month_len);
    }

    #[test]
    fn max_occurrences_is_a_hard_cap(
        interval in 1u32..30,
        cap in 1u32..20,
        generated in 0u32..40,
    ) {
        let rule = RecurrenceRule::daily(interval)
            .with_end(RecurrenceEnd::MaxOccurrences { count: cap });
        let result = recurrence::next(&rule, base_date(), generated);
        prop_assert_eq!(result.is_some(), generated < cap);
    }
}
