//! Engine facade: wires the services over one store, clock, and
//! delivery transport.
//!
//! The (out-of-scope) API layer holds one `Engine` and maps its routes
//! onto these fields; every response carries the entity's current
//! `sync_version` so clients can retry on conflict.

use std::sync::Arc;

use crate::clock::Clock;
use crate::reminder::delivery::NotificationDelivery;
use crate::reminder::scheduler::ReminderScheduler;
use crate::session::state_machine::SessionService;
use crate::stats::StatisticsAggregator;
use crate::storage::{
    EngineConfig, EngineRepository, ReminderRepository, SessionRepository, TaskRepository,
};
use crate::sync::SyncCoordinator;
use crate::task::store::TaskStore;

pub struct Engine {
    pub tasks: TaskStore,
    pub sessions: SessionService,
    pub reminders: ReminderScheduler,
    pub stats: Arc<StatisticsAggregator>,
    pub sync: SyncCoordinator,
}

impl Engine {
    pub fn new<S>(
        store: Arc<S>,
        delivery: Arc<dyn NotificationDelivery>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self
    where
        S: EngineRepository + 'static,
    {
        let stats = Arc::new(StatisticsAggregator::new(
            Arc::clone(&store) as Arc<dyn SessionRepository>,
            Arc::clone(&store) as Arc<dyn TaskRepository>,
        ));
        let tasks = TaskStore::new(
            Arc::clone(&store) as Arc<dyn TaskRepository>,
            Arc::clone(&stats),
            Arc::clone(&clock),
        );
        let sessions = SessionService::new(
            Arc::clone(&store) as Arc<dyn SessionRepository>,
            Arc::clone(&stats),
            Arc::clone(&clock),
        );
        let reminders = ReminderScheduler::with_policy(
            store as Arc<dyn ReminderRepository>,
            delivery,
            clock,
            &config.reminders,
            &config.delivery,
        );
        let sync = SyncCoordinator::new(tasks.clone(), sessions.clone(), reminders.clone());
        Self {
            tasks,
            sessions,
            reminders,
            stats,
            sync,
        }
    }
}
