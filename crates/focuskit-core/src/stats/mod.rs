//! Daily and weekly statistics rollups.
//!
//! Rollups are derived at read time from completed sessions and tasks,
//! never stored as ground truth, so they cannot drift from the records
//! they summarize. A per-(owner, day) cache keeps repeat reads cheap;
//! session and task completion invalidate the affected day so the next
//! read recomputes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::session::SessionType;
use crate::storage::{SessionRepository, TaskRepository};

/// One owner-day of completed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub owner_id: String,
    pub date: NaiveDate,
    pub sessions_completed: u32,
    pub focus_minutes: u64,
    pub tasks_completed: u32,
}

/// Seven days of rollups plus a completion-rate ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStats {
    pub owner_id: String,
    pub week_start: NaiveDate,
    pub days: Vec<DailyStats>,
    pub sessions_completed: u32,
    pub focus_minutes: u64,
    pub tasks_completed: u32,
    /// completed / total tasks touched in the window; 0 when nothing
    /// was touched.
    pub completion_rate: f64,
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// Read-time aggregator over the session and task repositories.
pub struct StatisticsAggregator {
    sessions: Arc<dyn SessionRepository>,
    tasks: Arc<dyn TaskRepository>,
    cache: Mutex<HashMap<(String, NaiveDate), DailyStats>>,
}

impl StatisticsAggregator {
    pub fn new(sessions: Arc<dyn SessionRepository>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self {
            sessions,
            tasks,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop the cached rollup for an owner-day so the next read
    /// recomputes it. Called when a session or task completes.
    pub fn invalidate(&self, owner_id: &str, date: NaiveDate) {
        let removed = self
            .cache
            .lock()
            .unwrap()
            .remove(&(owner_id.to_string(), date));
        if removed.is_some() {
            debug!(owner_id, %date, "invalidated daily rollup");
        }
    }

    /// Rollup for one owner-day.
    pub fn daily(&self, owner_id: &str, date: NaiveDate) -> Result<DailyStats> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap()
            .get(&(owner_id.to_string(), date))
        {
            return Ok(cached.clone());
        }

        let (start, end) = day_bounds(date);
        let mut stats = DailyStats {
            owner_id: owner_id.to_string(),
            date,
            sessions_completed: 0,
            focus_minutes: 0,
            tasks_completed: 0,
        };
        for session in self
            .sessions
            .list_sessions_completed_between(owner_id, start, end)?
        {
            if session.kind == SessionType::Work {
                stats.sessions_completed += 1;
                stats.focus_minutes += session.elapsed_minutes();
            }
        }
        stats.tasks_completed = self
            .tasks
            .list_tasks_completed_between(owner_id, start, end)?
            .len() as u32;

        self.cache
            .lock()
            .unwrap()
            .insert((owner_id.to_string(), date), stats.clone());
        Ok(stats)
    }

    /// Rollup over the 7 days starting at `week_start`.
    pub fn weekly(&self, owner_id: &str, week_start: NaiveDate) -> Result<WeeklyStats> {
        let mut days = Vec::with_capacity(7);
        for offset in 0..7 {
            days.push(self.daily(owner_id, week_start + Duration::days(offset))?);
        }

        let window_start = week_start.and_time(NaiveTime::MIN).and_utc();
        let window_end = window_start + Duration::days(7);
        let touched = self
            .tasks
            .list_tasks_updated_between(owner_id, window_start, window_end)?;
        let completed_in_window = touched
            .iter()
            .filter(|t| {
                t.completed
                    && t.completed_at
                        .map(|at| at >= window_start && at < window_end)
                        .unwrap_or(false)
            })
            .count();
        let completion_rate = if touched.is_empty() {
            0.0
        } else {
            completed_in_window as f64 / touched.len() as f64
        };

        Ok(WeeklyStats {
            owner_id: owner_id.to_string(),
            week_start,
            sessions_completed: days.iter().map(|d| d.sessions_completed).sum(),
            focus_minutes: days.iter().map(|d| d.focus_minutes).sum(),
            tasks_completed: days.iter().map(|d| d.tasks_completed).sum(),
            completion_rate,
            days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PomodoroSession, SessionDraft, SessionStatus};
    use crate::storage::InMemoryStore;
    use crate::task::{Task, TaskDraft};

    fn now() -> DateTime<Utc> {
        "2026-03-10T09:00:00Z".parse().unwrap()
    }

    fn aggregator(store: &Arc<InMemoryStore>) -> StatisticsAggregator {
        StatisticsAggregator::new(
            Arc::clone(store) as Arc<dyn SessionRepository>,
            Arc::clone(store) as Arc<dyn TaskRepository>,
        )
    }

    fn completed_work_session(at: DateTime<Utc>, minutes: u32) -> PomodoroSession {
        let mut session = PomodoroSession::from_draft("owner-1", SessionDraft::work(minutes, None), at);
        session.status = SessionStatus::Completed;
        session.remaining_ms = 0;
        session.completed_at = Some(at);
        session
    }

    #[test]
    fn three_work_sessions_report_75_focus_minutes() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..3 {
            let session = completed_work_session(now() + Duration::hours(i), 25);
            store.insert_session(&session).unwrap();
        }

        let stats = aggregator(&store).daily("owner-1", now().date_naive()).unwrap();
        assert_eq!(stats.sessions_completed, 3);
        assert_eq!(stats.focus_minutes, 75);
        assert_eq!(stats.tasks_completed, 0);
    }

    #[test]
    fn breaks_do_not_count_as_focus() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_session(&completed_work_session(now(), 25))
            .unwrap();

        let mut brk = PomodoroSession::from_draft(
            "owner-1",
            SessionDraft {
                task_id: None,
                kind: SessionType::ShortBreak,
                planned_minutes: 5,
            },
            now(),
        );
        brk.status = SessionStatus::Completed;
        brk.remaining_ms = 0;
        brk.completed_at = Some(now());
        store.insert_session(&brk).unwrap();

        let stats = aggregator(&store).daily("owner-1", now().date_naive()).unwrap();
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.focus_minutes, 25);
    }

    #[test]
    fn invalidation_forces_recompute() {
        let store = Arc::new(InMemoryStore::new());
        let agg = aggregator(&store);
        let date = now().date_naive();

        assert_eq!(agg.daily("owner-1", date).unwrap().sessions_completed, 0);

        store
            .insert_session(&completed_work_session(now(), 25))
            .unwrap();
        // Cached value still served until invalidated.
        assert_eq!(agg.daily("owner-1", date).unwrap().sessions_completed, 0);

        agg.invalidate("owner-1", date);
        assert_eq!(agg.daily("owner-1", date).unwrap().sessions_completed, 1);
    }

    #[test]
    fn weekly_completion_rate() {
        let store = Arc::new(InMemoryStore::new());

        let mut done = Task::from_draft("owner-1", TaskDraft::new("done"), now());
        done.completed = true;
        done.progress = 100;
        done.completed_at = Some(now());
        store.insert_task(&done).unwrap();

        let open = Task::from_draft("owner-1", TaskDraft::new("open"), now());
        store.insert_task(&open).unwrap();

        // Monday of the week containing `now` (2026-03-10 is a Tuesday).
        let week_start = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let weekly = aggregator(&store).weekly("owner-1", week_start).unwrap();
        assert_eq!(weekly.tasks_completed, 1);
        assert!((weekly.completion_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(weekly.days.len(), 7);
    }

    #[test]
    fn empty_window_rate_is_zero() {
        let store = Arc::new(InMemoryStore::new());
        let weekly = aggregator(&store)
            .weekly("owner-1", now().date_naive())
            .unwrap();
        assert_eq!(weekly.completion_rate, 0.0);
        assert_eq!(weekly.sessions_completed, 0);
    }
}
