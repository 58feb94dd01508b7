//! # Focuskit Core Library
//!
//! This library is the task and session synchronization engine for
//! Focuskit: a personal task tracker combined with a Pomodoro-style
//! focus timer, used from multiple devices whose offline edits later
//! reconcile against the server copy. HTTP routing, authentication, and
//! notification transports live outside this crate; the engine consumes
//! a persistence interface, a delivery interface, and a clock.
//!
//! ## Architecture
//!
//! - **TaskStore**: versioned task CRUD with optimistic concurrency --
//!   every mutation compare-and-swaps on `sync_version`
//! - **SessionService**: the Pomodoro session state machine, with the
//!   task-counter side effect applied atomically on completion
//! - **ReminderScheduler**: due checks, bounded snooze, delivery with
//!   retry/backoff, and the expiry sweep
//! - **RecurrenceEngine**: pure next-occurrence expansion
//! - **StatisticsAggregator**: read-time daily/weekly rollups
//! - **SyncCoordinator**: batch application of queued client changes
//!
//! ## Key Components
//!
//! - [`Engine`]: facade wiring the services over one store
//! - [`storage::InMemoryStore`] / [`storage::SqliteStore`]: the two
//!   persistence implementations
//! - [`EngineError`]: the error taxonomy with classifier helpers

pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod recurrence;
pub mod reminder;
pub mod session;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Engine;
pub use error::{
    ConflictRecord, DeliveryError, EngineError, EntityKind, Result, StorageError, ValidationError,
};
pub use events::Event;
pub use recurrence::{RecurrenceEnd, RecurrencePattern, RecurrenceRule, WeekdaySet};
pub use reminder::delivery::{
    AttemptOutcome, DeliveryAttempt, DeliveryOutcome, NotificationDelivery, RetryPolicy,
};
pub use reminder::scheduler::{AcknowledgeOutcome, ReminderScheduler};
pub use reminder::{DeliveryMethod, Reminder, ReminderDraft, ReminderKind, ReminderStatus};
pub use session::state_machine::SessionService;
pub use session::{
    CompletionInput, PomodoroSession, SessionAction, SessionDraft, SessionStatus, SessionType,
};
pub use stats::{DailyStats, StatisticsAggregator, WeeklyStats};
pub use storage::{
    CasOutcome, EngineConfig, EngineRepository, InMemoryStore, ReminderRepository,
    SessionRepository, SqliteStore, TaskRepository,
};
pub use sync::{
    ChangeOp, ChangeOutcome, ChangeResult, ClientChange, RejectKind, SyncCoordinator, SyncReport,
};
pub use task::store::{TaskFilter, TaskStore};
pub use task::{Task, TaskDraft, TaskPatch, TaskPriority};
