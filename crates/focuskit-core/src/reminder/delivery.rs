//! Notification delivery interface and retry policy.
//!
//! The engine never talks to a transport directly. It hands reminders to
//! a [`NotificationDelivery`] implementation and records every attempt in
//! the delivery log, retrying transient failures with capped exponential
//! backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{DeliveryMethod, Reminder};

/// Result of a single transport attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Worth retrying (network error, timeout).
    TransientFailure(String),
    /// Not worth retrying (invalid address, revoked token).
    PermanentFailure(String),
}

/// Consumed interface to the notification transport.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn deliver(&self, reminder: &Reminder, method: DeliveryMethod) -> DeliveryOutcome;
}

/// Bounded-retry policy for transient failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base doubled per
    /// attempt plus uniform jitter to spread concurrent retries.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exp = self.backoff_base_ms.saturating_mul(1 << attempt.min(16));
        let jitter = if self.backoff_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.backoff_jitter_ms)
        } else {
            0
        };
        std::time::Duration::from_millis(exp + jitter)
    }
}

/// How a logged attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
    /// Final transient failure once the retry budget ran out.
    Exhausted,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Transient => "transient",
            AttemptOutcome::Permanent => "permanent",
            AttemptOutcome::Exhausted => "exhausted",
        }
    }
}

/// One row in the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub reminder_id: String,
    pub owner_id: String,
    pub method: DeliveryMethod,
    /// 1-based attempt number within one send.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempts() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_jitter_ms: 0,
        };
        assert_eq!(policy.backoff(1).as_millis(), 200);
        assert_eq!(policy.backoff(2).as_millis(), 400);
        assert_eq!(policy.backoff(3).as_millis(), 800);
    }

    #[test]
    fn backoff_jitter_bounded() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_jitter_ms: 50,
        };
        for _ in 0..32 {
            let ms = policy.backoff(1).as_millis() as u64;
            assert!((200..=250).contains(&ms));
        }
    }
}
