//! Retry, backoff and staleness policy for TTS jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobStatus, TtsJob};

/// Retry policy for failed jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before a failed job is eligible again, in milliseconds.
    /// Zero means the next tick picks it up.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// A job left `processing` longer than this is considered abandoned
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    0
}
fn default_max_delay() -> u64 {
    300_000
} // 5 min
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_stale_after() -> u64 {
    300
} // 5 min

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            stale_after_seconds: default_stale_after(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a specific failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if another attempt is allowed after `attempts` claims
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    /// A pending job is due once its backoff since the last failure has elapsed
    pub fn is_due(&self, job: &TtsJob, now: DateTime<Utc>) -> bool {
        if job.status != JobStatus::Pending {
            return false;
        }
        if job.attempts == 0 {
            return true;
        }
        elapsed_since(job.updated_at, now) >= self.delay_for_attempt(job.attempts)
    }

    /// A processing job whose last update is older than the staleness threshold
    pub fn is_stale(&self, job: &TtsJob, now: DateTime<Utc>) -> bool {
        job.status == JobStatus::Processing && elapsed_since(job.updated_at, now) > self.stale_after()
    }
}

/// Wall-clock time between two instants, zero if `then` is in the future
fn elapsed_since(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}
