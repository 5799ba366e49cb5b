//! TTS job records.
//!
//! A job exists to service exactly one meditation. The job store is the
//! single source of truth for job state; the worker keeps nothing in memory
//! between ticks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a TTS job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Pending,

    /// Claimed by a worker tick
    Processing,

    /// Audio produced and persisted
    Completed,

    /// Terminal failure (no script, missing meditation, or attempts exhausted)
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Active jobs block the creation of another job for the same meditation
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A queued request to narrate one meditation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// The meditation this job services
    pub meditation_id: Uuid,

    /// Current status
    pub status: JobStatus,

    /// Number of claims so far (incremented on every pending -> processing)
    pub attempts: u32,

    /// Error recorded by the most recent failed attempt
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TtsJob {
    /// Create a fresh pending job for a meditation
    pub fn new(meditation_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            meditation_id,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Mark completed, keeping the last error of earlier attempts for inspection
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = now;
    }

    /// Record a non-retryable failure
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Record a retryable failure: back to pending while attempts remain,
    /// otherwise pinned to failed.
    pub fn fail_attempt(&mut self, error: impl Into<String>, max_attempts: u32, now: DateTime<Utc>) {
        self.last_error = Some(error.into());
        self.updated_at = now;
        self.status = if self.attempts < max_attempts {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };
    }
}
