//! Job and media repositories.
//!
//! The worker, controllers and admin trigger only talk to these traits, so
//! the pipeline logic is storage-agnostic. Two implementations ship:
//! - `MemoryStore`: in-process fake, used by tests and dry runs
//! - `SqliteStore`: durable single-file store

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{JobStatus, Meditation, TtsJob};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Durable table of TTS jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job
    async fn insert_job(&self, job: &TtsJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<TtsJob>, StoreError>;

    /// List jobs, optionally filtered by status, oldest created first
    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<TtsJob>, StoreError>;

    /// The oldest pending/processing job for a meditation, if any
    async fn active_job_for(&self, meditation_id: Uuid) -> Result<Option<TtsJob>, StoreError>;

    /// Atomically replace a job if the stored copy still has the expected
    /// status and attempt count. Returns false when another writer got there
    /// first. This is the claim primitive.
    async fn update_job_if(
        &self,
        job: &TtsJob,
        expected_status: JobStatus,
        expected_attempts: u32,
    ) -> Result<bool, StoreError>;

    /// Delete every job, returning how many were removed
    async fn delete_all_jobs(&self) -> Result<usize, StoreError>;
}

/// Durable table of meditations
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert_meditation(&self, meditation: &Meditation) -> Result<(), StoreError>;

    async fn get_meditation(&self, id: Uuid) -> Result<Option<Meditation>, StoreError>;

    /// All meditations, oldest created first
    async fn list_meditations(&self) -> Result<Vec<Meditation>, StoreError>;

    /// Overwrite an existing meditation. Fails with `NotFound` if it was deleted.
    async fn update_meditation(&self, meditation: &Meditation) -> Result<(), StoreError>;

    /// Store a new narration track and drop any mix built from the previous
    /// one. Only the audio columns and status are written, so concurrent
    /// edits to other fields survive. Fails with `NotFound` if deleted.
    async fn set_narration(
        &self,
        id: Uuid,
        narration_url: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Store a mix, but only if the record still carries the narration it was
    /// built from. Returns false when the narration changed in the meantime.
    async fn set_final(
        &self,
        id: Uuid,
        narration_url: &str,
        final_url: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Delete every meditation, returning how many were removed
    async fn delete_all_meditations(&self) -> Result<usize, StoreError>;
}

/// Queue status summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub counts: HashMap<JobStatus, usize>,
    pub recent: Vec<TtsJob>,
}

impl QueueStatus {
    pub fn count(&self, status: JobStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Total jobs in the store
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Summarize the job table: counts per status and the five most recently
/// updated jobs.
pub async fn queue_status(jobs: &dyn JobStore) -> Result<QueueStatus, StoreError> {
    let all = jobs.list_jobs(None).await?;

    let mut status = QueueStatus::default();
    for job in &all {
        *status.counts.entry(job.status).or_insert(0) += 1;
    }

    let mut recent = all;
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent.truncate(5);
    status.recent = recent;

    Ok(status)
}
