//! In-memory job and media store.
//!
//! Records live in insertion order behind a tokio `Mutex`; every trait call
//! is one read-modify-write under the lock, so `update_job_if` is atomic.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobStore, MediaStore, StoreError};
use crate::domain::{JobStatus, Meditation, TtsJob};

#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<TtsJob>>,
    meditations: Mutex<Vec<Meditation>>,
    /// Simulated outage: every call fails while set
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

/// Stable sort keeps insertion order for equal timestamps
fn oldest_first<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &TtsJob) -> Result<(), StoreError> {
        self.check()?;
        self.jobs.lock().await.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<TtsJob>, StoreError> {
        self.check()?;
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<TtsJob>, StoreError> {
        self.check()?;
        let jobs = self.jobs.lock().await;
        let matching: Vec<TtsJob> = jobs
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        Ok(oldest_first(matching, |j| j.created_at))
    }

    async fn active_job_for(&self, meditation_id: Uuid) -> Result<Option<TtsJob>, StoreError> {
        self.check()?;
        let jobs = self.jobs.lock().await;
        let active: Vec<TtsJob> = jobs
            .iter()
            .filter(|j| j.meditation_id == meditation_id && j.is_active())
            .cloned()
            .collect();
        Ok(oldest_first(active, |j| j.created_at).into_iter().next())
    }

    async fn update_job_if(
        &self,
        job: &TtsJob,
        expected_status: JobStatus,
        expected_attempts: u32,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut jobs = self.jobs.lock().await;
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(StoreError::NotFound {
                entity: "job",
                id: job.id,
            })?;

        if stored.status != expected_status || stored.attempts != expected_attempts {
            return Ok(false);
        }

        *stored = job.clone();
        Ok(true)
    }

    async fn delete_all_jobs(&self) -> Result<usize, StoreError> {
        self.check()?;
        let mut jobs = self.jobs.lock().await;
        let count = jobs.len();
        jobs.clear();
        Ok(count)
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn insert_meditation(&self, meditation: &Meditation) -> Result<(), StoreError> {
        self.check()?;
        self.meditations.lock().await.push(meditation.clone());
        Ok(())
    }

    async fn get_meditation(&self, id: Uuid) -> Result<Option<Meditation>, StoreError> {
        self.check()?;
        let meditations = self.meditations.lock().await;
        Ok(meditations.iter().find(|m| m.id == id).cloned())
    }

    async fn list_meditations(&self) -> Result<Vec<Meditation>, StoreError> {
        self.check()?;
        let meditations = self.meditations.lock().await.clone();
        Ok(oldest_first(meditations, |m| m.created_at))
    }

    async fn update_meditation(&self, meditation: &Meditation) -> Result<(), StoreError> {
        self.check()?;
        let mut meditations = self.meditations.lock().await;
        let stored = meditations
            .iter_mut()
            .find(|m| m.id == meditation.id)
            .ok_or(StoreError::NotFound {
                entity: "meditation",
                id: meditation.id,
            })?;
        *stored = meditation.clone();
        Ok(())
    }

    async fn set_narration(
        &self,
        id: Uuid,
        narration_url: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut meditations = self.meditations.lock().await;
        let stored = meditations
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound {
                entity: "meditation",
                id,
            })?;
        stored.set_narration(narration_url.to_string(), at);
        Ok(())
    }

    async fn set_final(
        &self,
        id: Uuid,
        narration_url: &str,
        final_url: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut meditations = self.meditations.lock().await;
        let stored = meditations
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound {
                entity: "meditation",
                id,
            })?;
        if stored.narration_audio_url.as_deref() != Some(narration_url) {
            return Ok(false);
        }
        stored.set_final(final_url.to_string(), at);
        Ok(true)
    }

    async fn delete_all_meditations(&self) -> Result<usize, StoreError> {
        self.check()?;
        let mut meditations = self.meditations.lock().await;
        let count = meditations.len();
        meditations.clear();
        Ok(count)
    }
}
