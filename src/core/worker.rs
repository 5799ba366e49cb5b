//! Polling worker that drains the TTS job queue.
//!
//! Each tick:
//! 1. Reclaims `processing` jobs abandoned longer than the staleness threshold
//! 2. Lists `pending` jobs oldest first
//! 3. Claims and processes them one at a time: synthesize, persist narration,
//!    mix (when an ambient track exists), persist mix, complete
//!
//! The job store is the only state. Every failure is converted into a job
//! transition and a log line; nothing escapes a tick.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{AudioMixer, SpeechSynthesizer};
use crate::domain::{JobStatus, TtsJob};
use crate::store::{JobStore, MediaStore, StoreError};

use super::error::{bounded, JobError, Stage};
use super::retry::RetryPolicy;

/// Worker scheduling and timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Seconds between ticks (default: 15)
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Per-call TTS timeout in seconds (default: 120)
    #[serde(default = "default_call_timeout")]
    pub tts_timeout_seconds: u64,

    /// Per-call mixer timeout in seconds (default: 120)
    #[serde(default = "default_call_timeout")]
    pub mix_timeout_seconds: u64,

    #[serde(default, flatten)]
    pub retry: RetryPolicy,
}

fn default_interval() -> u64 {
    15
}
fn default_call_timeout() -> u64 {
    120
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            tts_timeout_seconds: default_call_timeout(),
            mix_timeout_seconds: default_call_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_seconds)
    }

    pub fn mix_timeout(&self) -> Duration {
        Duration::from_secs(self.mix_timeout_seconds)
    }

    /// Reject settings the loop cannot run with. A job must be able to
    /// finish both provider calls before it counts as stale, or a live job
    /// gets reclaimed and synthesized twice.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            anyhow::bail!("worker.interval_seconds must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("worker.max_attempts must be at least 1");
        }
        if self.tts_timeout_seconds == 0 || self.mix_timeout_seconds == 0 {
            anyhow::bail!("worker call timeouts must be greater than zero");
        }

        let busy = self.tts_timeout_seconds + self.mix_timeout_seconds;
        if busy >= self.retry.stale_after_seconds {
            anyhow::bail!(
                "worker.stale_after_seconds ({}) must exceed tts_timeout_seconds + mix_timeout_seconds ({})",
                self.retry.stale_after_seconds,
                busy
            );
        }

        Ok(())
    }
}

/// What happened to one job during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Failed this attempt, back to pending
    Retrying,
    /// Terminal failure
    Failed,
    /// Another writer claimed or reclaimed the job first
    Lost,
    /// The store rejected the claim or the final write
    StoreError,
}

/// Counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
    pub lost: usize,
    /// Stale `processing` jobs returned to the queue (or failed)
    pub reclaimed: usize,
    /// Pending jobs still inside their backoff window
    pub deferred: usize,
    pub store_errors: usize,
}

impl TickReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retrying => self.retrying += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Lost => self.lost += 1,
            JobOutcome::StoreError => self.store_errors += 1,
        }
    }

    /// Jobs that reached a claim attempt this tick
    pub fn processed(&self) -> usize {
        self.completed + self.retrying + self.failed + self.lost
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(TickReport),
    /// A previous tick was still running
    Skipped,
}

/// Drives jobs through synthesis, mixing and persistence
pub struct Worker {
    pub(super) jobs: Arc<dyn JobStore>,
    pub(super) media: Arc<dyn MediaStore>,
    pub(super) tts: Arc<dyn SpeechSynthesizer>,
    pub(super) mixer: Option<Arc<dyn AudioMixer>>,
    pub(super) settings: WorkerSettings,
    tick_lock: Mutex<()>,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        media: Arc<dyn MediaStore>,
        tts: Arc<dyn SpeechSynthesizer>,
        mixer: Option<Arc<dyn AudioMixer>>,
        settings: WorkerSettings,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        Ok(Self {
            jobs,
            media,
            tts,
            mixer,
            settings,
            tick_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run one polling cycle. Never fails: errors become job transitions.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Previous tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let mut report = TickReport::default();

        if let Err(e) = self.reclaim_stale(&mut report).await {
            error!(error = %e, "Failed to scan for stale jobs");
            report.store_errors += 1;
        }

        let pending = match self.jobs.list_jobs(Some(JobStatus::Pending)).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list pending jobs");
                report.store_errors += 1;
                return TickOutcome::Ran(report);
            }
        };

        if pending.is_empty() {
            debug!("Queue empty");
            return TickOutcome::Ran(report);
        }

        for job in pending {
            if !self.settings.retry.is_due(&job, Utc::now()) {
                report.deferred += 1;
                continue;
            }
            let outcome = self.process_job(job).await;
            report.record(outcome);
        }

        info!(
            completed = report.completed,
            retrying = report.retrying,
            failed = report.failed,
            deferred = report.deferred,
            "Tick finished"
        );

        TickOutcome::Ran(report)
    }

    /// Treat jobs stuck in `processing` past the threshold as a failed attempt
    async fn reclaim_stale(&self, report: &mut TickReport) -> Result<(), StoreError> {
        let now = Utc::now();
        let policy = &self.settings.retry;

        for job in self.jobs.list_jobs(Some(JobStatus::Processing)).await? {
            if !policy.is_stale(&job, now) {
                continue;
            }

            let mut reclaimed = job.clone();
            reclaimed.fail_attempt(
                format!("stale: processing exceeded {}s", policy.stale_after_seconds),
                policy.max_attempts,
                now,
            );

            if self
                .jobs
                .update_job_if(&reclaimed, JobStatus::Processing, job.attempts)
                .await?
            {
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    status = %reclaimed.status,
                    "Reclaimed stale job"
                );
                report.reclaimed += 1;
            }
        }

        Ok(())
    }

    /// Claim one pending job, run it, and record the result
    #[instrument(skip(self, job), fields(job_id = %job.id, meditation_id = %job.meditation_id))]
    async fn process_job(&self, job: TtsJob) -> JobOutcome {
        let policy = &self.settings.retry;

        // Attempts are already spent (e.g. the limit was lowered): pin to failed
        if !policy.should_retry(job.attempts) {
            let mut exhausted = job.clone();
            exhausted.fail("attempts exhausted", Utc::now());
            return match self
                .jobs
                .update_job_if(&exhausted, JobStatus::Pending, job.attempts)
                .await
            {
                Ok(true) => JobOutcome::Failed,
                Ok(false) => JobOutcome::Lost,
                Err(e) => {
                    error!(error = %e, "Failed to pin exhausted job");
                    JobOutcome::StoreError
                }
            };
        }

        let mut claimed = job.clone();
        claimed.status = JobStatus::Processing;
        claimed.attempts += 1;
        claimed.updated_at = Utc::now();

        match self
            .jobs
            .update_job_if(&claimed, JobStatus::Pending, job.attempts)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job claimed elsewhere");
                return JobOutcome::Lost;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                return JobOutcome::StoreError;
            }
        }

        info!(attempt = claimed.attempts, "Claimed job");

        let result = self.run_job(&claimed).await;
        self.finish(claimed, result).await
    }

    /// Synthesize and mix as needed, persisting each result as soon as it exists.
    ///
    /// Writes go through the column-scoped setters, so edits made to the
    /// meditation while a provider call is in flight are never overwritten.
    async fn run_job(&self, job: &TtsJob) -> Result<(), JobError> {
        let meditation = self
            .media
            .get_meditation(job.meditation_id)
            .await?
            .ok_or(JobError::MeditationNotFound(job.meditation_id))?;

        let narration = match meditation.narration_audio_url.clone() {
            Some(existing) => {
                debug!("Narration already present, skipping synthesis");
                existing
            }
            None => {
                let script = meditation.usable_script().ok_or(JobError::NoScript)?.to_string();

                let url = bounded(
                    Stage::Synthesis,
                    self.settings.tts_timeout(),
                    self.tts.synthesize(&script),
                )
                .await?;

                self.media.set_narration(meditation.id, &url, Utc::now()).await?;
                debug!("Narration stored");
                url
            }
        };

        let Some(ambient) = meditation.ambient_audio_url.clone() else {
            return Ok(());
        };
        // Narration and mix both predate this claim
        if !meditation.needs_narration() && !meditation.needs_mix() {
            return Ok(());
        }

        let Some(ref mixer) = self.mixer else {
            warn!("Ambient track present but no mixer configured, keeping narration only");
            return Ok(());
        };

        let mixed = bounded(
            Stage::Mixing,
            self.settings.mix_timeout(),
            mixer.mix(&narration, &ambient),
        )
        .await?;

        if self
            .media
            .set_final(meditation.id, &narration, &mixed, Utc::now())
            .await?
        {
            debug!("Mix stored");
        } else {
            warn!("Narration replaced while mixing, discarding mix");
        }

        Ok(())
    }

    /// Convert the processing result into the job's next state
    async fn finish(&self, claimed: TtsJob, result: Result<(), JobError>) -> JobOutcome {
        let now = Utc::now();
        let mut updated = claimed.clone();

        match result {
            Ok(()) => updated.complete(now),
            Err(ref e) if e.is_retryable() => {
                updated.fail_attempt(e.to_string(), self.settings.retry.max_attempts, now)
            }
            Err(ref e) => updated.fail(e.to_string(), now),
        }

        let outcome = match updated.status {
            JobStatus::Completed => JobOutcome::Completed,
            JobStatus::Pending => JobOutcome::Retrying,
            _ => JobOutcome::Failed,
        };

        match self
            .jobs
            .update_job_if(&updated, JobStatus::Processing, claimed.attempts)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!("Job was reclaimed while processing, result discarded");
                return JobOutcome::Lost;
            }
            Err(e) => {
                error!(error = %e, "Failed to record job result");
                return JobOutcome::StoreError;
            }
        }

        match (&result, outcome) {
            (Ok(()), _) => info!(attempt = claimed.attempts, "Job completed"),
            (Err(e), JobOutcome::Retrying) => {
                warn!(attempt = claimed.attempts, error = %e, "Job failed, will retry")
            }
            (Err(e), _) => error!(attempt = claimed.attempts, error = %e, "Job failed permanently"),
        }

        outcome
    }
}

struct RunningLoop {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Start/stop control for a worker's polling loop.
///
/// `start` fires an immediate tick and then one per interval. Ticks never
/// overlap: a tick that overruns the interval causes missed ticks to be
/// skipped. `stop` prevents future ticks; an in-flight tick finishes on its
/// own, bounded by the per-call timeouts.
pub struct WorkerHandle {
    worker: Arc<Worker>,
    running: StdMutex<Option<RunningLoop>>,
}

impl WorkerHandle {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            running: StdMutex::new(None),
        }
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Start the polling loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(ref current) = *running {
            if !current.task.is_finished() {
                debug!("Worker already running");
                return false;
            }
        }

        let shutdown = Arc::new(Notify::new());
        let worker = Arc::clone(&self.worker);
        let stop = Arc::clone(&shutdown);
        let interval = worker.settings.interval();

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Worker started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        worker.tick().await;
                    }
                }
            }

            info!("Worker stopped");
        });

        *running = Some(RunningLoop { shutdown, task });
        true
    }

    /// Stop scheduling ticks. Returns false if the loop was not running.
    pub fn stop(&self) -> bool {
        self.take_running().is_some()
    }

    /// Stop and wait for any in-flight tick to finish
    pub async fn shutdown(&self) {
        if let Some(task) = self.take_running() {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|r| !r.task.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|r| !r.task.is_finished()),
        }
    }

    fn take_running(&self) -> Option<JoinHandle<()>> {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let current = running.take()?;
        // notify_one stores a permit, so a loop busy in a tick still sees it
        current.shutdown.notify_one();
        Some(current.task)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.take_running();
    }
}
