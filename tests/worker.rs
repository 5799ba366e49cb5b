//! Worker tick scenarios against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use common::{fast_settings, harness, harness_with, seed, Reply};
use narrator::adapters::{AudioMixer, SpeechSynthesizer};
use narrator::core::{backfill, TickOutcome, TickReport, Worker, WorkerHandle};
use narrator::domain::{JobStatus, MeditationStatus, NewMeditation, TtsJob};
use narrator::store::{JobStore, MediaStore, MemoryStore};

async fn tick(worker: &Worker) -> TickReport {
    match worker.tick().await {
        TickOutcome::Ran(report) => report,
        TickOutcome::Skipped => panic!("tick unexpectedly skipped"),
    }
}

async fn only_job(store: &dyn JobStore) -> TtsJob {
    let mut jobs = store.list_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    jobs.remove(0)
}

#[tokio::test]
async fn test_success_without_ambient() {
    let h = harness();
    let m = seed(&h.store, NewMeditation::new("Breath", "Breathe in. Breathe out.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.completed, 1);

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);

    let m = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(m.narration_audio_url.is_some());
    assert!(m.final_audio_url.is_none());
    assert_eq!(m.status, MeditationStatus::Ready);
    assert_eq!(h.mixer.script.calls(), 0);
    assert_eq!(h.tts.texts.lock().unwrap()[0], "Breathe in. Breathe out.");
}

#[tokio::test]
async fn test_success_with_ambient_mixes() {
    let h = harness();
    let m = seed(
        &h.store,
        NewMeditation::new("Rain", "Listen to the rain.").with_ambient("https://cdn.test/rain.mp3"),
    )
    .await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    tick(&h.worker).await;

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Completed);

    let m = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(m.narration_audio_url.is_some());
    assert!(m.final_audio_url.as_deref().unwrap().starts_with("https://mix.test/"));
    assert_eq!(h.mixer.script.calls(), 1);
}

#[tokio::test]
async fn test_ambient_without_mixer_completes_with_narration_only() {
    let h = harness_with(fast_settings(), false);
    let m = seed(
        &h.store,
        NewMeditation::new("Rain", "Listen to the rain.").with_ambient("https://cdn.test/rain.mp3"),
    )
    .await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    tick(&h.worker).await;

    assert_eq!(only_job(h.store.as_ref()).await.status, JobStatus::Completed);
    let m = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(m.narration_audio_url.is_some());
    assert!(m.final_audio_url.is_none());
}

#[tokio::test]
async fn test_empty_script_fails_without_calling_tts() {
    let h = harness();
    seed(&h.store, NewMeditation::new("Blank", "   ")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.failed, 1);

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("no script"));
    assert_eq!(h.tts.script.calls(), 0);

    // Terminal: later ticks leave it alone
    tick(&h.worker).await;
    assert_eq!(only_job(h.store.as_ref()).await.attempts, 1);
}

#[tokio::test]
async fn test_missing_meditation_fails_job() {
    let h = harness();
    let orphan = TtsJob::new(Uuid::new_v4());
    h.store.insert_job(&orphan).await.unwrap();

    tick(&h.worker).await;

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().contains("meditation not found"));
}

#[tokio::test]
async fn test_two_failures_then_success() {
    let h = harness();
    h.tts.script.push(Reply::Fail("503 Service Unavailable"));
    h.tts.script.push(Reply::Fail("503 Service Unavailable"));
    let m = seed(&h.store, NewMeditation::new("Gratitude", "Give thanks.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let first = tick(&h.worker).await;
    assert_eq!(first.retrying, 1);
    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("503"));

    tick(&h.worker).await;
    let third = tick(&h.worker).await;
    assert_eq!(third.completed, 1);

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);

    let m = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(m.narration_audio_url.is_some());
}

#[tokio::test]
async fn test_always_failing_provider_exhausts_attempts() {
    let h = harness();
    for _ in 0..5 {
        h.tts.script.push(Reply::Fail("provider exploded"));
    }
    let m = seed(&h.store, NewMeditation::new("Stillness", "Be still.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    for _ in 0..3 {
        tick(&h.worker).await;
    }

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.unwrap().contains("provider exploded"));

    // No further claims once failed
    tick(&h.worker).await;
    assert_eq!(h.tts.script.calls(), 3);
    assert_eq!(only_job(h.store.as_ref()).await.attempts, 3);

    let m = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(m.narration_audio_url.is_none());
    assert_eq!(m.status, MeditationStatus::Pending);
}

#[tokio::test]
async fn test_tts_timeout_counts_as_failed_attempt() {
    let mut settings = fast_settings();
    settings.tts_timeout_seconds = 1;
    let h = harness_with(settings, true);
    h.tts.script.push(Reply::Delay(Duration::from_secs(10)));
    seed(&h.store, NewMeditation::new("Slow", "Take your time.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.retrying, 1);

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_mix_failure_retries_without_resynthesizing() {
    let h = harness();
    h.mixer.script.push(Reply::Fail("mixer down"));
    let m = seed(
        &h.store,
        NewMeditation::new("Waves", "Follow the waves.").with_ambient("https://cdn.test/waves.mp3"),
    )
    .await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    tick(&h.worker).await;
    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.last_error.unwrap().contains("mixer down"));

    // Narration survived the failed mix
    let stored = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(stored.narration_audio_url.is_some());
    assert!(stored.final_audio_url.is_none());

    tick(&h.worker).await;
    assert_eq!(only_job(h.store.as_ref()).await.status, JobStatus::Completed);
    assert_eq!(h.tts.script.calls(), 1);
    assert_eq!(h.mixer.script.calls(), 2);

    let stored = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert!(stored.final_audio_url.is_some());
}

#[tokio::test]
async fn test_stale_processing_job_is_reclaimed() {
    let h = harness();
    let m = seed(&h.store, NewMeditation::new("Abandoned", "Come back.")).await;

    let mut job = TtsJob::new(m.id);
    job.status = JobStatus::Processing;
    job.attempts = 1;
    job.updated_at = Utc::now() - chrono::Duration::minutes(10);
    h.store.insert_job(&job).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.completed, 1);

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.unwrap().starts_with("stale:"));
}

#[tokio::test]
async fn test_recent_processing_job_is_left_alone() {
    let h = harness();
    let m = seed(&h.store, NewMeditation::new("Busy", "In progress.")).await;

    let mut job = TtsJob::new(m.id);
    job.status = JobStatus::Processing;
    job.attempts = 1;
    h.store.insert_job(&job).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.reclaimed, 0);
    assert_eq!(report.processed(), 0);
    assert_eq!(only_job(h.store.as_ref()).await.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_stale_job_on_last_attempt_fails() {
    let h = harness();
    let m = seed(&h.store, NewMeditation::new("Stuck", "Again.")).await;

    let mut job = TtsJob::new(m.id);
    job.status = JobStatus::Processing;
    job.attempts = 3;
    job.updated_at = Utc::now() - chrono::Duration::minutes(10);
    h.store.insert_job(&job).await.unwrap();

    tick(&h.worker).await;

    let job = only_job(h.store.as_ref()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.tts.script.calls(), 0);
}

#[tokio::test]
async fn test_store_outage_does_not_crash_tick() {
    let h = harness();
    seed(&h.store, NewMeditation::new("Outage", "Hold on.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    h.store.set_unavailable(true);
    let report = tick(&h.worker).await;
    assert!(report.store_errors >= 1);
    assert_eq!(report.processed(), 0);
    assert_eq!(h.tts.script.calls(), 0);

    h.store.set_unavailable(false);
    let report = tick(&h.worker).await;
    assert_eq!(report.completed, 1);
    assert_eq!(only_job(h.store.as_ref()).await.attempts, 1);
}

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let h = harness();
    h.tts.script.push(Reply::Delay(Duration::from_millis(500)));
    seed(&h.store, NewMeditation::new("Long", "A long narration.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let worker = Arc::clone(&h.worker);
    let first = tokio::spawn(async move { worker.tick().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.worker.tick().await, TickOutcome::Skipped);

    match first.await.unwrap() {
        TickOutcome::Ran(report) => assert_eq!(report.completed, 1),
        TickOutcome::Skipped => panic!("first tick should run"),
    }
    assert_eq!(h.tts.script.calls(), 1);
}

#[tokio::test]
async fn test_jobs_processed_oldest_first() {
    let h = harness();
    let first = seed(&h.store, NewMeditation::new("First", "one")).await;
    let second = seed(&h.store, NewMeditation::new("Second", "two")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let report = tick(&h.worker).await;
    assert_eq!(report.completed, 2);
    assert_eq!(*h.tts.texts.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);

    for id in [first.id, second.id] {
        let m = h.store.get_meditation(id).await.unwrap().unwrap();
        assert_eq!(m.status, MeditationStatus::Ready);
    }
}

#[tokio::test]
async fn test_handle_start_stop_idempotent() {
    let h = harness();
    seed(&h.store, NewMeditation::new("Loop", "Around again.")).await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let handle = WorkerHandle::new(Arc::clone(&h.worker));
    assert!(!handle.is_running());

    assert!(handle.start());
    assert!(!handle.start());
    assert!(handle.is_running());

    // First tick fires immediately
    let mut completed = false;
    for _ in 0..50 {
        let jobs = h.store.list_jobs(Some(JobStatus::Completed)).await.unwrap();
        if jobs.len() == 1 {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(completed, "worker loop did not process the job");

    assert!(handle.stop());
    assert!(!handle.stop());

    assert!(handle.start());
    handle.shutdown().await;
    assert!(!handle.is_running());
}

/// Edits the meditation's script and title while "synthesizing"
struct EditingTts {
    store: Arc<MemoryStore>,
    meditation_id: Uuid,
}

#[async_trait]
impl SpeechSynthesizer for EditingTts {
    fn name(&self) -> &str {
        "editing-tts"
    }

    async fn synthesize(&self, _text: &str) -> anyhow::Result<String> {
        let mut m = self
            .store
            .get_meditation(self.meditation_id)
            .await?
            .expect("meditation exists");
        m.script = Some("corrected script".to_string());
        m.title = "Corrected".to_string();
        self.store.update_meditation(&m).await?;
        Ok("https://tts.test/narration.mp3".to_string())
    }
}

/// Simulates an admin regeneration landing while the mix is in flight
struct RacingMixer {
    store: Arc<MemoryStore>,
    meditation_id: Uuid,
}

#[async_trait]
impl AudioMixer for RacingMixer {
    fn name(&self) -> &str {
        "racing-mixer"
    }

    async fn mix(&self, _narration_url: &str, _ambient_url: &str) -> anyhow::Result<String> {
        self.store
            .set_narration(self.meditation_id, "https://admin.test/newer.mp3", Utc::now())
            .await?;
        Ok("https://mix.test/stale.mp3".to_string())
    }
}

#[tokio::test]
async fn test_edits_during_synthesis_are_preserved() {
    let store = Arc::new(MemoryStore::new());
    let m = seed(&store, NewMeditation::new("Original", "typo scirpt")).await;
    backfill(store.as_ref(), store.as_ref()).await.unwrap();

    let tts = Arc::new(EditingTts {
        store: Arc::clone(&store),
        meditation_id: m.id,
    });
    let worker = Worker::new(store.clone(), store.clone(), tts, None, fast_settings()).unwrap();

    let report = tick(&worker).await;
    assert_eq!(report.completed, 1);

    let stored = store.get_meditation(m.id).await.unwrap().unwrap();
    assert_eq!(stored.script.as_deref(), Some("corrected script"));
    assert_eq!(stored.title, "Corrected");
    assert_eq!(
        stored.narration_audio_url.as_deref(),
        Some("https://tts.test/narration.mp3")
    );
    assert_eq!(stored.status, MeditationStatus::Ready);
}

#[tokio::test]
async fn test_newer_narration_during_mix_is_not_overwritten() {
    let h = harness();
    let m = seed(
        &h.store,
        NewMeditation::new("Tide", "Breathe with the tide.").with_ambient("https://cdn.test/tide.mp3"),
    )
    .await;
    backfill(h.store.as_ref(), h.store.as_ref()).await.unwrap();

    let mixer = Arc::new(RacingMixer {
        store: Arc::clone(&h.store),
        meditation_id: m.id,
    });
    let worker = Worker::new(
        h.store.clone(),
        h.store.clone(),
        h.tts.clone(),
        Some(mixer as Arc<dyn AudioMixer>),
        fast_settings(),
    )
    .unwrap();

    tick(&worker).await;

    let stored = h.store.get_meditation(m.id).await.unwrap().unwrap();
    assert_eq!(
        stored.narration_audio_url.as_deref(),
        Some("https://admin.test/newer.mp3")
    );
    assert!(stored.final_audio_url.is_none());
}

#[tokio::test]
async fn test_zero_interval_worker_is_rejected() {
    let h = harness();
    let mut settings = fast_settings();
    settings.interval_seconds = 0;

    let result = Worker::new(h.store.clone(), h.store.clone(), h.tts.clone(), None, settings);
    assert!(result.is_err());
}
