//! Maintenance controllers that (re)populate the job queue.
//!
//! - `backfill`: idempotent, queues a job for every meditation still missing
//!   narration that has no active job
//! - `reset`: destructive, wipes both stores and reseeds from a `SeedSet`
//!
//! Neither is meant to run while a worker is ticking against the same stores.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::{Meditation, NewMeditation, TtsJob};
use crate::store::{JobStore, MediaStore};

/// Result of a backfill pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Jobs created by this pass
    pub queued: usize,
    /// Meditations with narration or an active job
    pub skipped: usize,
    /// Meditations examined
    pub total: usize,
}

/// Queue a job for every meditation lacking narration.
///
/// Meditations without a usable script are still queued; the worker fails
/// them with "no script" so they show up in the queue status.
#[instrument(skip_all)]
pub async fn backfill(jobs: &dyn JobStore, media: &dyn MediaStore) -> Result<BackfillReport> {
    let meditations = media
        .list_meditations()
        .await
        .context("Failed to list meditations")?;

    let mut report = BackfillReport {
        total: meditations.len(),
        ..Default::default()
    };

    for meditation in &meditations {
        if !meditation.needs_narration() {
            report.skipped += 1;
            continue;
        }

        if let Some(active) = jobs
            .active_job_for(meditation.id)
            .await
            .context("Failed to check for active job")?
        {
            debug!(meditation_id = %meditation.id, job_id = %active.id, "Job already active");
            report.skipped += 1;
            continue;
        }

        let job = TtsJob::new(meditation.id);
        jobs.insert_job(&job)
            .await
            .with_context(|| format!("Failed to queue job for meditation {}", meditation.id))?;
        report.queued += 1;
    }

    info!(
        queued = report.queued,
        skipped = report.skipped,
        total = report.total,
        "Backfill complete"
    );

    Ok(report)
}

/// Result of a reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// Meditations recreated from the seed set
    pub meditations_count: usize,
    /// Pending jobs created, one per seeded meditation
    pub jobs_queued: usize,
    pub meditations_deleted: usize,
    pub jobs_deleted: usize,
}

/// Wipe both stores and rebuild them from `seeds`.
///
/// Steps run strictly in order. A failure part way leaves the stores
/// inconsistent; the error says which step broke and rerunning repairs it.
#[instrument(skip_all, fields(seeds = seeds.len()))]
pub async fn reset(jobs: &dyn JobStore, media: &dyn MediaStore, seeds: &SeedSet) -> Result<ResetReport> {
    let mut report = ResetReport {
        meditations_deleted: media
            .delete_all_meditations()
            .await
            .context("Failed to delete meditations")?,
        ..Default::default()
    };

    report.jobs_deleted = jobs.delete_all_jobs().await.context("Failed to delete jobs")?;

    let mut seeded = Vec::with_capacity(seeds.len());
    for new in seeds.iter() {
        let meditation = Meditation::from_new(new.clone());
        media
            .insert_meditation(&meditation)
            .await
            .with_context(|| format!("Failed to seed meditation '{}'", new.title))?;
        seeded.push(meditation.id);
    }
    report.meditations_count = seeded.len();

    for meditation_id in seeded {
        jobs.insert_job(&TtsJob::new(meditation_id))
            .await
            .with_context(|| format!("Failed to queue job for meditation {}", meditation_id))?;
        report.jobs_queued += 1;
    }

    info!(
        deleted_meditations = report.meditations_deleted,
        deleted_jobs = report.jobs_deleted,
        seeded = report.meditations_count,
        queued = report.jobs_queued,
        "Reset complete"
    );

    Ok(report)
}

/// Baseline meditation list used by `reset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSet {
    pub meditations: Vec<NewMeditation>,
}

impl SeedSet {
    pub fn new(meditations: Vec<NewMeditation>) -> Self {
        Self { meditations }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse seed YAML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid seed file: {}", path.display()))
    }

    /// Load from `path` if given, else the built-in set
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Small starter library shipped with the binary
    pub fn builtin() -> Self {
        Self::new(vec![
            NewMeditation::new(
                "Morning Gratitude",
                "Welcome to this morning meditation. Find a comfortable seat and let your \
                 shoulders soften. Breathe in slowly, and as you breathe out, bring to mind \
                 one thing you are grateful for today. Hold it gently. With each breath, let \
                 that gratitude fill your chest and carry it with you into the day.",
            )
            .with_ambient("https://cdn.example.com/ambient/birdsong.mp3"),
            NewMeditation::new(
                "Evening Examen",
                "As the day comes to a close, settle into stillness. Look back over the hours \
                 behind you. Where did you feel most alive? Where did you feel distant? Receive \
                 both without judgment, give thanks for what was good, and release what you \
                 cannot change. Rest now in peace.",
            )
            .with_ambient("https://cdn.example.com/ambient/soft-rain.mp3"),
            NewMeditation::new(
                "Breath Prayer",
                "Breathe in: Be still. Breathe out: and know. Breathe in: Be still. Breathe \
                 out: and know. Let the words slow with your breath until only the silence \
                 between them remains.",
            ),
            NewMeditation::new(
                "Body Scan for Sleep",
                "Lie down and let the ground hold your weight. Bring your attention to your \
                 feet, then your calves, your knees, your thighs. Let each part grow heavy \
                 and warm. Move slowly upward, releasing tension as you go, until your whole \
                 body rests.",
            )
            .with_ambient("https://cdn.example.com/ambient/ocean-waves.mp3"),
        ])
    }

    pub fn len(&self) -> usize {
        self.meditations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meditations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NewMeditation> {
        self.meditations.iter()
    }
}
