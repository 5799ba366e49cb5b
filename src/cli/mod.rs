//! Command-line interface for narrator.
//!
//! Provides commands for running the TTS worker, draining the queue once,
//! backfilling and reseeding the queue, regenerating a single meditation,
//! and inspecting queue state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use crate::adapters::{AudioMixer, HttpMixer, HttpSpeechClient, SpeechSynthesizer};
use crate::config::{self, ResolvedConfig};
use crate::core::{self as engine, SeedSet, TickOutcome, Worker, WorkerHandle};
use crate::domain::{JobStatus, MeditationStatus};
use crate::store::{self, JobStore, MediaStore, MemoryStore, SqliteStore};

/// narrator - background narration pipeline for guided meditations
#[derive(Parser, Debug)]
#[command(name = "narrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use a throwaway in-memory store seeded with the built-in meditations
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker loop until Ctrl-C
    Worker,

    /// Run a single worker tick and report what happened
    Tick,

    /// Queue a job for every meditation missing narration
    Backfill,

    /// Delete all meditations and jobs, then reseed (destructive)
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,

        /// YAML seed file (defaults to config `seeds:` or the built-in set)
        #[arg(short, long, env = "NARRATOR_SEEDS")]
        seeds: Option<PathBuf>,
    },

    /// Re-synthesize narration for one meditation, outside the queue
    Regenerate {
        /// Meditation ID (UUID)
        meditation_id: String,
    },

    /// Show queue and meditation status
    Status,

    /// Show resolved configuration
    Config,
}

/// Store handles shared by every command
struct Stores {
    jobs: Arc<dyn JobStore>,
    media: Arc<dyn MediaStore>,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        if let Commands::Config = self.command {
            return show_config(cfg);
        }

        let stores = open_stores(cfg, self.memory).await?;

        match self.command {
            Commands::Worker => run_worker(cfg, stores).await,
            Commands::Tick => run_tick(cfg, stores).await,
            Commands::Backfill => run_backfill(stores).await,
            Commands::Reset { yes, seeds } => run_reset(cfg, stores, yes, seeds).await,
            Commands::Regenerate { meditation_id } => {
                regenerate(cfg, stores, &meditation_id).await
            }
            Commands::Status => show_status(stores).await,
            Commands::Config => show_config(cfg),
        }
    }
}

async fn open_stores(cfg: &ResolvedConfig, memory: bool) -> Result<Stores> {
    if memory {
        let store = Arc::new(MemoryStore::new());
        engine::reset(store.as_ref(), store.as_ref(), &SeedSet::builtin()).await?;
        info!("Using in-memory store");
        let jobs: Arc<dyn JobStore> = store.clone();
        let media: Arc<dyn MediaStore> = store;
        return Ok(Stores { jobs, media });
    }

    let store = Arc::new(
        SqliteStore::open(&cfg.database)
            .with_context(|| format!("Failed to open database: {}", cfg.database.display()))?,
    );
    let jobs: Arc<dyn JobStore> = store.clone();
    let media: Arc<dyn MediaStore> = store;
    Ok(Stores { jobs, media })
}

fn build_worker(cfg: &ResolvedConfig, stores: Stores) -> Result<Worker> {
    let settings = cfg.worker.clone();

    let tts: Arc<dyn SpeechSynthesizer> =
        Arc::new(HttpSpeechClient::from_config(&cfg.tts, settings.tts_timeout())?);

    let mixer = HttpMixer::from_config(&cfg.mixer, settings.mix_timeout())?
        .map(|m| Arc::new(m) as Arc<dyn AudioMixer>);

    Worker::new(stores.jobs, stores.media, tts, mixer, settings)
}

async fn run_worker(cfg: &ResolvedConfig, stores: Stores) -> Result<()> {
    let worker = Arc::new(build_worker(cfg, stores)?);
    let handle = WorkerHandle::new(worker);

    handle.start();
    eprintln!("Worker running (every {}s). Press Ctrl-C to stop.", cfg.worker.interval_seconds);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    eprintln!("Stopping worker, waiting for the current tick...");
    handle.shutdown().await;
    Ok(())
}

async fn run_tick(cfg: &ResolvedConfig, stores: Stores) -> Result<()> {
    let worker = build_worker(cfg, stores)?;

    match worker.tick().await {
        TickOutcome::Ran(report) => {
            println!("Completed: {}", report.completed);
            println!("Retrying:  {}", report.retrying);
            println!("Failed:    {}", report.failed);
            println!("Deferred:  {}", report.deferred);
            println!("Reclaimed: {}", report.reclaimed);
            if report.lost > 0 {
                println!("Lost:      {}", report.lost);
            }
            if report.store_errors > 0 {
                println!("Store errors: {}", report.store_errors);
            }
        }
        TickOutcome::Skipped => println!("Tick skipped: another tick is running"),
    }

    Ok(())
}

async fn run_backfill(stores: Stores) -> Result<()> {
    let report = engine::backfill(stores.jobs.as_ref(), stores.media.as_ref()).await?;

    println!(
        "Queued {} job(s), skipped {} of {} meditation(s)",
        report.queued, report.skipped, report.total
    );
    Ok(())
}

async fn run_reset(
    cfg: &ResolvedConfig,
    stores: Stores,
    yes: bool,
    seeds: Option<PathBuf>,
) -> Result<()> {
    if !yes {
        anyhow::bail!("Reset deletes every meditation and job. Re-run with --yes to confirm.");
    }

    let seed_path = seeds.or_else(|| cfg.seeds_file.clone());
    let seeds = SeedSet::load(seed_path.as_deref())?;

    let report = engine::reset(stores.jobs.as_ref(), stores.media.as_ref(), &seeds).await?;

    println!(
        "Deleted {} meditation(s) and {} job(s)",
        report.meditations_deleted, report.jobs_deleted
    );
    println!(
        "Seeded {} meditation(s), queued {} job(s)",
        report.meditations_count, report.jobs_queued
    );
    Ok(())
}

async fn regenerate(cfg: &ResolvedConfig, stores: Stores, meditation_id: &str) -> Result<()> {
    let id = Uuid::parse_str(meditation_id)
        .with_context(|| format!("Invalid meditation ID: {}", meditation_id))?;

    let worker = build_worker(cfg, stores)?;
    let outcome = worker.regenerate_one(id).await?;

    println!("Narration: {}", outcome.audio_url);
    if let Some(ref mixed) = outcome.final_audio_url {
        println!("Final mix: {}", mixed);
    }
    Ok(())
}

async fn show_status(stores: Stores) -> Result<()> {
    let status = store::queue_status(stores.jobs.as_ref()).await?;
    let meditations = stores.media.list_meditations().await?;
    let ready = meditations
        .iter()
        .filter(|m| m.status == MeditationStatus::Ready)
        .count();

    println!("Meditations: {} ({} ready)", meditations.len(), ready);
    println!();
    println!("Jobs: {}", status.total());
    for job_status in JobStatus::ALL {
        println!("  {:<12} {}", job_status, status.count(job_status));
    }

    if status.recent.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<38} {:<12} {:<8} {:<30}", "JOB ID", "STATUS", "TRIES", "LAST ERROR");
    println!("{}", "-".repeat(90));
    for job in &status.recent {
        let error = job.last_error.as_deref().unwrap_or("-");
        let error = if error.chars().count() > 30 {
            format!("{}...", error.chars().take(27).collect::<String>())
        } else {
            error.to_string()
        };
        println!(
            "{:<38} {:<12} {:<8} {:<30}",
            job.id, job.status, job.attempts, error
        );
    }

    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("Narrator Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!(
        "  Seeds:    {}",
        cfg.seeds_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string())
    );
    println!();
    println!("Worker:");
    println!("  Interval:      {}s", cfg.worker.interval_seconds);
    println!("  Max attempts:  {}", cfg.worker.retry.max_attempts);
    println!("  Stale after:   {}s", cfg.worker.retry.stale_after_seconds);
    println!("  TTS timeout:   {}s", cfg.worker.tts_timeout_seconds);
    println!("  Mix timeout:   {}s", cfg.worker.mix_timeout_seconds);
    println!(
        "  Retry delay:   {}ms (x{}, max {}ms)",
        cfg.worker.retry.initial_delay_ms,
        cfg.worker.retry.backoff_multiplier,
        cfg.worker.retry.max_delay_ms
    );
    println!();
    println!("Providers:");
    println!(
        "  TTS:   {}",
        cfg.tts.endpoint.as_deref().unwrap_or("(not configured)")
    );
    println!(
        "  Mixer: {}",
        cfg.mixer.endpoint.as_deref().unwrap_or("(not configured)")
    );

    Ok(())
}
