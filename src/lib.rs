//! narrator - background narration pipeline for guided meditations
//!
//! Turns meditation scripts into narrated audio through an external
//! text-to-speech provider, optionally mixes the narration over an ambient
//! track, and writes the resulting URLs back to the meditation record.
//!
//! # Architecture
//!
//! The job store is the only coordination point:
//! - Backfill and reset controllers enqueue `pending` jobs
//! - A polling worker claims jobs one at a time with compare-and-set
//!   updates, so a crashed or overlapping worker never double-applies work
//! - Failed attempts go back to `pending` until the attempt limit is hit
//! - Jobs abandoned in `processing` are reclaimed after a staleness threshold
//!
//! # Modules
//!
//! - `adapters`: TTS provider and audio mixer clients
//! - `core`: Worker, controllers, retry policy
//! - `domain`: Data structures (Meditation, TtsJob)
//! - `store`: Job and media repositories (SQLite, in-memory)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Queue narration for every meditation that lacks it
//! narrator backfill
//!
//! # Drain the queue until Ctrl-C
//! narrator worker
//!
//! # Inspect the queue
//! narrator status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{
    backfill, reset, BackfillReport, RegenerateOutcome, ResetReport, SeedSet, TickOutcome,
    TickReport, Worker, WorkerHandle, WorkerSettings,
};
pub use crate::domain::{JobStatus, Meditation, MeditationStatus, NewMeditation, TtsJob};
pub use crate::store::{JobStore, MediaStore, MemoryStore, SqliteStore, StoreError};
