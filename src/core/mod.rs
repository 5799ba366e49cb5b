//! Core job-processing logic.
//!
//! This module contains:
//! - Worker: polling loop that drains the TTS job queue
//! - Backfill: queue population and reseeding
//! - Admin: manual single-meditation regeneration
//! - Retry: attempt limits, backoff and staleness

pub mod admin;
pub mod backfill;
pub mod error;
pub mod retry;
pub mod worker;

// Re-export commonly used types
pub use admin::RegenerateOutcome;
pub use backfill::{backfill, reset, BackfillReport, ResetReport, SeedSet};
pub use error::{JobError, Stage};
pub use retry::RetryPolicy;
pub use worker::{JobOutcome, TickOutcome, TickReport, Worker, WorkerHandle, WorkerSettings};
