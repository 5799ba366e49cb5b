//! Domain types for the narration pipeline.
//!
//! - Meditation: script text and the audio URLs produced from it
//! - TtsJob: a queued request to narrate one meditation

pub mod job;
pub mod meditation;

// Re-export commonly used types
pub use job::{JobStatus, TtsJob};
pub use meditation::{Meditation, MeditationStatus, NewMeditation};
