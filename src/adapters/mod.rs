//! Adapter interfaces for external audio services.
//!
//! The worker and admin trigger only see these traits: a text-to-speech
//! provider that turns a script into a narration URL, and a mixer that loops
//! an ambient track under a narration track. Both are slow and unreliable;
//! callers bound every call with a timeout.

pub mod mixer;
pub mod tts;

use anyhow::Result;
use async_trait::async_trait;

pub use mixer::{HttpMixer, MixerConfig};
pub use tts::{HttpSpeechClient, TtsConfig};

/// Text-to-speech provider
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Narrate `text`, returning the URL of the produced audio asset
    async fn synthesize(&self, text: &str) -> Result<String>;
}

/// Narration/ambient mixing service
#[async_trait]
pub trait AudioMixer: Send + Sync {
    /// Human-readable mixer name
    fn name(&self) -> &str;

    /// Overlay `narration_url` on a looped `ambient_url`, returning the mixed URL
    async fn mix(&self, narration_url: &str, ambient_url: &str) -> Result<String>;
}
