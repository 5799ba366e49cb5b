//! Operator-triggered regeneration of a single meditation.
//!
//! Bypasses the queue entirely: no job record, no retry. The caller sees the
//! failure and decides whether to try again.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::{bounded, Stage};
use super::worker::Worker;

/// Result of a successful regeneration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegenerateOutcome {
    pub success: bool,
    /// New narration URL
    pub audio_url: String,
    /// New mix, when the meditation has an ambient track and a mixer is configured
    pub final_audio_url: Option<String>,
}

impl Worker {
    /// Re-synthesize narration for one meditation, e.g. after a script fix.
    ///
    /// The new narration replaces the old one and invalidates any existing
    /// mix. When an ambient track is configured the mix is rebuilt; if that
    /// fails, the narration stays updated and the error is returned.
    #[instrument(skip(self))]
    pub async fn regenerate_one(&self, meditation_id: Uuid) -> Result<RegenerateOutcome> {
        let meditation = self
            .media
            .get_meditation(meditation_id)
            .await
            .context("Failed to load meditation")?
            .with_context(|| format!("Meditation {} not found", meditation_id))?;

        let script = meditation
            .usable_script()
            .with_context(|| format!("Meditation {} has no script", meditation_id))?
            .to_string();

        let narration = bounded(
            Stage::Synthesis,
            self.settings.tts_timeout(),
            self.tts.synthesize(&script),
        )
        .await
        .context("Narration failed")?;

        // Also drops the old mix, which no longer matches the narration
        self.media
            .set_narration(meditation_id, &narration, Utc::now())
            .await
            .context("Failed to store narration")?;

        info!(audio_url = %narration, "Narration regenerated");

        let mut final_audio_url = None;

        if let (Some(ambient), Some(mixer)) = (meditation.ambient_audio_url.as_deref(), &self.mixer) {
            let mixed = bounded(
                Stage::Mixing,
                self.settings.mix_timeout(),
                mixer.mix(&narration, ambient),
            )
            .await
            .context("Narration updated but mixing failed")?;

            let stored = self
                .media
                .set_final(meditation_id, &narration, &mixed, Utc::now())
                .await
                .context("Failed to store mix")?;

            if !stored {
                anyhow::bail!("Narration for {} changed while mixing, mix discarded", meditation_id);
            }

            final_audio_url = Some(mixed);
        } else if meditation.ambient_audio_url.is_some() {
            warn!("Ambient track present but no mixer configured, keeping narration only");
        }

        Ok(RegenerateOutcome {
            success: true,
            audio_url: narration,
            final_audio_url,
        })
    }
}
