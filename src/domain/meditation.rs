//! Meditation media records.
//!
//! A meditation holds the script text and the audio URLs produced from it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a meditation has playable audio yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeditationStatus {
    Pending,
    Ready,
}

impl MeditationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for MeditationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MeditationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            other => Err(format!("unknown meditation status: {}", other)),
        }
    }
}

/// A guided meditation and its generated audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meditation {
    pub id: Uuid,

    /// Display title
    pub title: String,

    /// Source text for narration (required for synthesis)
    pub script: Option<String>,

    /// Narration track, set once synthesis succeeds
    pub narration_audio_url: Option<String>,

    /// Pre-existing background track to loop under the narration
    pub ambient_audio_url: Option<String>,

    /// Narration mixed over ambient, set once mixing succeeds
    pub final_audio_url: Option<String>,

    pub status: MeditationStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meditation {
    /// Create a meditation from seed input, with no audio yet
    pub fn from_new(new: NewMeditation) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: new.title,
            script: new.script,
            narration_audio_url: None,
            ambient_audio_url: new.ambient_audio_url,
            final_audio_url: None,
            status: MeditationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Script text if present and not blank
    pub fn usable_script(&self) -> Option<&str> {
        self.script
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Missing narration is the sole trigger for queueing a job
    pub fn needs_narration(&self) -> bool {
        self.narration_audio_url.is_none()
    }

    /// A mix is due once narration exists and an ambient track is configured
    pub fn needs_mix(&self) -> bool {
        self.narration_audio_url.is_some()
            && self.ambient_audio_url.is_some()
            && self.final_audio_url.is_none()
    }

    /// Store a new narration track. Any previous mix is dropped since it
    /// was built from the old narration.
    pub fn set_narration(&mut self, url: String, now: DateTime<Utc>) {
        self.narration_audio_url = Some(url);
        self.final_audio_url = None;
        self.refresh_status(now);
    }

    /// Store the mixed track. Requires narration to be present.
    pub fn set_final(&mut self, url: String, now: DateTime<Utc>) {
        if self.narration_audio_url.is_some() {
            self.final_audio_url = Some(url);
        }
        self.refresh_status(now);
    }

    /// Narration alone is playable; the mix is an enhancement
    fn refresh_status(&mut self, now: DateTime<Utc>) {
        self.status = if self.needs_narration() {
            MeditationStatus::Pending
        } else {
            MeditationStatus::Ready
        };
        self.updated_at = now;
    }
}

/// Seed input for creating a meditation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeditation {
    pub title: String,

    #[serde(default)]
    pub script: Option<String>,

    #[serde(default)]
    pub ambient_audio_url: Option<String>,
}

impl NewMeditation {
    pub fn new(title: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            script: Some(script.into()),
            ambient_audio_url: None,
        }
    }

    pub fn with_ambient(mut self, url: impl Into<String>) -> Self {
        self.ambient_audio_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_script_is_unusable() {
        let mut m = Meditation::from_new(NewMeditation::new("Breath", "   "));
        assert!(m.usable_script().is_none());

        m.script = None;
        assert!(m.usable_script().is_none());

        m.script = Some("  Breathe in.  ".to_string());
        assert_eq!(m.usable_script(), Some("Breathe in."));
    }

    #[test]
    fn test_ready_without_ambient_after_narration() {
        let mut m = Meditation::from_new(NewMeditation::new("Breath", "Breathe in."));
        assert_eq!(m.status, MeditationStatus::Pending);

        m.set_narration("https://cdn/n.mp3".to_string(), Utc::now());
        assert_eq!(m.status, MeditationStatus::Ready);
        assert!(m.final_audio_url.is_none());
    }

    #[test]
    fn test_ambient_needs_mix_after_narration() {
        let mut m = Meditation::from_new(
            NewMeditation::new("Rain", "Listen.").with_ambient("https://cdn/rain.mp3"),
        );
        assert!(!m.needs_mix());

        m.set_narration("https://cdn/n.mp3".to_string(), Utc::now());
        assert_eq!(m.status, MeditationStatus::Ready);
        assert!(m.needs_mix());

        m.set_final("https://cdn/mix.mp3".to_string(), Utc::now());
        assert!(!m.needs_mix());
        assert_eq!(m.final_audio_url.as_deref(), Some("https://cdn/mix.mp3"));
    }

    #[test]
    fn test_final_never_set_without_narration() {
        let mut m = Meditation::from_new(
            NewMeditation::new("Rain", "Listen.").with_ambient("https://cdn/rain.mp3"),
        );
        m.set_final("https://cdn/mix.mp3".to_string(), Utc::now());
        assert!(m.final_audio_url.is_none());
    }

    #[test]
    fn test_new_narration_drops_stale_mix() {
        let mut m = Meditation::from_new(
            NewMeditation::new("Rain", "Listen.").with_ambient("https://cdn/rain.mp3"),
        );
        m.set_narration("https://cdn/n1.mp3".to_string(), Utc::now());
        m.set_final("https://cdn/mix1.mp3".to_string(), Utc::now());

        m.set_narration("https://cdn/n2.mp3".to_string(), Utc::now());
        assert!(m.final_audio_url.is_none());
        assert!(m.needs_mix());
    }
}
