//! HTTP text-to-speech client.
//!
//! Endpoint: POST {endpoint}
//! Body: `{"text": "...", "voice": "..."}`
//! Response: `{"audio_url": "..."}`
//! Auth: optional Bearer token

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::SpeechSynthesizer;

/// Configuration for the TTS provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AudioResponse {
    audio_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// TTS provider reached over HTTP
pub struct HttpSpeechClient {
    endpoint: String,
    api_key: Option<String>,
    voice: Option<String>,
    client: reqwest::Client,
}

impl HttpSpeechClient {
    /// Create a new client. `request_timeout` caps each HTTP exchange.
    pub fn new(endpoint: String, api_key: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint,
            api_key,
            voice: None,
            client,
        })
    }

    /// Create from config; the endpoint is required
    pub fn from_config(config: &TtsConfig, request_timeout: Duration) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .context("TTS endpoint not configured (set NARRATOR_TTS_ENDPOINT or tts.endpoint)")?;
        let client = Self::new(endpoint, config.api_key.clone(), request_timeout)?;
        Ok(match config.voice {
            Some(ref voice) => client.with_voice(voice.clone()),
            None => client,
        })
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// Turn a provider response into an audio URL, treating non-2xx and empty
/// bodies as provider errors
pub(crate) async fn read_audio_url(response: reqwest::Response, provider: &str) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("{} error ({}): {}", provider, status, text.trim());
    }

    let body: AudioResponse = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", provider))?;

    match body.audio_url {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => anyhow::bail!(
            "{} returned no audio URL{}",
            provider,
            body.error.map(|e| format!(": {}", e)).unwrap_or_default()
        ),
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechClient {
    fn name(&self) -> &str {
        "http-tts"
    }

    async fn synthesize(&self, text: &str) -> Result<String> {
        let payload = SynthesizeRequest {
            text,
            voice: self.voice.as_deref(),
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.context("Failed to reach TTS provider")?;
        read_audio_url(response, "TTS provider").await
    }
}
