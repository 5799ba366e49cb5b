//! HTTP audio mixing client.
//!
//! Endpoint: POST {endpoint}
//! Body: `{"narration_url": "...", "ambient_url": "...", "loop_ambient": true}`
//! Response: `{"audio_url": "..."}`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::tts::read_audio_url;
use super::AudioMixer;

/// Configuration for the mixing service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixerConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Ambient gain relative to narration, in dB
    pub ambient_gain_db: Option<f32>,
}

#[derive(Debug, Serialize)]
struct MixRequest<'a> {
    narration_url: &'a str,
    ambient_url: &'a str,
    loop_ambient: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ambient_gain_db: Option<f32>,
}

/// Mixing service reached over HTTP
pub struct HttpMixer {
    endpoint: String,
    api_key: Option<String>,
    ambient_gain_db: Option<f32>,
    client: reqwest::Client,
}

impl HttpMixer {
    pub fn new(endpoint: String, api_key: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint,
            api_key,
            ambient_gain_db: None,
            client,
        })
    }

    /// Create from config. Returns `None` when no mixer is configured;
    /// meditations then complete with narration only.
    pub fn from_config(config: &MixerConfig, request_timeout: Duration) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.clone() else {
            return Ok(None);
        };
        let mut mixer = Self::new(endpoint, config.api_key.clone(), request_timeout)?;
        mixer.ambient_gain_db = config.ambient_gain_db;
        Ok(Some(mixer))
    }
}

#[async_trait]
impl AudioMixer for HttpMixer {
    fn name(&self) -> &str {
        "http-mixer"
    }

    async fn mix(&self, narration_url: &str, ambient_url: &str) -> Result<String> {
        let payload = MixRequest {
            narration_url,
            ambient_url,
            loop_ambient: true,
            ambient_gain_db: self.ambient_gain_db,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.context("Failed to reach mixer")?;
        read_audio_url(response, "Mixer").await
    }
}
