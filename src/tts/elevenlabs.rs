//! ElevenLabs TTS client

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;

const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

pub struct ElevenLabsClient {
    http: reqwest::Client,
    api_key: String,
    model_id: String,
}

impl ElevenLabsClient {
    pub fn new(api_key: &str, model_id: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
        }
    }

    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/text-to-speech/{}", ELEVENLABS_BASE_URL, voice_id);
        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.model_id,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75,
                },
            }))
            .send()
            .await
            .context("ElevenLabs request failed")?
            .error_for_status()
            .context("ElevenLabs returned an error status")?;

        let bytes = resp.bytes().await.context("ElevenLabs body read failed")?;
        Ok(bytes.to_vec())
    }
}
