//! Fish speech client
//!
//! Local speech server with optional per-persona voice references. Tuning
//! parameters come from config with overrides from the promoted document's
//! tuning block.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config::HubConfig;

/// Emotion tags that should override the reference audio's prosody.
const EMOTION_MARKERS: &[&str] = &[
    "(joyful)",
    "(sad)",
    "(angry)",
    "(excited)",
    "(surprised)",
    "(scared)",
    "(whisper)",
];

pub struct FishClient {
    http: reqwest::Client,
    base_url: String,
    format: String,
    normalize: bool,
}

impl FishClient {
    pub fn from_config(cfg: &HubConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.fish_timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: cfg.fish_base_url.trim_end_matches('/').to_string(),
            format: cfg.fish_format.to_lowercase(),
            normalize: cfg.fish_normalize,
        }
    }

    /// Generate speech. Returns Ok(None) for an empty payload; the caller
    /// treats that as "defer to the next provider".
    pub async fn synthesize(
        &self,
        text: &str,
        reference_id: Option<&str>,
        tuning: Option<&Value>,
    ) -> Result<Option<Vec<u8>>> {
        if text.is_empty() {
            return Ok(None);
        }

        let tuned_f64 = |key: &str, default: f64| {
            tuning
                .and_then(|t| t.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(default)
        };
        let mut temperature = tuned_f64("temperature", 0.8);
        let mut top_p = tuned_f64("top_p", 0.8);

        // An emotion tag anywhere in the text gets a hotter sample so the
        // emotion can override the reference audio's prosody.
        if EMOTION_MARKERS.iter().any(|m| text.contains(m)) {
            if temperature <= 0.8 {
                temperature = 1.2;
            }
            if top_p <= 0.8 {
                top_p = 0.95;
            }
            debug!("Emotion tag detected, boosting temp={} top_p={}", temperature, top_p);
        }

        let payload = json!({
            "text": text,
            "chunk_length": tuned_f64("chunk_length", 200.0) as i64,
            "format": self.format,
            "references": [],
            "reference_id": reference_id,
            "seed": null,
            "use_memory_cache": "off",
            "normalize": self.normalize,
            "streaming": false,
            "max_new_tokens": tuned_f64("max_new_tokens", 1024.0) as i64,
            "top_p": top_p,
            "repetition_penalty": tuned_f64("repetition_penalty", 1.1),
            "temperature": temperature,
        });

        let url = format!("{}/v1/tts", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Fish TTS request failed")?
            .error_for_status()
            .context("Fish TTS returned an error status")?;

        let bytes = resp.bytes().await.context("Fish TTS body read failed")?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}
