//! Gemini generateContent client

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::GenerateReply;
use crate::server::types::RequestContext;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl GenerateReply for GeminiClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("Gemini is not configured (set GEMINI_API_KEY)");
        }

        // Gemini takes a single flattened prompt here rather than role-tagged
        // messages.
        let mut parts = vec![system_prompt.to_string()];
        if let Some(ctx) = ctx {
            parts.push(ctx.render());
        }
        parts.push(format!("User: {}", user_text));
        let prompt = parts.join("\n\n");

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_BASE_URL, self.model, self.api_key
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
            }))
            .send()
            .await
            .context("request to Gemini failed")?
            .error_for_status()
            .context("Gemini returned an error status")?;

        let body: GenerateContentResponse =
            resp.json().await.context("Gemini returned malformed JSON")?;

        Ok(body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}
