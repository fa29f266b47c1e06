//! OpenAI-compatible chat-completions client
//!
//! Covers both the local endpoint (LM Studio and friends) and hosted OpenAI;
//! only base URL, key, and model differ.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::GenerateReply;
use crate::server::types::RequestContext;

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    /// Human-readable backend label for configuration errors.
    label: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        label: &str,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            label: label.to_string(),
        }
    }
}

#[async_trait]
impl GenerateReply for OpenAiCompatClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("{} is not configured", self.label);
        }

        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        if let Some(ctx) = ctx {
            messages.push(json!({ "role": "system", "content": ctx.render() }));
        }
        messages.push(json!({ "role": "user", "content": user_text }));

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature,
            }))
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.label))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", self.label))?;

        let completion: ChatCompletion = resp
            .json()
            .await
            .with_context(|| format!("{} returned malformed JSON", self.label))?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
