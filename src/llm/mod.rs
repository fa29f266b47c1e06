//! Generation backends
//!
//! Each persona's replies come from one of the configured backends, all
//! behind the same narrow `GenerateReply` contract. Backend failures stay
//! scoped to the calling persona; a missing key surfaces as a configuration
//! error with a hint, not a panic.

mod gemini;
mod openai_compat;

pub use gemini::GeminiClient;
pub use openai_compat::OpenAiCompatClient;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::HubConfig;
use crate::personas::BackendKind;
use crate::server::types::RequestContext;

#[async_trait]
pub trait GenerateReply: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_text: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<String>;
}

/// Backend-kind to client mapping, built once at startup.
pub struct LlmRegistry {
    backends: HashMap<BackendKind, Arc<dyn GenerateReply>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &HubConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.llm_timeout_secs))
            .build()
            .unwrap_or_default();

        let mut registry = Self::new();
        registry.insert(
            BackendKind::Local,
            Arc::new(OpenAiCompatClient::new(
                http.clone(),
                &cfg.local_llm_base_url,
                &cfg.local_llm_api_key,
                &cfg.local_llm_model,
                0.6,
                "the local model endpoint",
            )),
        );
        registry.insert(
            BackendKind::OpenAi,
            Arc::new(OpenAiCompatClient::new(
                http.clone(),
                "https://api.openai.com/v1",
                &cfg.openai_api_key,
                &cfg.openai_model,
                0.5,
                "OpenAI (set OPENAI_API_KEY)",
            )),
        );
        registry.insert(
            BackendKind::Gemini,
            Arc::new(GeminiClient::new(http, &cfg.gemini_api_key, &cfg.gemini_model)),
        );
        registry
    }

    pub fn insert(&mut self, kind: BackendKind, backend: Arc<dyn GenerateReply>) {
        self.backends.insert(kind, backend);
    }

    pub fn backend(&self, kind: BackendKind) -> Option<Arc<dyn GenerateReply>> {
        self.backends.get(&kind).cloned()
    }
}

impl Default for LlmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
