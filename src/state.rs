//! Shared application state
//!
//! Everything with process lifetime lives here, created once at startup and
//! handed to the router: the durable store, the audio blob cache, the reply
//! bus, the persona registry, and the backend clients.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::ActionExecutor;
use crate::audio::AudioStore;
use crate::bus::ReplyBus;
use crate::config::HubConfig;
use crate::llm::LlmRegistry;
use crate::memory::{self, MemoryStore};
use crate::personas::PersonaRegistry;
use crate::tts::TtsEngine;

/// Memory/streaming tunables threaded through the pipelines.
#[derive(Debug, Clone)]
pub struct Limits {
    pub history_last_n: usize,
    pub history_max_chars: usize,
    pub summary_max_chars: usize,
    pub retrieval_max_inject_chars: usize,
    pub session_max_age_days: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            history_last_n: 16,
            history_max_chars: 6000,
            summary_max_chars: 1800,
            retrieval_max_inject_chars: 8000,
            session_max_age_days: 30,
        }
    }
}

impl Limits {
    pub fn from_config(cfg: &HubConfig) -> Self {
        Self {
            history_last_n: cfg.history_last_n,
            history_max_chars: cfg.history_max_chars,
            summary_max_chars: cfg.summary_max_chars,
            retrieval_max_inject_chars: cfg.retrieval_max_inject_chars,
            session_max_age_days: cfg.session_max_age_days,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub audio: Arc<AudioStore>,
    pub bus: ReplyBus,
    pub personas: Arc<PersonaRegistry>,
    pub llm: Arc<LlmRegistry>,
    pub tts: Arc<TtsEngine>,
    pub actions: Arc<ActionExecutor>,
    /// Plain client for the STT proxy.
    pub http: reqwest::Client,
    pub limits: Limits,
}

impl AppState {
    pub async fn from_config(cfg: &HubConfig) -> Result<Self> {
        let store = MemoryStore::connect(&cfg.database_url, cfg.sqlite_max_connections).await?;
        let personas = PersonaRegistry::builtin(&cfg.default_persona);

        let defaults = memory::default_promoted_state(cfg, &personas.names());
        store.seed_promoted_state(&defaults).await?;

        let names = personas.names();
        Ok(Self {
            store: Arc::new(store),
            audio: Arc::new(AudioStore::new(
                Duration::from_secs(cfg.audio_ttl_seconds),
                cfg.audio_max_items,
            )),
            bus: ReplyBus::new(cfg.bus_capacity),
            personas: Arc::new(personas),
            llm: Arc::new(LlmRegistry::from_config(cfg)),
            tts: Arc::new(TtsEngine::from_config(cfg, &names)),
            actions: Arc::new(ActionExecutor::new(
                &cfg.ha_base_url,
                &cfg.ha_token,
                cfg.ha_timeout_secs,
            )),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.whisper_timeout_secs))
                .build()
                .unwrap_or_default(),
            limits: Limits::from_config(cfg),
        })
    }
}
