//! Environment-driven configuration
//!
//! All tunables load once into `CONFIG` at startup. Values come from the
//! environment (after `.env` loading), with defaults that match a single-user
//! deployment on localhost.

use once_cell::sync::Lazy;
use std::str::FromStr;

pub static CONFIG: Lazy<HubConfig> = Lazy::new(HubConfig::from_env);

#[derive(Debug, Clone)]
pub struct HubConfig {
    // ── Server
    pub host: String,
    pub port: u16,
    pub log_level: String,

    // ── Database
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Sessions & rolling history
    pub default_persona: String,
    pub history_last_n: usize,
    pub history_max_chars: usize,
    pub summary_max_chars: usize,
    pub session_max_age_days: i64,
    pub session_sweep_secs: u64,

    // ── Retrieval corpus
    pub retrieval_max_doc_chars: usize,
    pub retrieval_max_total_chars: usize,
    pub retrieval_max_inject_chars: usize,

    // ── Memory administration
    pub memory_admin_enabled: bool,
    pub memory_admin_token: String,
    pub auto_promote_default: bool,

    // ── Audio blob cache
    pub audio_ttl_seconds: u64,
    pub audio_max_items: usize,

    // ── Streaming
    pub stream_keepalive_secs: u64,
    pub bus_capacity: usize,

    // ── Generation backends
    pub local_llm_base_url: String,
    pub local_llm_api_key: String,
    pub local_llm_model: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub llm_timeout_secs: u64,

    // ── Home Assistant action executor
    pub ha_base_url: String,
    pub ha_token: String,
    pub ha_timeout_secs: u64,

    // ── TTS providers
    pub fish_tts_enabled: bool,
    pub fish_base_url: String,
    pub fish_timeout_secs: u64,
    pub fish_format: String,
    pub fish_normalize: bool,
    pub fish_ref_domino: String,
    pub fish_ref_penny: String,
    pub fish_ref_jimmy: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_model_id: String,
    pub elevenlabs_voice_domino: String,
    pub elevenlabs_voice_penny: String,
    pub elevenlabs_voice_jimmy: String,

    // ── STT proxy
    pub whisper_url: String,
    pub whisper_timeout_secs: u64,
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_var_or("HOST", "0.0.0.0".to_string()),
            port: env_var_or("PORT", 2424),
            log_level: env_var_or("LOG_LEVEL", "info".to_string()),

            database_url: env_var_or("DATABASE_URL", "sqlite://memory.db?mode=rwc".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),

            default_persona: env_var_or("DEFAULT_PERSONA", "domino".to_string()),
            history_last_n: env_var_or("CHAT_HISTORY_LAST_N", 16),
            history_max_chars: env_var_or("CHAT_HISTORY_MAX_CHARS", 6000),
            summary_max_chars: env_var_or("SUMMARY_MAX_CHARS", 1800),
            session_max_age_days: env_var_or("SESSION_MAX_AGE_DAYS", 30),
            session_sweep_secs: env_var_or("SESSION_SWEEP_SECS", 3600),

            retrieval_max_doc_chars: env_var_or("RETRIEVAL_MAX_DOC_CHARS", 40_000),
            retrieval_max_total_chars: env_var_or("RETRIEVAL_MAX_TOTAL_CHARS", 200_000),
            retrieval_max_inject_chars: env_var_or("RETRIEVAL_MAX_INJECT_CHARS", 8_000),

            memory_admin_enabled: env_flag("MEMORY_ADMIN_ENABLED", false),
            memory_admin_token: env_var_or("MEMORY_ADMIN_TOKEN", String::new()),
            auto_promote_default: env_flag("AUTO_PROMOTE_DEFAULT", false),

            audio_ttl_seconds: env_var_or("AUDIO_TTL_SECONDS", 600),
            audio_max_items: env_var_or("AUDIO_MAX_ITEMS", 50),

            stream_keepalive_secs: env_var_or("STREAM_KEEPALIVE_SECS", 15),
            bus_capacity: env_var_or("BUS_CAPACITY", 64),

            local_llm_base_url: env_var_or(
                "LOCAL_LLM_BASE_URL",
                "http://127.0.0.1:1234/v1".to_string(),
            ),
            local_llm_api_key: env_var_or("LOCAL_LLM_API_KEY", "local".to_string()),
            local_llm_model: env_var_or("LOCAL_LLM_MODEL", "mistral-nemo-base-2407".to_string()),
            openai_api_key: env_var_or("OPENAI_API_KEY", String::new()),
            openai_model: env_var_or("OPENAI_MODEL", "gpt-4.1-mini".to_string()),
            gemini_api_key: env_var_or("GEMINI_API_KEY", String::new()),
            gemini_model: env_var_or("GEMINI_MODEL", "gemini-3-pro-preview".to_string()),
            llm_timeout_secs: env_var_or("LLM_TIMEOUT_SECS", 120),

            ha_base_url: env_var_or("HA_BASE_URL", String::new()),
            ha_token: env_var_or("HA_TOKEN", String::new()),
            ha_timeout_secs: env_var_or("HA_TIMEOUT_SECS", 5),

            fish_tts_enabled: env_flag("FISH_TTS_ENABLED", false),
            fish_base_url: env_var_or(
                "FISH_TTS_BASE_URL",
                "http://fish-speech-server:8080".to_string(),
            ),
            fish_timeout_secs: env_var_or("FISH_TTS_TIMEOUT", 120),
            fish_format: env_var_or("FISH_TTS_FORMAT", "wav".to_string()),
            fish_normalize: env_flag("FISH_TTS_NORMALIZE", true),
            fish_ref_domino: env_var_or("FISH_REF_DOMINO", String::new()),
            fish_ref_penny: env_var_or("FISH_REF_PENNY", String::new()),
            fish_ref_jimmy: env_var_or("FISH_REF_JIMMY", String::new()),
            elevenlabs_api_key: env_var_or("ELEVENLABS_API_KEY", String::new()),
            elevenlabs_model_id: env_var_or(
                "ELEVENLABS_MODEL_ID",
                "eleven_multilingual_v2".to_string(),
            ),
            elevenlabs_voice_domino: env_var_or("ELEVENLABS_VOICE_DOMINO", String::new()),
            elevenlabs_voice_penny: env_var_or("ELEVENLABS_VOICE_PENNY", String::new()),
            elevenlabs_voice_jimmy: env_var_or("ELEVENLABS_VOICE_JIMMY", String::new()),

            whisper_url: env_var_or("WHISPER_URL", String::new()),
            whisper_timeout_secs: env_var_or("WHISPER_TIMEOUT", 60),
        }
    }

    /// Fish voice reference for a persona, if configured.
    pub fn fish_ref(&self, persona: &str) -> Option<&str> {
        let val = match persona {
            "domino" => &self.fish_ref_domino,
            "penny" => &self.fish_ref_penny,
            "jimmy" => &self.fish_ref_jimmy,
            _ => return None,
        };
        if val.is_empty() { None } else { Some(val) }
    }

    /// ElevenLabs voice id for a persona, if configured.
    pub fn elevenlabs_voice(&self, persona: &str) -> Option<&str> {
        let val = match persona {
            "domino" => &self.elevenlabs_voice_domino,
            "penny" => &self.elevenlabs_voice_penny,
            "jimmy" => &self.elevenlabs_voice_jimmy,
            _ => return None,
        };
        if val.is_empty() { None } else { Some(val) }
    }
}

/// Parse an env var, falling back to `default` when unset or unparsable.
/// Trailing inline comments (`VALUE # note`) are tolerated.
fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            match clean.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

/// Boolean env flag: "1", "true", "yes", "on" (case-insensitive) are truthy.
fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
