//! Durable memory
//!
//! Rolling per-persona chat history with deterministic compaction, the
//! long-term (promoted) preference document, and the optional full-text
//! retrieval corpus, all backed by one SQLite pool.

pub mod promote;
pub mod store;

pub use store::MemoryStore;

use serde_json::{Map, Value, json};

use crate::config::HubConfig;

/// Promoted-document keys whose values are maps and merge one level deep on
/// patch, so updating one nested key never erases its siblings.
pub const DEEP_MERGE_KEYS: &[&str] = &["tts_overrides", "base_urls", "tts_tuning", "stt_tuning"];

/// Default promoted document, seeded on first boot from the environment.
pub fn default_promoted_state(cfg: &HubConfig, personas: &[String]) -> Map<String, Value> {
    let env_or_null = |key: &str| match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => json!(val.trim()),
        _ => Value::Null,
    };

    let mut overrides = Map::new();
    let mut fish_refs = Map::new();
    for persona in personas {
        overrides.insert(persona.clone(), json!("auto"));
        fish_refs.insert(
            persona.clone(),
            cfg.fish_ref(persona).map(|r| json!(r)).unwrap_or(Value::Null),
        );
    }

    let nullable = |s: &str| {
        if s.is_empty() { Value::Null } else { json!(s) }
    };

    let mut state = Map::new();
    state.insert("timezone".to_string(), env_or_null("TIMEZONE"));
    state.insert("location".to_string(), env_or_null("LOCATION"));
    state.insert("preferred_units".to_string(), env_or_null("PREFERRED_UNITS"));
    state.insert("working_rules".to_string(), env_or_null("WORKING_RULES"));
    state.insert("tech_stack".to_string(), env_or_null("TECH_STACK"));
    state.insert("tts_overrides".to_string(), Value::Object(overrides));
    state.insert(
        "base_urls".to_string(),
        json!({
            "ha": nullable(&cfg.ha_base_url),
            "local_llm": nullable(&cfg.local_llm_base_url),
            "fish": nullable(&cfg.fish_base_url),
            "whisper": nullable(&cfg.whisper_url),
        }),
    );
    state.insert(
        "tts_tuning".to_string(),
        json!({
            "timeout_sec": cfg.fish_timeout_secs,
            "format": cfg.fish_format,
            "normalize": cfg.fish_normalize,
            "chunk_length": 200,
            "temperature": 0.8,
            "top_p": 0.8,
            "repetition_penalty": 1.1,
            "max_new_tokens": 1024,
            "refs": Value::Object(fish_refs),
        }),
    );
    state.insert(
        "stt_tuning".to_string(),
        json!({ "timeout_sec": cfg.whisper_timeout_secs }),
    );
    // Retrieval injection stays opt-in; stale notes are worse than none.
    state.insert("retrieval_enabled".to_string(), json!(false));
    state
}
