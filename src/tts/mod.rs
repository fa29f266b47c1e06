//! Speech synthesis
//!
//! Providers are tried in a fixed preference order (Fish, then ElevenLabs)
//! with independent failure; producing no audio is a valid outcome that
//! defers synthesis to the client, never an error. The per-persona provider
//! preference lives in the long-term preference document.

mod elevenlabs;
mod fish;

pub use elevenlabs::ElevenLabsClient;
pub use fish::FishClient;

use serde_json::Value;
use tracing::warn;

use crate::config::HubConfig;

/// One synthesized utterance, with the provider that produced it.
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub provider: &'static str,
}

const VALID_PREFS: &[&str] = &["auto", "fish", "elevenlabs", "browser", "off"];

/// Per-persona provider preference from the promoted document; anything
/// unrecognized falls back to "auto".
pub fn pick_tts_pref(promoted: &serde_json::Map<String, Value>, persona: &str) -> String {
    let pref = promoted
        .get("tts_overrides")
        .and_then(Value::as_object)
        .and_then(|overrides| overrides.get(persona))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    if VALID_PREFS.contains(&pref.as_str()) {
        pref
    } else {
        "auto".to_string()
    }
}

pub struct TtsEngine {
    fish: Option<FishClient>,
    elevenlabs: Option<ElevenLabsClient>,
    /// Per-persona voice references, resolved at build time.
    fish_refs: Vec<(String, String)>,
    elevenlabs_voices: Vec<(String, String)>,
}

impl TtsEngine {
    pub fn from_config(cfg: &HubConfig, personas: &[String]) -> Self {
        let fish = cfg.fish_tts_enabled.then(|| FishClient::from_config(cfg));
        let elevenlabs = (!cfg.elevenlabs_api_key.is_empty())
            .then(|| ElevenLabsClient::new(&cfg.elevenlabs_api_key, &cfg.elevenlabs_model_id));

        let fish_refs = personas
            .iter()
            .filter_map(|p| cfg.fish_ref(p).map(|r| (p.clone(), r.to_string())))
            .collect();
        let elevenlabs_voices = personas
            .iter()
            .filter_map(|p| cfg.elevenlabs_voice(p).map(|v| (p.clone(), v.to_string())))
            .collect();

        Self {
            fish,
            elevenlabs,
            fish_refs,
            elevenlabs_voices,
        }
    }

    /// Engine with no providers; synthesize always defers to the client.
    pub fn disabled() -> Self {
        Self {
            fish: None,
            elevenlabs: None,
            fish_refs: Vec::new(),
            elevenlabs_voices: Vec::new(),
        }
    }

    fn lookup<'a>(table: &'a [(String, String)], persona: &str) -> Option<&'a str> {
        table
            .iter()
            .find(|(name, _)| name == persona)
            .map(|(_, val)| val.as_str())
    }

    /// Synthesize a reply, honoring the persona's provider preference.
    /// Returns None when synthesis is off, deferred, or every provider failed.
    pub async fn synthesize(
        &self,
        persona: &str,
        text: &str,
        pref: &str,
        tuning: Option<&Value>,
    ) -> Option<SynthesizedAudio> {
        if text.is_empty() || pref == "off" || pref == "browser" {
            return None;
        }

        if matches!(pref, "auto" | "fish") {
            if let Some(fish) = &self.fish {
                let reference = Self::lookup(&self.fish_refs, persona);
                match fish.synthesize(text, reference, tuning).await {
                    Ok(Some(bytes)) => {
                        return Some(SynthesizedAudio {
                            bytes,
                            provider: "fish",
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!(persona, "Fish TTS error: {}", e),
                }
            }
        }

        if matches!(pref, "auto" | "elevenlabs") {
            if let (Some(eleven), Some(voice)) = (
                &self.elevenlabs,
                Self::lookup(&self.elevenlabs_voices, persona),
            ) {
                match eleven.synthesize(text, voice).await {
                    Ok(bytes) => {
                        return Some(SynthesizedAudio {
                            bytes,
                            provider: "elevenlabs",
                        });
                    }
                    Err(e) => warn!(persona, "ElevenLabs TTS failed: {}", e),
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pick_tts_pref_reads_overrides() {
        let promoted = json!({
            "tts_overrides": { "domino": "fish", "penny": "OFF", "jimmy": "bogus" }
        });
        let promoted = promoted.as_object().unwrap();
        assert_eq!(pick_tts_pref(promoted, "domino"), "fish");
        assert_eq!(pick_tts_pref(promoted, "penny"), "off");
        assert_eq!(pick_tts_pref(promoted, "jimmy"), "auto");
        assert_eq!(pick_tts_pref(promoted, "unknown"), "auto");
    }

    #[tokio::test]
    async fn test_disabled_engine_defers_to_client() {
        let engine = TtsEngine::disabled();
        assert!(engine.synthesize("domino", "hello", "auto", None).await.is_none());
    }

    #[tokio::test]
    async fn test_off_pref_skips_synthesis() {
        let engine = TtsEngine::disabled();
        assert!(engine.synthesize("domino", "hello", "off", None).await.is_none());
        assert!(engine.synthesize("domino", "hello", "browser", None).await.is_none());
    }
}
