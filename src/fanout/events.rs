//! Stream event protocol
//!
//! Typed events delivered over the per-request channel and serialized onto
//! the SSE stream. The serde tag doubles as the SSE event name. Large audio
//! payloads never ride in an event; `Audio` carries a blob-cache id.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::actions::Action;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First event: who is answering, so the client can prep its UI.
    Meta {
        persona: String,
        targets: Vec<String>,
    },
    /// A promoted-state patch was inferred from this utterance.
    Memory(MemoryEvent),
    /// A persona's sanitized reply is ready. Always precedes that persona's
    /// Audio event.
    Message {
        persona: String,
        reply: String,
        actions: Vec<Action>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tone: Option<String>,
    },
    /// Synthesized audio is ready in the blob cache.
    Audio {
        persona: String,
        audio_id: String,
        mime: String,
        tts_provider: String,
    },
    /// A target-scoped failure; siblings and stream completion are
    /// unaffected.
    Error { persona: String, error: String },
    /// Terminal event, emitted once after every target has finished and all
    /// queued events have been delivered.
    Done { persona: String },
}

impl StreamEvent {
    /// SSE event name for this variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::Memory(_) => "memory",
            Self::Message { .. } => "message",
            Self::Audio { .. } => "audio",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEvent {
    pub event_id: String,
    pub event_ts: f64,
    pub kind: &'static str,
    /// "suggested", "applied", or "error".
    pub mode: &'static str,
    pub source: &'static str,
    pub applied_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MemoryEvent {
    pub fn promoted(
        mode: &'static str,
        patch: Option<Map<String, Value>>,
        reasons: Vec<String>,
        error: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        Self {
            event_id: Uuid::new_v4().simple().to_string(),
            event_ts: now,
            kind: "promoted_state",
            mode,
            source: "auto_promote",
            applied_at: (mode == "applied").then_some(now),
            patch,
            reasons,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_names_match_tags() {
        let ev = StreamEvent::Message {
            persona: "domino".into(),
            reply: "hi".into(),
            actions: vec![],
            tone: None,
        };
        assert_eq!(ev.name(), "message");
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["persona"], "domino");
        // Absent tone is omitted entirely.
        assert!(value.get("tone").is_none());
    }

    #[test]
    fn test_audio_event_carries_reference_not_payload() {
        let ev = StreamEvent::Audio {
            persona: "penny".into(),
            audio_id: "abc123".into(),
            mime: "audio/wav".into(),
            tts_provider: "fish".into(),
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["type"], "audio");
        assert_eq!(value["audio_id"], "abc123");
        assert!(value.get("bytes").is_none());
    }

    #[test]
    fn test_memory_event_applied_sets_timestamp() {
        let mut patch = Map::new();
        patch.insert("timezone".to_string(), json!("UTC"));
        let ev = MemoryEvent::promoted("applied", Some(patch), vec!["why".into()], None);
        assert!(ev.applied_at.is_some());
        let suggested = MemoryEvent::promoted("suggested", None, vec![], None);
        assert!(suggested.applied_at.is_none());
    }
}
