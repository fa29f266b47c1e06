//! Request and response shapes for the HTTP surface

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actions::Action;

/// Structured hints a client may attach to a request (speaker, room,
/// ambient-noise level) plus an open extension map for forward-compatible
/// fields like `session_id` and `auto_promote`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: Option<String>,
    pub room: Option<String>,
    pub noise_level: Option<f64>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl RequestContext {
    /// One-line rendering injected as a system message for the backends.
    pub fn render(&self) -> String {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "none".to_string());
        let noise = self
            .noise_level
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "Context: user={}, room={}, noise_level={}, extra={}",
            opt(&self.user),
            opt(&self.room),
            noise,
            Value::Object(self.extra.clone())
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub persona: String,
    pub text: String,
    pub room: Option<String>,
    pub context: Option<RequestContext>,
    pub session_id: Option<String>,
    /// Suppress speech synthesis for this request.
    #[serde(default)]
    pub no_audio: bool,
}

impl AskRequest {
    /// Explicit session id, then `context.extra.session_id`, else the
    /// single-user default.
    pub fn session_id_or_default(&self) -> String {
        if let Some(sid) = &self.session_id {
            if !sid.is_empty() {
                return sid.clone();
            }
        }
        if let Some(ctx) = &self.context {
            if let Some(sid) = ctx.extra.get("session_id").and_then(Value::as_str) {
                if !sid.is_empty() {
                    return sid.to_string();
                }
            }
        }
        "default".to_string()
    }

    /// The request context with the top-level room folded in.
    pub fn merged_context(&self) -> RequestContext {
        let mut ctx = self.context.clone().unwrap_or_default();
        if ctx.room.is_none() {
            ctx.room = self.room.clone();
        }
        ctx
    }

    /// Whether inferred promoted-state patches apply automatically.
    pub fn auto_promote(&self, default: bool) -> bool {
        self.context
            .as_ref()
            .and_then(|ctx| ctx.extra.get("auto_promote"))
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub persona: String,
    pub reply: String,
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-persona results when the request fanned out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<AskResponse>>,
}

impl AskResponse {
    pub fn target_error(persona: &str, error: &str) -> Self {
        Self {
            persona: persona.to_string(),
            reply: String::new(),
            actions: Vec::new(),
            tone: None,
            audio_b64: None,
            tts_provider: None,
            error: Some(error.to_string()),
            responses: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AskQuery {
    pub execute: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetrievalUpsertRequest {
    pub doc_id: String,
    pub title: Option<String>,
    pub content: String,
    pub tags: Option<String>,
    pub session_id: Option<String>,
}

fn default_query_limit() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct RetrievalQueryRequest {
    pub query: String,
    #[serde(default = "default_query_limit")]
    pub limit: usize,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub text: String,
}
