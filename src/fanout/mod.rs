//! Fan-out coordination
//!
//! Runs one response pipeline per resolved persona, concurrently, and
//! delivers results in aggregate (wait for everything) or streaming
//! (event-per-result) mode. Failures stay scoped to their target: one
//! persona erroring never cancels or delays a sibling, and the stream always
//! reaches its terminal event.

pub mod events;

pub use events::{MemoryEvent, StreamEvent};

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::ReplySummary;
use crate::resolve::Resolution;
use crate::sanitize::{clean_reply_text, extract_actions, tone_tag};
use crate::server::types::{AskResponse, RequestContext};
use crate::skills::{clock_reply, is_clock_question};
use crate::state::AppState;
use crate::tts::pick_tts_pref;
use crate::{prompt, actions::Action};

/// One target's pipeline output, before audio.
pub struct TargetReply {
    pub reply: String,
    pub actions: Vec<Action>,
    pub tone: Option<String>,
}

/// Run one persona's reply pipeline: inject memory context, call the
/// generation backend, extract embedded actions, sanitize, persist the turn.
///
/// The clock fast path answers fixed time queries from local computation
/// without touching the backend; it still writes history and flows through
/// the same ordering as everything else.
pub async fn produce_reply(
    state: &AppState,
    session_id: &str,
    persona_name: &str,
    text: &str,
    ctx: Option<&RequestContext>,
    promoted: &Map<String, Value>,
) -> Result<TargetReply> {
    let limits = &state.limits;

    if is_clock_question(text) {
        let reply = clock_reply(promoted);
        state
            .store
            .add_chat_message(session_id, persona_name, "user", text)
            .await?;
        state
            .store
            .add_chat_message(session_id, persona_name, "assistant", &reply)
            .await?;
        if let Err(e) = state
            .store
            .trim_history(session_id, persona_name, limits.history_last_n, limits.summary_max_chars)
            .await
        {
            warn!(persona = persona_name, "history compaction failed: {}", e);
        }
        let tone = tone_tag(&reply);
        return Ok(TargetReply {
            reply,
            actions: Vec::new(),
            tone,
        });
    }

    let persona = state
        .personas
        .get(persona_name)
        .ok_or_else(|| anyhow!("Unknown persona '{}'", persona_name))?;

    let time_block = prompt::time_block(promoted);
    let preference_block = prompt::preference_block(promoted);

    // Retrieval is opt-in and best-effort: a search failure costs the notes,
    // not the reply.
    let retrieval_block = if promoted
        .get("retrieval_enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        && state.store.retrieval_available()
    {
        match state.store.query_retrieval(text, 3).await {
            Ok(hits) => prompt::retrieval_block(text, &hits, limits.retrieval_max_inject_chars),
            Err(e) => {
                warn!("retrieval lookup failed: {}", e);
                String::new()
            }
        }
    } else {
        String::new()
    };

    let (summary, turns) = state
        .store
        .get_chat_context(
            session_id,
            persona_name,
            limits.history_last_n,
            limits.history_max_chars,
        )
        .await?;
    let chat_block = prompt::chat_block(&summary, &turns);

    let system_prompt = prompt::assemble(
        &persona.system_prompt,
        &[time_block, preference_block, retrieval_block, chat_block],
    );

    // Persist the user turn after computing context so the prompt doesn't
    // echo the current message twice.
    state
        .store
        .add_chat_message(session_id, persona_name, "user", text)
        .await?;

    let backend = state
        .llm
        .backend(persona.backend)
        .ok_or_else(|| anyhow!("No backend registered for {:?}", persona.backend))?;
    let raw = backend
        .generate(&system_prompt, text, ctx)
        .await
        .with_context(|| format!("generation failed for {}", persona_name))?;

    let (stripped, actions) = extract_actions(&raw);

    state
        .store
        .add_chat_message(session_id, persona_name, "assistant", &stripped)
        .await?;
    if let Err(e) = state
        .store
        .trim_history(session_id, persona_name, limits.history_last_n, limits.summary_max_chars)
        .await
    {
        warn!(persona = persona_name, "history compaction failed: {}", e);
    }

    let reply = clean_reply_text(&stripped);
    let tone = tone_tag(&reply);
    Ok(TargetReply {
        reply,
        actions,
        tone,
    })
}

/// Aggregate mode: run every target concurrently, wait for all of them, and
/// return per-persona results. A fan-out nests them under a "collective"
/// wrapper; one persona failing never fails the request.
pub async fn answer_all(
    state: &AppState,
    session_id: &str,
    resolution: &Resolution,
    ctx: Option<&RequestContext>,
    execute: bool,
    no_audio: bool,
    promoted: &Map<String, Value>,
) -> AskResponse {
    match resolution {
        Resolution::Single { persona, text } => {
            answer_target(state, session_id, persona, text, ctx, execute, no_audio, promoted).await
        }
        Resolution::FanOut { targets, text } => {
            let futures = targets.iter().map(|persona| {
                answer_target(state, session_id, persona, text, ctx, execute, no_audio, promoted)
            });
            let responses = join_all(futures).await;
            AskResponse {
                persona: "collective".to_string(),
                reply: String::new(),
                actions: Vec::new(),
                tone: None,
                audio_b64: None,
                tts_provider: None,
                error: None,
                responses: Some(responses),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn answer_target(
    state: &AppState,
    session_id: &str,
    persona: &str,
    text: &str,
    ctx: Option<&RequestContext>,
    execute: bool,
    no_audio: bool,
    promoted: &Map<String, Value>,
) -> AskResponse {
    let produced = produce_reply(state, session_id, persona, text, ctx, promoted).await;
    let target = match produced {
        Ok(target) => target,
        Err(e) => {
            warn!(persona, "target pipeline failed: {:#}", e);
            return AskResponse::target_error(persona, &e.to_string());
        }
    };

    if execute {
        if let Err(e) = state.actions.execute(&target.actions).await {
            warn!(persona, "action execution failed: {}", e);
        }
    }

    state.bus.publish(ReplySummary::new(
        persona,
        session_id,
        &target.reply,
        target.tone.clone(),
    ));

    let (audio_b64, tts_provider) = if no_audio {
        (None, None)
    } else {
        let pref = pick_tts_pref(promoted, persona);
        match state
            .tts
            .synthesize(persona, &target.reply, &pref, promoted.get("tts_tuning"))
            .await
        {
            Some(audio) => (
                Some(BASE64.encode(&audio.bytes)),
                Some(audio.provider.to_string()),
            ),
            None => (None, None),
        }
    };

    AskResponse {
        persona: persona.to_string(),
        reply: target.reply,
        actions: target.actions,
        tone: target.tone,
        audio_b64,
        tts_provider,
        error: None,
        responses: None,
    }
}

/// Streaming mode: spawn one pipeline per target and return the event
/// receiver. Workers hold channel senders, so the receiver closes exactly
/// when every target has finished and all queued events are drained; the
/// consumer emits the terminal event after that.
#[allow(clippy::too_many_arguments)]
pub fn start_stream(
    state: AppState,
    session_id: String,
    targets: Vec<String>,
    text: String,
    ctx: Option<RequestContext>,
    execute: bool,
    no_audio: bool,
    promoted: Map<String, Value>,
) -> mpsc::UnboundedReceiver<StreamEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for persona in targets {
        let state = state.clone();
        let session_id = session_id.clone();
        let text = text.clone();
        let ctx = ctx.clone();
        let promoted = promoted.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            stream_target(
                state, session_id, persona, text, ctx, execute, no_audio, promoted, tx,
            )
            .await;
        });
    }
    rx
}

#[allow(clippy::too_many_arguments)]
async fn stream_target(
    state: AppState,
    session_id: String,
    persona: String,
    text: String,
    ctx: Option<RequestContext>,
    execute: bool,
    no_audio: bool,
    promoted: Map<String, Value>,
    tx: mpsc::UnboundedSender<StreamEvent>,
) {
    let produced =
        produce_reply(&state, &session_id, &persona, &text, ctx.as_ref(), &promoted).await;
    let target = match produced {
        Ok(target) => target,
        Err(e) => {
            let _ = tx.send(StreamEvent::Error {
                persona,
                error: e.to_string(),
            });
            return;
        }
    };

    // Text ready always precedes this persona's audio.
    let _ = tx.send(StreamEvent::Message {
        persona: persona.clone(),
        reply: target.reply.clone(),
        actions: target.actions.clone(),
        tone: target.tone.clone(),
    });

    state.bus.publish(ReplySummary::new(
        &persona,
        &session_id,
        &target.reply,
        target.tone.clone(),
    ));

    if execute {
        if let Err(e) = state.actions.execute(&target.actions).await {
            let _ = tx.send(StreamEvent::Error {
                persona: persona.clone(),
                error: format!("action_error: {}", e),
            });
        }
    }

    if !no_audio {
        let pref = pick_tts_pref(&promoted, &persona);
        if let Some(audio) = state
            .tts
            .synthesize(&persona, &target.reply, &pref, promoted.get("tts_tuning"))
            .await
        {
            let stored = state.audio.put(audio.bytes, audio.provider).await;
            let _ = tx.send(StreamEvent::Audio {
                persona,
                audio_id: stored.id,
                mime: stored.mime,
                tts_provider: audio.provider.to_string(),
            });
        }
    }
}
