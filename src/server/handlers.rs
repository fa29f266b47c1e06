//! HTTP handlers
//!
//! The single-shot and streaming ask paths, the blob-cache read, the passive
//! reply feed, and the memory administration surface. Session bookkeeping is
//! best-effort everywhere: a failed touch logs and moves on, it never blocks
//! a reply.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::CONFIG;
use crate::error::{HubError, HubResult};
use crate::fanout::{self, MemoryEvent, StreamEvent};
use crate::memory::promote;
use crate::resolve::resolve;
use crate::skills::now_with_zone;
use crate::state::AppState;

use super::types::{
    AskQuery, AskRequest, AskResponse, RetrievalQueryRequest, RetrievalUpsertRequest, SessionQuery,
    SttResponse,
};

async fn touch_session(state: &AppState, session_id: &str) {
    if let Err(e) = state
        .store
        .touch_session(session_id, state.limits.session_max_age_days)
        .await
    {
        warn!("session touch failed: {}", e);
    }
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(serde_json::to_string(event).unwrap_or_default())
}

// ============================================================================
// Ask (single-shot)
// ============================================================================

pub async fn ask(
    State(state): State<AppState>,
    Query(query): Query<AskQuery>,
    Json(req): Json<AskRequest>,
) -> HubResult<Json<AskResponse>> {
    if req.text.trim().is_empty() {
        return Err(HubError::MissingText);
    }
    // Client errors reject before any side effect, session touch included.
    let resolution = resolve(&state.personas, &req.persona, &req.text)?;
    let session_id = req.session_id_or_default();
    touch_session(&state, &session_id).await;

    // This path has no UI for suggestions, so inferred preferences apply
    // silently when auto-promote is on.
    let (patch, _reasons) = promote::infer_patch(&req.text, &state.personas.names());
    if !patch.is_empty() && req.auto_promote(CONFIG.auto_promote_default) {
        if let Err(e) = state.store.patch_promoted_state(&patch).await {
            warn!("auto-promote failed: {}", e);
        }
    }

    let promoted = state.store.get_promoted_state().await?;
    let ctx = req.merged_context();
    let execute = query.execute.unwrap_or(true);

    let response = fanout::answer_all(
        &state,
        &session_id,
        &resolution,
        Some(&ctx),
        execute,
        req.no_audio,
        &promoted,
    )
    .await;
    Ok(Json(response))
}

// ============================================================================
// Ask (streaming)
// ============================================================================

pub async fn ask_stream(
    State(state): State<AppState>,
    Query(query): Query<AskQuery>,
    Json(req): Json<AskRequest>,
) -> HubResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if req.text.trim().is_empty() {
        return Err(HubError::MissingText);
    }
    let resolution = resolve(&state.personas, &req.persona, &req.text)?;
    let session_id = req.session_id_or_default();
    touch_session(&state, &session_id).await;

    let targets = resolution.targets();
    let top_persona = resolution.label().to_string();
    let fanout_text = resolution.text().to_string();

    // Promoted-state suggestion, optionally auto-applied, surfaced as its own
    // event so the client can show what was learned.
    let (patch, reasons) = promote::infer_patch(&fanout_text, &state.personas.names());
    let memory_event = if patch.is_empty() {
        None
    } else if req.auto_promote(CONFIG.auto_promote_default) {
        match state.store.patch_promoted_state(&patch).await {
            Ok(_) => Some(MemoryEvent::promoted("applied", Some(patch), reasons, None)),
            Err(e) => Some(MemoryEvent::promoted(
                "error",
                None,
                Vec::new(),
                Some(e.to_string()),
            )),
        }
    } else {
        Some(MemoryEvent::promoted("suggested", Some(patch), reasons, None))
    };

    let promoted = state.store.get_promoted_state().await?;
    let ctx = req.merged_context();
    let execute = query.execute.unwrap_or(true);

    let mut rx = fanout::start_stream(
        state.clone(),
        session_id,
        targets.clone(),
        fanout_text,
        Some(ctx),
        execute,
        req.no_audio,
        promoted,
    );

    let keepalive = Duration::from_secs(CONFIG.stream_keepalive_secs.max(1));
    let stream = async_stream::stream! {
        yield Ok(sse_event(&StreamEvent::Meta {
            persona: top_persona.clone(),
            targets,
        }));
        if let Some(event) = memory_event {
            yield Ok(sse_event(&StreamEvent::Memory(event)));
        }

        // The channel closes when every target pipeline has finished and all
        // queued events are delivered; only then does the terminal event go
        // out. Idle gaps produce a payload-free keepalive, not a close.
        loop {
            match tokio::time::timeout(keepalive, rx.recv()).await {
                Ok(Some(event)) => yield Ok(sse_event(&event)),
                Ok(None) => break,
                Err(_) => yield Ok(Event::default().comment("keep-alive")),
            }
        }

        yield Ok(sse_event(&StreamEvent::Done { persona: top_persona.clone() }));
    };

    Ok(Sse::new(stream))
}

// ============================================================================
// Audio blob fetch
// ============================================================================

pub async fn get_audio(
    State(state): State<AppState>,
    Path(audio_id): Path<String>,
) -> HubResult<Response> {
    match state.audio.get(&audio_id).await {
        Some((bytes, mime)) => Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response()),
        None => Err(HubError::NotFound),
    }
}

// ============================================================================
// Passive reply feed
// ============================================================================

/// SSE feed of completed replies for passive observers (wall displays,
/// overlays). Best-effort: a lagged subscriber silently loses its oldest
/// undelivered items.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.bus.subscribe();
    let keepalive = Duration::from_secs(CONFIG.stream_keepalive_secs.max(1));

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(summary) => {
                            let data = serde_json::to_string(&summary).unwrap_or_default();
                            yield Ok(Event::default().event("reply").data(data));
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("reply feed lagged by {} events", n);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = tokio::time::sleep(keepalive) => {
                    yield Ok(Event::default().comment("keep-alive"));
                }
            }
        }
    };

    Sse::new(stream)
}

// ============================================================================
// Memory administration
// ============================================================================

fn require_admin(headers: &HeaderMap) -> HubResult<()> {
    if !CONFIG.memory_admin_enabled {
        return Err(HubError::NotFound);
    }
    let expected = CONFIG.memory_admin_token.trim();
    let provided = headers
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim();
    if expected.is_empty() || provided != expected {
        return Err(HubError::Forbidden);
    }
    Ok(())
}

pub async fn get_promoted(State(state): State<AppState>) -> HubResult<Json<Value>> {
    let promoted = state.store.get_promoted_state().await?;
    Ok(Json(Value::Object(promoted)))
}

pub async fn patch_promoted(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(patch): Json<Map<String, Value>>,
) -> HubResult<Json<Value>> {
    touch_session(&state, query.session_id.as_deref().unwrap_or("default")).await;
    let merged = state.store.patch_promoted_state(&patch).await?;
    Ok(Json(Value::Object(merged)))
}

pub async fn retrieval_upsert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RetrievalUpsertRequest>,
) -> HubResult<Json<Value>> {
    require_admin(&headers)?;
    touch_session(&state, req.session_id.as_deref().unwrap_or("default")).await;

    if !state.store.retrieval_available() {
        return Err(HubError::RetrievalUnavailable);
    }
    let chars = req.content.chars().count();
    let max = CONFIG.retrieval_max_doc_chars;
    if max > 0 && chars > max {
        return Err(HubError::DocTooLarge { chars, max });
    }

    state
        .store
        .upsert_retrieval_doc(
            &req.doc_id,
            req.title.as_deref().unwrap_or(""),
            &req.content,
            req.tags.as_deref().unwrap_or(""),
        )
        .await?;

    let mut pruned = 0;
    if CONFIG.retrieval_max_total_chars > 0 {
        pruned = state
            .store
            .prune_retrieval_to_max_chars(CONFIG.retrieval_max_total_chars)
            .await?;
    }
    Ok(Json(
        json!({ "ok": true, "doc_id": req.doc_id, "pruned_docs": pruned }),
    ))
}

pub async fn retrieval_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(doc_id): Path<String>,
) -> HubResult<Json<Value>> {
    require_admin(&headers)?;
    state.store.delete_retrieval_doc(&doc_id).await?;
    Ok(Json(json!({ "ok": true, "doc_id": doc_id })))
}

pub async fn retrieval_purge(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HubResult<Json<Value>> {
    require_admin(&headers)?;
    state.store.purge_retrieval().await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn retrieval_query(
    State(state): State<AppState>,
    Json(req): Json<RetrievalQueryRequest>,
) -> HubResult<Json<Value>> {
    touch_session(&state, req.session_id.as_deref().unwrap_or("default")).await;
    if !state.store.retrieval_available() {
        return Err(HubError::RetrievalUnavailable);
    }

    let hits = state.store.query_retrieval(&req.query, req.limit).await?;
    let hits: Vec<Value> = hits
        .iter()
        .map(|h| {
            json!({
                "doc_id": h.doc_id,
                "title": h.title,
                "content": h.content,
                "tags": h.tags,
                "score": h.score,
                "updated_at": h.updated_at,
            })
        })
        .collect();
    Ok(Json(json!({ "ok": true, "hits": hits })))
}

pub async fn history_clear(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> HubResult<Json<Value>> {
    state
        .store
        .clear_history(query.session_id.as_deref().unwrap_or("default"))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

// ============================================================================
// STT proxy, time, health
// ============================================================================

pub async fn stt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> HubResult<Json<SttResponse>> {
    if CONFIG.whisper_url.is_empty() {
        return Err(HubError::NotConfigured("WHISPER_URL is not set".to_string()));
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| HubError::Upstream(format!("bad multipart body: {}", e)))?
        .ok_or_else(|| HubError::Upstream("no audio file in request".to_string()))?;
    let filename = field.file_name().unwrap_or("audio").to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| HubError::Upstream(format!("failed to read audio: {}", e)))?;

    let part = reqwest::multipart::Part::bytes(bytes.to_vec())
        .file_name(filename)
        .mime_str(&content_type)
        .map_err(|e| HubError::Upstream(format!("bad content type: {}", e)))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let url = format!("{}/transcribe", CONFIG.whisper_url.trim_end_matches('/'));
    let body: Value = state
        .http
        .post(&url)
        .multipart(form)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| HubError::Upstream(format!("Whisper STT failed: {}", e)))?
        .json()
        .await
        .map_err(|e| HubError::Upstream(format!("Whisper STT failed: {}", e)))?;

    let text = body
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    Ok(Json(SttResponse { text }))
}

pub async fn time(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> HubResult<Json<Value>> {
    touch_session(&state, query.session_id.as_deref().unwrap_or("default")).await;
    let promoted = state.store.get_promoted_state().await?;
    let (now, zone) = now_with_zone(&promoted);
    Ok(Json(json!({
        "ok": true,
        "timezone": zone,
        "unix": now.timestamp(),
        "iso": now.to_rfc3339(),
        "display": now.format("%Y-%m-%d %H:%M:%S").to_string(),
    })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "local_llm_base_url": CONFIG.local_llm_base_url,
        "has_openai": !CONFIG.openai_api_key.is_empty(),
        "gemini_enabled": !CONFIG.gemini_api_key.is_empty(),
        "ha_enabled": state.actions.enabled(),
        "fish_enabled": CONFIG.fish_tts_enabled,
        "retrieval_available": state.store.retrieval_available(),
    }))
}
