//! HTTP surface
//!
//! REST + SSE endpoints:
//! - POST /api/ask          - single-shot ask (aggregate fan-out)
//! - POST /api/ask_stream   - SSE streaming ask
//! - GET  /api/audio/{id}   - audio blob fetch
//! - GET  /api/events       - passive completed-reply feed
//! - GET/PATCH /api/memory/promoted, /api/memory/retrieval/*, history/clear
//! - POST /api/stt, GET /api/time, GET /health

mod handlers;
pub mod types;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/time", get(handlers::time))
        .route("/api/ask", post(handlers::ask))
        .route("/api/ask_stream", post(handlers::ask_stream))
        .route("/api/audio/{audio_id}", get(handlers::get_audio))
        .route("/api/events", get(handlers::events))
        .route("/api/stt", post(handlers::stt))
        .route(
            "/api/memory/promoted",
            get(handlers::get_promoted).patch(handlers::patch_promoted),
        )
        .route("/api/memory/retrieval/upsert", post(handlers::retrieval_upsert))
        .route("/api/memory/retrieval/query", post(handlers::retrieval_query))
        .route("/api/memory/retrieval/purge", post(handlers::retrieval_purge))
        .route("/api/memory/retrieval/{doc_id}", delete(handlers::retrieval_delete))
        .route("/api/memory/history/clear", post(handlers::history_clear))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
