// tests/memory_store.rs
//
// Store-level behavior against an isolated in-memory SQLite database:
// history de-duplication, digest compaction, promoted-state merges, and
// retrieval corpus pruning.

use domino_hub::memory::MemoryStore;
use serde_json::{Map, json};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

/// Fresh store on its own in-memory database, plus a unique session id.
async fn setup() -> (MemoryStore, String) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    let store = MemoryStore::new(pool).await.expect("schema init failed");
    let session_id = format!("test_session_{}", Uuid::new_v4());
    (store, session_id)
}

async fn message_count(store: &MemoryStore, session_id: &str, persona: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ? AND persona = ?")
        .bind(session_id)
        .bind(persona)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

// ============================================================================
// Rolling history
// ============================================================================

#[tokio::test]
async fn test_add_and_read_back_messages() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "turn on the lights")
        .await
        .unwrap();
    store
        .add_chat_message(&session, "domino", "assistant", "done, lights on")
        .await
        .unwrap();

    let (summary, turns) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, "user");
    assert_eq!(turns[0].content, "turn on the lights");
    assert_eq!(turns[1].role, "assistant");
}

#[tokio::test]
async fn test_duplicate_write_within_window_collapses() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "turn on the lights")
        .await
        .unwrap();
    store
        .add_chat_message(&session, "domino", "user", "turn on the lights")
        .await
        .unwrap();

    assert_eq!(message_count(&store, &session, "domino").await, 1);
}

#[tokio::test]
async fn test_different_content_is_not_deduplicated() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "turn on the lights")
        .await
        .unwrap();
    store
        .add_chat_message(&session, "domino", "user", "turn off the lights")
        .await
        .unwrap();
    // Same content but a different role is a different turn.
    store
        .add_chat_message(&session, "domino", "assistant", "turn on the lights")
        .await
        .unwrap();

    assert_eq!(message_count(&store, &session, "domino").await, 3);
}

#[tokio::test]
async fn test_empty_content_is_skipped() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "")
        .await
        .unwrap();
    assert_eq!(message_count(&store, &session, "domino").await, 0);
}

#[tokio::test]
async fn test_history_scoped_per_persona() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "hello domino")
        .await
        .unwrap();
    store
        .add_chat_message(&session, "penny", "user", "hello penny")
        .await
        .unwrap();

    let (_, domino_turns) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert_eq!(domino_turns.len(), 1);
    assert_eq!(domino_turns[0].content, "hello domino");
}

#[tokio::test]
async fn test_get_chat_context_drops_oldest_over_budget() {
    let (store, session) = setup().await;
    for i in 0..6 {
        store
            .add_chat_message(&session, "domino", "user", &format!("message number {}", i))
            .await
            .unwrap();
    }

    // Each message is ~16-17 chars; a 40-char budget keeps only the newest.
    let (_, turns) = store.get_chat_context(&session, "domino", 16, 40).await.unwrap();
    assert!(!turns.is_empty());
    assert!(turns.len() < 6);
    assert_eq!(turns.last().unwrap().content, "message number 5");
}

// ============================================================================
// Digest compaction
// ============================================================================

#[tokio::test]
async fn test_trim_history_folds_overflow_into_digest() {
    let (store, session) = setup().await;
    for i in 0..12 {
        store
            .add_chat_message(&session, "domino", "user", &format!("turn {}", i))
            .await
            .unwrap();
    }

    store.trim_history(&session, "domino", 4, 1800).await.unwrap();

    assert_eq!(message_count(&store, &session, "domino").await, 4);
    let (summary, turns) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0].content, "turn 8");
    assert!(!summary.is_empty());
    assert!(summary.contains("user: turn 0"));
    assert!(summary.chars().count() <= 1800);
}

#[tokio::test]
async fn test_trim_history_noop_under_threshold() {
    let (store, session) = setup().await;
    store
        .add_chat_message(&session, "domino", "user", "only one")
        .await
        .unwrap();
    store.trim_history(&session, "domino", 8, 1800).await.unwrap();

    assert_eq!(message_count(&store, &session, "domino").await, 1);
    let (summary, _) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert!(summary.is_empty());
}

#[tokio::test]
async fn test_digest_recompaction_slides_from_front() {
    let (store, session) = setup().await;
    let max_summary = 120;

    // Two rounds of overflow; the digest must stay bounded and keep the
    // newest folded content.
    for round in 0..2 {
        for i in 0..10 {
            store
                .add_chat_message(
                    &session,
                    "domino",
                    "user",
                    &format!("round {} message {}", round, i),
                )
                .await
                .unwrap();
        }
        store
            .trim_history(&session, "domino", 4, max_summary)
            .await
            .unwrap();
    }

    let (summary, _) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert!(!summary.is_empty());
    assert!(summary.chars().count() <= max_summary);
    assert!(summary.contains("round 1"));
}

#[tokio::test]
async fn test_clear_history_removes_messages_and_digest() {
    let (store, session) = setup().await;
    for i in 0..10 {
        store
            .add_chat_message(&session, "domino", "user", &format!("m{}", i))
            .await
            .unwrap();
    }
    store.trim_history(&session, "domino", 4, 1800).await.unwrap();
    store.clear_history(&session).await.unwrap();

    assert_eq!(message_count(&store, &session, "domino").await, 0);
    let (summary, turns) = store.get_chat_context(&session, "domino", 16, 6000).await.unwrap();
    assert!(summary.is_empty());
    assert!(turns.is_empty());
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_expired_session_cascades_to_history() {
    let (store, session) = setup().await;
    store.touch_session(&session, 30).await.unwrap();
    store
        .add_chat_message(&session, "domino", "user", "remember me")
        .await
        .unwrap();
    store.trim_history(&session, "domino", 4, 1800).await.unwrap();

    // Age the session well past the cutoff.
    sqlx::query("UPDATE sessions SET last_seen = 0 WHERE session_id = ?")
        .bind(&session)
        .execute(store.pool())
        .await
        .unwrap();

    let removed = store.expire_stale_sessions(30).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(message_count(&store, &session, "domino").await, 0);
}

#[tokio::test]
async fn test_touch_refreshes_last_seen() {
    let (store, session) = setup().await;
    store.touch_session(&session, 30).await.unwrap();
    sqlx::query("UPDATE sessions SET last_seen = 1 WHERE session_id = ?")
        .bind(&session)
        .execute(store.pool())
        .await
        .unwrap();

    store.touch_session(&session, 30).await.unwrap();
    let last_seen: f64 = sqlx::query_scalar("SELECT last_seen FROM sessions WHERE session_id = ?")
        .bind(&session)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert!(last_seen > 1.0);
}

// ============================================================================
// Promoted state
// ============================================================================

#[tokio::test]
async fn test_empty_patch_is_identity() {
    let (store, _) = setup().await;
    let mut seed = Map::new();
    seed.insert("timezone".to_string(), json!("UTC"));
    store.seed_promoted_state(&seed).await.unwrap();

    let before = store.get_promoted_state().await.unwrap();
    let after = store.patch_promoted_state(&Map::new()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_nested_patch_preserves_siblings() {
    let (store, _) = setup().await;
    let mut seed = Map::new();
    seed.insert(
        "tts_overrides".to_string(),
        json!({ "domino": "auto", "penny": "auto", "jimmy": "auto" }),
    );
    store.seed_promoted_state(&seed).await.unwrap();

    let mut patch = Map::new();
    patch.insert("tts_overrides".to_string(), json!({ "penny": "off" }));
    let merged = store.patch_promoted_state(&patch).await.unwrap();

    assert_eq!(merged["tts_overrides"]["penny"], "off");
    assert_eq!(merged["tts_overrides"]["domino"], "auto");
    assert_eq!(merged["tts_overrides"]["jimmy"], "auto");
}

#[tokio::test]
async fn test_scalar_patch_replaces_value() {
    let (store, _) = setup().await;
    let mut seed = Map::new();
    seed.insert("timezone".to_string(), json!("UTC"));
    seed.insert("location".to_string(), json!("somewhere"));
    store.seed_promoted_state(&seed).await.unwrap();

    let mut patch = Map::new();
    patch.insert("timezone".to_string(), json!("America/Chicago"));
    let merged = store.patch_promoted_state(&patch).await.unwrap();

    assert_eq!(merged["timezone"], "America/Chicago");
    assert_eq!(merged["location"], "somewhere");
}

#[tokio::test]
async fn test_seed_does_not_overwrite_existing_state() {
    let (store, _) = setup().await;
    let mut first = Map::new();
    first.insert("timezone".to_string(), json!("UTC"));
    store.seed_promoted_state(&first).await.unwrap();

    let mut second = Map::new();
    second.insert("timezone".to_string(), json!("America/Denver"));
    store.seed_promoted_state(&second).await.unwrap();

    let state = store.get_promoted_state().await.unwrap();
    assert_eq!(state["timezone"], "UTC");
}

// ============================================================================
// Retrieval corpus
// ============================================================================

#[tokio::test]
async fn test_retrieval_upsert_and_query() {
    let (store, _) = setup().await;
    assert!(store.retrieval_available());

    store
        .upsert_retrieval_doc("doc1", "garage door", "the garage door opener code is blue", "")
        .await
        .unwrap();
    store
        .upsert_retrieval_doc("doc2", "thermostat", "the thermostat schedule runs weekdays", "")
        .await
        .unwrap();

    let hits = store.query_retrieval("garage", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "doc1");
    assert!(hits[0].updated_at.is_some());
}

#[tokio::test]
async fn test_retrieval_upsert_replaces_by_id() {
    let (store, _) = setup().await;
    store
        .upsert_retrieval_doc("doc1", "first", "original content here", "")
        .await
        .unwrap();
    store
        .upsert_retrieval_doc("doc1", "first", "replacement content here", "")
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retrieval_meta")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let hits = store.query_retrieval("replacement", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_prune_removes_oldest_first() {
    let (store, _) = setup().await;
    // Three docs, oldest to newest, ~30 chars each.
    for (i, id) in ["old", "mid", "new"].iter().enumerate() {
        store
            .upsert_retrieval_doc(id, "", &format!("document body number {} padding", i), "")
            .await
            .unwrap();
        // Distinct updated_at ordering.
        sqlx::query("UPDATE retrieval_meta SET updated_at = ? WHERE doc_id = ?")
            .bind((i as f64) * 100.0)
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let total: i64 = sqlx::query_scalar("SELECT SUM(size_chars) FROM retrieval_meta")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let ceiling = (total - 1) as usize;

    let removed = store.prune_retrieval_to_max_chars(ceiling).await.unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<String> = sqlx::query_scalar("SELECT doc_id FROM retrieval_meta")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert!(!remaining.contains(&"old".to_string()));
    assert!(remaining.contains(&"new".to_string()));

    let total_after: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size_chars), 0) FROM retrieval_meta")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert!(total_after as usize <= ceiling);
}

#[tokio::test]
async fn test_prune_noop_under_ceiling() {
    let (store, _) = setup().await;
    store
        .upsert_retrieval_doc("doc1", "", "small", "")
        .await
        .unwrap();
    let removed = store.prune_retrieval_to_max_chars(10_000).await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn test_delete_and_purge() {
    let (store, _) = setup().await;
    store.upsert_retrieval_doc("a", "", "alpha content", "").await.unwrap();
    store.upsert_retrieval_doc("b", "", "beta content", "").await.unwrap();

    store.delete_retrieval_doc("a").await.unwrap();
    assert!(store.query_retrieval("alpha", 5).await.unwrap().is_empty());
    assert_eq!(store.query_retrieval("beta", 5).await.unwrap().len(), 1);

    store.purge_retrieval().await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retrieval_meta")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_query_empty_text_returns_nothing() {
    let (store, _) = setup().await;
    store.upsert_retrieval_doc("a", "", "alpha content", "").await.unwrap();
    assert!(store.query_retrieval("   ", 5).await.unwrap().is_empty());
}
