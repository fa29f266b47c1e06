//! SQLite-backed memory store
//!
//! Sessions, promoted state, rolling history with digest compaction, and the
//! FTS5 retrieval corpus. Every operation is a short statement or transaction
//! against one WAL-mode pool, so concurrent sessions don't serialize on a
//! global lock. Retrieval is optional: if the FTS5 module is missing from the
//! SQLite build, the rest of the store keeps working and callers see
//! `retrieval_available() == false`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::DEEP_MERGE_KEYS;

/// Identical messages written again within this window are retry noise.
const DEDUP_WINDOW_SECS: f64 = 300.0;

/// Per-message clip when folding history into the digest.
const DIGEST_CLIP_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub tags: String,
    pub score: f64,
    pub updated_at: Option<f64>,
}

pub struct MemoryStore {
    pool: SqlitePool,
    retrieval_available: bool,
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}

impl MemoryStore {
    /// Connect with the concurrency pragmas this store relies on: WAL to
    /// reduce writer lock contention, a busy timeout to ride out concurrent
    /// writes, foreign keys on.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("bad database url: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(2000))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, initializing the schema and probing FTS5.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let retrieval_available = Self::init_schema(&pool).await?;
        Ok(Self {
            pool,
            retrieval_available,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<bool> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at REAL NOT NULL,
                last_seen REAL NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS promoted_state (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL,
                updated_at REAL NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                persona TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                ts REAL NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_chat_messages_scope
            ON chat_messages(session_id, persona, id)
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_summaries (
                session_id TEXT NOT NULL,
                persona TEXT NOT NULL,
                summary TEXT NOT NULL,
                updated_at REAL NOT NULL,
                PRIMARY KEY (session_id, persona)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retrieval_meta (
                doc_id TEXT PRIMARY KEY,
                updated_at REAL NOT NULL,
                size_chars INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // FTS5 may be absent from the linked SQLite; the store still works
        // without retrieval.
        let fts = sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS retrieval_fts
            USING fts5(doc_id UNINDEXED, title, content, tags)
            "#,
        )
        .execute(pool)
        .await;

        match fts {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("FTS5 unavailable, retrieval disabled: {}", e);
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Record last_seen for a pseudonymous session id. The id is not
    /// authentication; it only groups history.
    pub async fn touch_session(&self, session_id: &str, max_age_days: i64) -> Result<()> {
        if session_id.is_empty() {
            return Ok(());
        }
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, created_at, last_seen)
            VALUES (?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET last_seen = excluded.last_seen
            "#,
        )
        .bind(session_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // Opportunistic cleanup; failures here must never block the caller.
        if let Err(e) = self.expire_stale_sessions(max_age_days).await {
            warn!("session expiry sweep failed: {}", e);
        }
        Ok(())
    }

    /// Delete sessions unseen past the age limit, cascading to their history
    /// and digests. Returns the number of sessions removed.
    pub async fn expire_stale_sessions(&self, max_age_days: i64) -> Result<u64> {
        let cutoff = unix_now() - (max_age_days as f64) * 86_400.0;

        let stale: Vec<String> =
            sqlx::query_scalar("SELECT session_id FROM sessions WHERE last_seen < ?")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for session_id in &stale {
            sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chat_summaries WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("expired {} stale session(s)", stale.len());
        Ok(stale.len() as u64)
    }

    // ------------------------------------------------------------------
    // Promoted state
    // ------------------------------------------------------------------

    pub async fn get_promoted_state(&self) -> Result<Map<String, Value>> {
        let rows = sqlx::query("SELECT key, value_json FROM promoted_state")
            .fetch_all(&self.pool)
            .await?;

        let mut state = Map::new();
        for row in rows {
            let key: String = row.get("key");
            let raw: String = row.get("value_json");
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            state.insert(key, value);
        }
        Ok(state)
    }

    pub async fn set_promoted_state(&self, state: &Map<String, Value>) -> Result<()> {
        let now = unix_now();
        let mut tx = self.pool.begin().await?;
        for (key, value) in state {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO promoted_state (key, value_json, updated_at)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Merge a partial document into the promoted state. Scalar fields merge
    /// shallowly; the known nested map fields merge one level deep so a
    /// partial update never erases sibling keys.
    pub async fn patch_promoted_state(
        &self,
        patch: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut state = self.get_promoted_state().await?;

        for (key, value) in patch {
            let deep = DEEP_MERGE_KEYS.contains(&key.as_str());
            match (deep, state.get(key), value) {
                (true, Some(Value::Object(existing)), Value::Object(incoming)) => {
                    let mut merged = existing.clone();
                    for (k, v) in incoming {
                        merged.insert(k.clone(), v.clone());
                    }
                    state.insert(key.clone(), Value::Object(merged));
                }
                _ => {
                    state.insert(key.clone(), value.clone());
                }
            }
        }

        self.set_promoted_state(&state).await?;
        Ok(state)
    }

    /// Seed the promoted document if the table is empty (first boot).
    pub async fn seed_promoted_state(&self, defaults: &Map<String, Value>) -> Result<()> {
        let existing = self.get_promoted_state().await?;
        if existing.is_empty() {
            self.set_promoted_state(defaults).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rolling chat history
    // ------------------------------------------------------------------

    /// Append one message. An identical write for the same (session,
    /// persona, role) within the de-dup window collapses to the earlier row;
    /// upstream retries after a hung generation call otherwise double-store
    /// the user turn.
    pub async fn add_chat_message(
        &self,
        session_id: &str,
        persona: &str,
        role: &str,
        content: &str,
    ) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        let now = unix_now();

        let last: Option<(String, f64)> = sqlx::query_as(
            r#"
            SELECT content, ts FROM chat_messages
            WHERE session_id = ? AND persona = ? AND role = ?
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(persona)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((last_content, last_ts)) = last {
            if last_content.trim() == content.trim() && (now - last_ts) < DEDUP_WINDOW_SECS {
                return Ok(());
            }
        }

        sqlx::query(
            "INSERT INTO chat_messages (session_id, persona, role, content, ts) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(persona)
        .bind(role)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The persona's digest plus its most recent messages, oldest dropped
    /// until the combined character budget fits.
    pub async fn get_chat_context(
        &self,
        session_id: &str,
        persona: &str,
        last_n: usize,
        max_chars: usize,
    ) -> Result<(String, Vec<ChatTurn>)> {
        let summary: Option<String> = sqlx::query_scalar(
            "SELECT summary FROM chat_summaries WHERE session_id = ? AND persona = ?",
        )
        .bind(session_id)
        .bind(persona)
        .fetch_optional(&self.pool)
        .await?;
        let summary = summary.unwrap_or_default();

        let rows = sqlx::query(
            r#"
            SELECT role, content FROM chat_messages
            WHERE session_id = ? AND persona = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(persona)
        .bind(last_n.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns: Vec<ChatTurn> = rows
            .into_iter()
            .rev()
            .map(|row| ChatTurn {
                role: row.get("role"),
                content: row.get("content"),
            })
            .collect();

        let summary_chars = summary.chars().count();
        let total = |turns: &Vec<ChatTurn>| {
            summary_chars
                + turns
                    .iter()
                    .map(|t| t.content.chars().count())
                    .sum::<usize>()
        };
        while !turns.is_empty() && total(&turns) > max_chars {
            turns.remove(0);
        }

        Ok((summary, turns))
    }

    /// Fold everything past the newest `keep_last` messages into the digest
    /// and delete the folded rows. The digest is deterministic text, not a
    /// model summary: clipped `role: content` fragments appended to the old
    /// digest, with the combined window truncated from the front.
    pub async fn trim_history(
        &self,
        session_id: &str,
        persona: &str,
        keep_last: usize,
        max_summary_chars: usize,
    ) -> Result<()> {
        let keep_last = keep_last.max(4);

        let rows = sqlx::query(
            r#"
            SELECT id, role, content FROM chat_messages
            WHERE session_id = ? AND persona = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .bind(persona)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() <= keep_last {
            return Ok(());
        }

        let boundary = rows.len() - keep_last;
        let keep_from_id: i64 = rows[boundary].get("id");

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT summary FROM chat_summaries WHERE session_id = ? AND persona = ?",
        )
        .bind(session_id)
        .bind(persona)
        .fetch_optional(&self.pool)
        .await?;
        let summary = existing.unwrap_or_default();

        let digest = rows[..boundary]
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                let content: String = row.get("content");
                let content = clip_chars(content.trim().replace('\n', " ").as_str(), DIGEST_CLIP_CHARS);
                format!("{}: {}", role, content)
            })
            .collect::<Vec<_>>()
            .join(" | ");

        let combined = if !summary.is_empty() && !digest.is_empty() {
            format!("{} | {}", summary, digest)
        } else if !summary.is_empty() {
            summary
        } else {
            digest
        };
        let combined = tail_chars(combined.replace('\n', " ").trim(), max_summary_chars);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO chat_summaries (session_id, persona, summary, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(persona)
        .bind(&combined)
        .bind(unix_now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chat_messages WHERE session_id = ? AND persona = ? AND id < ?")
            .bind(session_id)
            .bind(persona)
            .bind(keep_from_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop one session's rolling history and digests across all personas.
    pub async fn clear_history(&self, session_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_summaries WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Retrieval corpus
    // ------------------------------------------------------------------

    pub fn retrieval_available(&self) -> bool {
        self.retrieval_available
    }

    fn require_retrieval(&self) -> Result<()> {
        if self.retrieval_available {
            Ok(())
        } else {
            anyhow::bail!("FTS5 is not available in this SQLite build")
        }
    }

    /// Replace a document wholesale (delete + reinsert is the reliable path
    /// for FTS tables) and update the size ledger.
    pub async fn upsert_retrieval_doc(
        &self,
        doc_id: &str,
        title: &str,
        content: &str,
        tags: &str,
    ) -> Result<()> {
        anyhow::ensure!(!doc_id.is_empty(), "doc_id is required");
        self.require_retrieval()?;

        let size_chars =
            (title.chars().count() + content.chars().count() + tags.chars().count()) as i64;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM retrieval_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO retrieval_fts (doc_id, title, content, tags) VALUES (?, ?, ?, ?)")
            .bind(doc_id)
            .bind(title)
            .bind(content)
            .bind(tags)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR REPLACE INTO retrieval_meta (doc_id, updated_at, size_chars) VALUES (?, ?, ?)",
        )
        .bind(doc_id)
        .bind(unix_now())
        .bind(size_chars)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_retrieval_doc(&self, doc_id: &str) -> Result<()> {
        if doc_id.is_empty() || !self.retrieval_available {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM retrieval_fts WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM retrieval_meta WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn purge_retrieval(&self) -> Result<()> {
        if !self.retrieval_available {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM retrieval_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM retrieval_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Prune oldest-updated documents until the corpus character total is at
    /// or under the ceiling. Returns the number of documents removed.
    pub async fn prune_retrieval_to_max_chars(&self, max_total_chars: usize) -> Result<u64> {
        if !self.retrieval_available || max_total_chars == 0 {
            return Ok(0);
        }
        let max_total = max_total_chars as i64;

        let mut total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_chars), 0) FROM retrieval_meta")
                .fetch_one(&self.pool)
                .await?;
        if total <= max_total {
            return Ok(0);
        }

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT doc_id, size_chars FROM retrieval_meta ORDER BY updated_at ASC")
                .fetch_all(&self.pool)
                .await?;

        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for (doc_id, size_chars) in rows {
            if total <= max_total {
                break;
            }
            sqlx::query("DELETE FROM retrieval_fts WHERE doc_id = ?")
                .bind(&doc_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM retrieval_meta WHERE doc_id = ?")
                .bind(&doc_id)
                .execute(&mut *tx)
                .await?;
            total -= size_chars;
            removed += 1;
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Ranked full-text search. bm25 scores are lower-is-better.
    pub async fn query_retrieval(&self, query: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() || !self.retrieval_available {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, 10) as i64;

        let rows = sqlx::query(
            r#"
            SELECT f.doc_id, f.title, f.content, f.tags,
                   bm25(retrieval_fts) AS score,
                   m.updated_at AS updated_at
            FROM retrieval_fts AS f
            LEFT JOIN retrieval_meta AS m ON m.doc_id = f.doc_id
            WHERE retrieval_fts MATCH ?
            ORDER BY score
            LIMIT ?
            "#,
        )
        .bind(query.trim())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RetrievalHit {
                doc_id: row.get("doc_id"),
                title: row.get("title"),
                content: row.get("content"),
                tags: row.get("tags"),
                score: row.get("score"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}
