//! FTS5 indexes over turns and permanent-memory chunks.
//!
//! Two indexes in the store's database:
//! - `turns_fts` — external-content FTS5 over `turns.content`, populated by
//!   an explicit `index_turn` call after every append (no triggers; a
//!   failure here is surfaced, not swallowed)
//! - `chunk_fts` — self-contained FTS5 over document chunks, replaced
//!   wholesale inside one transaction whenever the document changes
//!
//! Both use porter stemming. `bm25()` ranks are returned raw (negative,
//! lower is better); the retriever normalizes them.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use strata_core::{IndexError, SessionId, Turn};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bounded retry policy for queries racing an in-flight rebuild.
const QUERY_ATTEMPTS: u32 = 3;
const QUERY_BACKOFF_MS: u64 = 50;

/// A turn-index search hit with its raw BM25 rank.
#[derive(Debug, Clone)]
pub struct TurnHit {
    pub turn_id: i64,
    pub content: String,
    pub ts: DateTime<Utc>,
    pub bm25: f64,
}

/// A chunk-index search hit with its raw BM25 rank.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub heading: String,
    pub text: String,
    pub bm25: f64,
}

/// Owner of all derived index state.
pub struct Indexer {
    pool: SqlitePool,
    /// Serializes reindexes of the (single) permanent document.
    reindex_lock: Mutex<()>,
}

impl Indexer {
    /// Attach to the store's pool and create the index tables if missing.
    pub async fn new(pool: SqlitePool) -> Result<Self, IndexError> {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
                content,
                content='turns',
                content_rowid='id',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| IndexError::IndexFailed(format!("turns_fts table: {e}")))?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
                heading,
                body,
                chunk_id UNINDEXED,
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| IndexError::IndexFailed(format!("chunk_fts table: {e}")))?;

        Ok(Self {
            pool,
            reindex_lock: Mutex::new(()),
        })
    }

    /// Add one turn to the full-text index. Called exactly once per turn,
    /// immediately after the append succeeds.
    pub async fn index_turn(&self, turn: &Turn) -> Result<(), IndexError> {
        sqlx::query("INSERT INTO turns_fts(rowid, content) VALUES (?1, ?2)")
            .bind(turn.id)
            .bind(&turn.content)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::IndexFailed(format!("index_turn {}: {e}", turn.id)))?;
        debug!(turn = turn.id, "turn indexed");
        Ok(())
    }

    /// Re-segment the permanent document and atomically replace every chunk
    /// in the index. The swap happens inside one transaction, so readers
    /// see either the old chunk set or the new one, never an empty window.
    /// Idempotent: the same document text produces the same chunk rows.
    /// Concurrent calls are serialized, not interleaved.
    pub async fn reindex_permanent(&self, document_text: &str) -> Result<usize, IndexError> {
        let _guard = self.reindex_lock.lock().await;
        let chunks = crate::chunker::chunk_markdown(document_text);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::IndexFailed(format!("reindex begin: {e}")))?;

        sqlx::query("DELETE FROM chunk_fts")
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::IndexFailed(format!("reindex clear: {e}")))?;

        for chunk in &chunks {
            sqlx::query("INSERT INTO chunk_fts(heading, body, chunk_id) VALUES (?1, ?2, ?3)")
                .bind(&chunk.heading)
                .bind(&chunk.text)
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    IndexError::IndexFailed(format!("reindex insert {}: {e}", chunk.id))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexError::IndexFailed(format!("reindex commit: {e}")))?;

        info!(chunks = chunks.len(), "permanent memory reindexed");
        Ok(chunks.len())
    }

    /// BM25 search over the turn index, optionally restricted to one
    /// session. Results ordered best-rank-first.
    pub async fn search_turns(
        &self,
        query: &str,
        session: Option<&SessionId>,
        limit: usize,
    ) -> Result<Vec<TurnHit>, IndexError> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let session_str = session.map(|s| s.as_str().to_string());

        let rows = self
            .with_retry("search_turns", || async {
                sqlx::query(
                    r#"
                    SELECT t.id, t.content, t.ts, bm25(turns_fts) AS rank
                    FROM turns_fts
                    JOIN turns t ON t.id = turns_fts.rowid
                    WHERE turns_fts MATCH ?1
                      AND (?2 IS NULL OR t.session_id = ?2)
                    ORDER BY rank
                    LIMIT ?3
                    "#,
                )
                .bind(&fts_query)
                .bind(&session_str)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            })
            .await?;

        rows.iter()
            .map(|row| {
                let ts_raw: String = row
                    .try_get("ts")
                    .map_err(|e| IndexError::QueryFailed(format!("ts column: {e}")))?;
                let ts = DateTime::parse_from_rfc3339(&ts_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| IndexError::QueryFailed(format!("ts parse: {e}")))?;
                Ok(TurnHit {
                    turn_id: row
                        .try_get("id")
                        .map_err(|e| IndexError::QueryFailed(format!("id column: {e}")))?,
                    content: row
                        .try_get("content")
                        .map_err(|e| IndexError::QueryFailed(format!("content column: {e}")))?,
                    ts,
                    bm25: row.try_get("rank").unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// BM25 search over the permanent-memory chunk index.
    pub async fn search_chunks(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkHit>, IndexError> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .with_retry("search_chunks", || async {
                sqlx::query(
                    "SELECT chunk_id, heading, body, bm25(chunk_fts) AS rank \
                     FROM chunk_fts WHERE chunk_fts MATCH ?1 ORDER BY rank LIMIT ?2",
                )
                .bind(&fts_query)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            })
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ChunkHit {
                    chunk_id: row
                        .try_get("chunk_id")
                        .map_err(|e| IndexError::QueryFailed(format!("chunk_id column: {e}")))?,
                    heading: row
                        .try_get("heading")
                        .map_err(|e| IndexError::QueryFailed(format!("heading column: {e}")))?,
                    text: row
                        .try_get("body")
                        .map_err(|e| IndexError::QueryFailed(format!("body column: {e}")))?,
                    bm25: row.try_get("rank").unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// Run a query with bounded retries against a busy/mid-rebuild index.
    async fn with_retry<T, F, Fut>(&self, ctx: &str, op: F) -> Result<T, IndexError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) && attempt < QUERY_ATTEMPTS => {
                    warn!(ctx, attempt, "index busy, retrying");
                    tokio::time::sleep(Duration::from_millis(QUERY_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(e) if is_busy(&e) => {
                    return Err(IndexError::Inconsistent {
                        attempts: attempt,
                        detail: format!("{ctx}: {e}"),
                    });
                }
                Err(e) => return Err(IndexError::QueryFailed(format!("{ctx}: {e}"))),
            }
        }
    }
}

fn is_busy(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("locked")
        || db.message().contains("busy"))
}

/// Build a safe FTS5 query from user text: tokenize, strip anything
/// non-alphanumeric, quote each token and prefix-match it.
fn sanitize_fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            let clean: String = w
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if clean.is_empty() {
                String::new()
            } else {
                format!("\"{clean}\"*")
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
