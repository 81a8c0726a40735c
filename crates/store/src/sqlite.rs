//! SQLite store for turns and summaries.
//!
//! Single WAL-mode database, single source of truth. One write transaction
//! at a time, unlimited concurrent readers against the last committed
//! state, so retrieval never blocks on an in-flight compaction.
//!
//! Full-text index tables over this data are owned by `strata-index` and
//! populated through explicit calls, never through triggers.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use strata_config::StorageConfig;
use strata_core::{Role, SessionId, StoreError, Summary, Turn, TurnRange};
use tracing::{debug, info};

/// Durable turn/summary storage over a SQLite pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database described by `config`.
    pub async fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.db_path)
            .map_err(|e| StoreError::Unavailable(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %config.db_path, "SQLite store initialized");
        Ok(store)
    }

    /// The underlying pool, shared with the indexer so derived index tables
    /// live in the same database and transactions.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL,
                agent_role  TEXT,
                role        TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant', 'system', 'tool')),
                content     TEXT NOT NULL,
                tokens      INTEGER NOT NULL DEFAULT 0,
                summarized  INTEGER NOT NULL DEFAULT 0 CHECK (summarized IN (0, 1)),
                ts          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_session_unsummarized \
             ON turns(session_id, summarized, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL,
                content     TEXT NOT NULL,
                turn_range  TEXT NOT NULL,
                ts          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("summaries table: {e}")))?;

        debug!("store migrations complete");
        Ok(())
    }

    /// Append one turn. Durable before return; id assignment is serialized
    /// by SQLite's single-writer discipline, so ids within a session are
    /// strictly increasing in insertion order.
    pub async fn append_turn(
        &self,
        session: &SessionId,
        role: Role,
        agent: Option<&str>,
        content: &str,
        tokens: usize,
    ) -> Result<Turn, StoreError> {
        let ts = Utc::now();
        let result = sqlx::query(
            "INSERT INTO turns (session_id, agent_role, role, content, tokens, summarized, ts) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        )
        .bind(session.as_str())
        .bind(agent)
        .bind(role.as_str())
        .bind(content)
        .bind(tokens as i64)
        .bind(ts.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("append_turn", e))?;

        let id = result.last_insert_rowid();
        debug!(turn = id, session = %session, %role, "turn appended");

        Ok(Turn {
            id,
            session: session.clone(),
            role,
            agent: agent.map(String::from),
            content: content.to_string(),
            tokens,
            summarized: false,
            ts,
        })
    }

    /// Fetch one turn by id.
    pub async fn turn(&self, id: i64) -> Result<Option<Turn>, StoreError> {
        let row = sqlx::query("SELECT * FROM turns WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("turn", e))?;
        row.as_ref().map(row_to_turn).transpose()
    }

    /// All unsummarized turns for a session, lowest id first.
    pub async fn unsummarized_turns(&self, session: &SessionId) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM turns WHERE session_id = ?1 AND summarized = 0 ORDER BY id",
        )
        .bind(session.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("unsummarized_turns", e))?;
        rows.iter().map(row_to_turn).collect()
    }

    /// Number of unsummarized turns in a session. This is the per-session
    /// compaction counter: derived from the same rows the appending
    /// transaction wrote, never a process-wide value.
    pub async fn count_unsummarized(&self, session: &SessionId) -> Result<usize, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM turns WHERE session_id = ?1 AND summarized = 0",
        )
        .bind(session.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_err("count_unsummarized", e))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::QueryFailed(format!("n column: {e}")))?;
        Ok(n as usize)
    }

    /// The most recent unsummarized turns, in chronological order, at most
    /// `limit`. This is the short-term buffer the assembler reads.
    pub async fn recent_unsummarized(
        &self,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM turns WHERE session_id = ?1 AND summarized = 0 \
             ORDER BY id DESC LIMIT ?2",
        )
        .bind(session.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("recent_unsummarized", e))?;
        let mut turns: Vec<Turn> = rows.iter().map(row_to_turn).collect::<Result<_, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    /// Flip the summarized flag on the given turns. False → true only.
    pub async fn mark_summarized(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE turns SET summarized = 1 WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("mark_summarized", e))?;
        Ok(())
    }

    /// Insert a summary row covering `range`.
    pub async fn write_summary(
        &self,
        session: &SessionId,
        range: TurnRange,
        content: &str,
    ) -> Result<Summary, StoreError> {
        let ts = Utc::now();
        let result = sqlx::query(
            "INSERT INTO summaries (session_id, content, turn_range, ts) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(content)
        .bind(range.to_string())
        .bind(ts.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("write_summary", e))?;

        Ok(Summary {
            id: result.last_insert_rowid(),
            session: session.clone(),
            content: content.to_string(),
            range,
            ts,
        })
    }

    /// Summary insert plus flag flips in one transaction: either the
    /// summary exists and every covered turn is marked, or neither.
    pub async fn record_summary(
        &self,
        session: &SessionId,
        content: &str,
        turn_ids: &[i64],
    ) -> Result<Summary, StoreError> {
        let (first, last) = match (turn_ids.first(), turn_ids.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => {
                return Err(StoreError::QueryFailed(
                    "record_summary called with no turn ids".into(),
                ));
            }
        };
        let range = TurnRange::new(first, last);
        let ts = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("record_summary begin", e))?;

        let result = sqlx::query(
            "INSERT INTO summaries (session_id, content, turn_range, ts) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(content)
        .bind(range.to_string())
        .bind(ts.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("record_summary insert", e))?;

        let placeholders = vec!["?"; turn_ids.len()].join(",");
        let sql = format!("UPDATE turns SET summarized = 1 WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in turn_ids {
            query = query.bind(id);
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("record_summary flags", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("record_summary commit", e))?;

        Ok(Summary {
            id: result.last_insert_rowid(),
            session: session.clone(),
            content: content.to_string(),
            range,
            ts,
        })
    }

    /// The most recent summary for a session, if any.
    pub async fn latest_summary(&self, session: &SessionId) -> Result<Option<Summary>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM summaries WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
        )
        .bind(session.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("latest_summary", e))?;
        row.as_ref().map(row_to_summary).transpose()
    }
}

/// Map a sqlx failure to the store error taxonomy: connectivity problems
/// are `Unavailable`, everything else a query failure.
fn map_db_err(ctx: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{ctx}: {e}"))
        }
        other => StoreError::QueryFailed(format!("{ctx}: {other}")),
    }
}

fn parse_ts(ctx: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{ctx} timestamp: {e}")))
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
    let session: String = row
        .try_get("session_id")
        .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
    let role_raw: String = row
        .try_get("role")
        .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
    let role = Role::parse(&role_raw).ok_or_else(|| StoreError::ConstraintViolation {
        field: "role".into(),
        value: role_raw,
    })?;
    let agent: Option<String> = row
        .try_get("agent_role")
        .map_err(|e| StoreError::QueryFailed(format!("agent_role column: {e}")))?;
    let content: String = row
        .try_get("content")
        .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
    let tokens: i64 = row.try_get("tokens").unwrap_or(0);
    let summarized: i64 = row
        .try_get("summarized")
        .map_err(|e| StoreError::QueryFailed(format!("summarized column: {e}")))?;
    let ts_raw: String = row
        .try_get("ts")
        .map_err(|e| StoreError::QueryFailed(format!("ts column: {e}")))?;

    Ok(Turn {
        id,
        session: SessionId(session),
        role,
        agent,
        content,
        tokens: tokens.max(0) as usize,
        summarized: summarized != 0,
        ts: parse_ts("turn", &ts_raw)?,
    })
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<Summary, StoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
    let session: String = row
        .try_get("session_id")
        .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
    let content: String = row
        .try_get("content")
        .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
    let range_raw: String = row
        .try_get("turn_range")
        .map_err(|e| StoreError::QueryFailed(format!("turn_range column: {e}")))?;
    let range = TurnRange::parse(&range_raw).ok_or_else(|| StoreError::ConstraintViolation {
        field: "turn_range".into(),
        value: range_raw,
    })?;
    let ts_raw: String = row
        .try_get("ts")
        .map_err(|e| StoreError::QueryFailed(format!("ts column: {e}")))?;

    Ok(Summary {
        id,
        session: SessionId(session),
        content,
        range,
        ts: parse_ts("summary", &ts_raw)?,
    })
}
