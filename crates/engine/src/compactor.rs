//! Compaction: fold old turns into durable memory.
//!
//! One run walks a fixed phase order — Extracting, Merging, Reindexing —
//! and is single-flight per session: a trigger that arrives while a run is
//! already active for the same session coalesces into it instead of
//! starting a second one.
//!
//! Write ordering is the safety argument. The daily log and the permanent
//! document are written first; the summary row and the summarized flags
//! flip in one SQLite transaction only after those writes succeed. A crash
//! at any point leaves the turns unsummarized and the next run repeats the
//! work (duplicate daily-log blocks are possible, silent data loss is not).

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_config::CompactionConfig;
use strata_core::{CompactError, Error, ExtractedFacts, Result, SessionId, TurnRange};
use strata_index::Indexer;
use strata_store::{DailyLog, PermanentDocument, SqliteStore};
use tracing::{debug, info, warn};

use crate::extract::FactExtractor;

/// How a compaction trigger resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionOutcome {
    /// Turns were processed and durably summarized.
    Completed,
    /// No unsummarized turns were waiting.
    NothingToDo,
    /// A run for this session was already in flight; this trigger folded
    /// into it and processed zero turns itself.
    Coalesced,
}

/// Structured result of one compaction trigger.
#[derive(Debug, Clone, Serialize)]
pub struct CompactionReport {
    pub outcome: CompactionOutcome,
    pub turns_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<TurnRange>,
    /// Permanent-document sections whose content actually changed.
    pub sections_touched: Vec<String>,
    pub document_changed: bool,
}

impl CompactionReport {
    fn empty(outcome: CompactionOutcome) -> Self {
        Self {
            outcome,
            turns_processed: 0,
            range: None,
            sections_touched: Vec::new(),
            document_changed: false,
        }
    }
}

pub struct Compactor {
    store: Arc<SqliteStore>,
    daily_log: DailyLog,
    permanent: PermanentDocument,
    indexer: Arc<Indexer>,
    extractor: Arc<dyn FactExtractor>,
    config: CompactionConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl Compactor {
    pub fn new(
        store: Arc<SqliteStore>,
        daily_log: DailyLog,
        permanent: PermanentDocument,
        indexer: Arc<Indexer>,
        extractor: Arc<dyn FactExtractor>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            store,
            daily_log,
            permanent,
            indexer,
            extractor,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one compaction for `session`. Processes every unsummarized turn
    /// present when the run starts; an immediate re-trigger finds nothing.
    pub async fn run(&self, session: &SessionId) -> Result<CompactionReport> {
        let _guard = match self.try_acquire(session) {
            Some(g) => g,
            None => {
                debug!(session = %session, "compaction already in flight, coalescing");
                return Ok(CompactionReport::empty(CompactionOutcome::Coalesced));
            }
        };

        let turns = self.store.unsummarized_turns(session).await?;
        let Some(range) = TurnRange::covering(&turns) else {
            return Ok(CompactionReport::empty(CompactionOutcome::NothingToDo));
        };

        debug!(session = %session, %range, phase = "extracting", "compaction started");
        let facts = self.extractor.extract(&turns).await?;

        debug!(session = %session, phase = "merging", "facts extracted");
        let (sections_touched, document_changed) = self.merge(&facts)?;

        // Durable document writes are in; now the atomic store flip
        let turn_ids: Vec<i64> = turns.iter().map(|t| t.id).collect();
        let summary_text = render_summary(&facts, range);
        self.store
            .record_summary(session, &summary_text, &turn_ids)
            .await?;

        if document_changed {
            debug!(session = %session, phase = "reindexing", "document changed");
            self.reindex_with_retry().await?;
        }

        info!(
            session = %session,
            turns = turns.len(),
            %range,
            document_changed,
            "compaction completed"
        );
        Ok(CompactionReport {
            outcome: CompactionOutcome::Completed,
            turns_processed: turns.len(),
            range: Some(range),
            sections_touched,
            document_changed,
        })
    }

    /// Daily-log blocks plus permanent-document merge. Returns the section
    /// headings that changed and whether the document changed at all.
    fn merge(&self, facts: &ExtractedFacts) -> Result<(Vec<String>, bool)> {
        let now = Utc::now();
        let mut touched = Vec::new();
        let mut changed = false;

        for (category, _) in facts.non_empty() {
            self.daily_log
                .append(now, category.heading(), &facts.render_category(category))
                .map_err(|e| CompactError::Merge(format!("daily log: {e}")))?;
        }

        for (category, statements) in facts.non_empty() {
            let existing = self
                .permanent
                .sections()
                .map_err(|e| CompactError::Merge(format!("read document: {e}")))?
                .into_iter()
                .find(|s| s.heading == category.heading())
                .map(|s| s.content)
                .unwrap_or_default();

            let merged = merge_bullets(&existing, statements);
            let wrote = self
                .permanent
                .upsert_section(category.heading(), &merged)
                .map_err(|e| CompactError::Merge(format!("write document: {e}")))?;
            if wrote {
                touched.push(category.heading().to_string());
                changed = true;
            }
        }
        Ok((touched, changed))
    }

    /// Rebuild the chunk index with bounded retries. The swap is atomic, so
    /// every failed attempt leaves the previous index fully readable; only
    /// after the last attempt is the failure surfaced.
    async fn reindex_with_retry(&self) -> Result<()> {
        let text = self
            .permanent
            .read_text()
            .map_err(|e| CompactError::Reindex(format!("read document: {e}")))?;

        let attempts = self.config.reindex_retries.max(1);
        for attempt in 1..=attempts {
            match self.indexer.reindex_permanent(&text).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "reindex failed, retrying");
                    tokio::time::sleep(Duration::from_millis(
                        self.config.reindex_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err(e) => {
                    return Err(Error::Compact(CompactError::Reindex(format!(
                        "gave up after {attempts} attempt(s): {e}"
                    ))));
                }
            }
        }
        Ok(())
    }

    fn try_acquire(&self, session: &SessionId) -> Option<FlightGuard<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(session.as_str().to_string()) {
            return None;
        }
        Some(FlightGuard {
            set: &self.in_flight,
            session: session.as_str().to_string(),
        })
    }
}

struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    session: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.session);
        }
    }
}

/// Normalized-text merge of new statements into an existing bullet list.
/// A statement that restates an existing bullet replaces it in place;
/// genuinely new statements append. Existing order is preserved.
fn merge_bullets(existing: &str, statements: &[String]) -> String {
    let mut bullets: Vec<String> = existing
        .lines()
        .filter_map(|l| l.trim().strip_prefix("- ").map(str::to_string))
        .collect();

    for statement in statements {
        let norm = normalize(statement);
        match bullets.iter().position(|b| normalize(b) == norm) {
            Some(i) => bullets[i] = statement.clone(),
            None => bullets.push(statement.clone()),
        }
    }
    bullets
        .iter()
        .map(|b| format!("- {b}\n"))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Equality key for de-duplication: lowercase, punctuation stripped,
/// whitespace collapsed.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_summary(facts: &ExtractedFacts, range: TurnRange) -> String {
    if facts.is_empty() {
        return format!("Turns {range}: no durable facts extracted.");
    }
    let mut out = format!("Summary of turns {range}:\n");
    for (category, _) in facts.non_empty() {
        out.push_str(&format!("\n{}:\n{}", category.heading(), facts.render_category(category)));
    }
    out.trim_end().to_string()
}
