//! Hybrid retrieval: normalized BM25 relevance blended with recency decay.
//!
//! Candidates come from both FTS indexes (turns and permanent chunks).
//! Raw BM25 ranks are min-max normalized across the whole candidate pool,
//! then combined with an exponential half-life recency term. Chunks carry
//! no timestamp and receive the neutral (maximum) recency term, so a
//! permanently-remembered fact never loses to an equally relevant but
//! merely newer turn on recency alone.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use strata_config::RetrievalConfig;
use strata_core::{IndexError, ScoredHit, SessionId, SourceId};
use strata_index::Indexer;
use tracing::debug;

pub struct Retriever {
    indexer: Arc<Indexer>,
    config: RetrievalConfig,
}

struct Candidate {
    source: SourceId,
    text: String,
    bm25: f64,
    ts: Option<DateTime<Utc>>,
}

impl Retriever {
    pub fn new(indexer: Arc<Indexer>, config: RetrievalConfig) -> Self {
        Self { indexer, config }
    }

    /// Search both indexes and return up to `limit` hits, best first.
    /// An empty result is a normal outcome, not an error.
    pub async fn search(
        &self,
        query: &str,
        session: Option<&SessionId>,
        limit: usize,
    ) -> Result<Vec<ScoredHit>, IndexError> {
        self.search_at(query, session, limit, Utc::now()).await
    }

    /// Same as [`search`](Self::search) with an explicit clock, so scoring
    /// is reproducible.
    pub async fn search_at(
        &self,
        query: &str,
        session: Option<&SessionId>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredHit>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let overfetch = limit.saturating_mul(self.config.overfetch_factor).max(limit);

        let turn_hits = self.indexer.search_turns(query, session, overfetch).await?;
        let chunk_hits = self.indexer.search_chunks(query, overfetch).await?;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(turn_hits.len() + chunk_hits.len());
        for hit in turn_hits {
            candidates.push(Candidate {
                source: SourceId::Turn(hit.turn_id),
                text: hit.content,
                bm25: hit.bm25,
                ts: Some(hit.ts),
            });
        }
        for hit in chunk_hits {
            candidates.push(Candidate {
                source: SourceId::Chunk(hit.chunk_id),
                text: hit.text,
                bm25: hit.bm25,
                ts: None,
            });
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = self.score(candidates, now);
        // Stable sort: equal scores keep recency order, then insertion order
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.ts.cmp(&a.ts))
        });
        hits.retain(|h| h.score >= self.config.min_score);
        hits.truncate(limit);

        debug!(query, results = hits.len(), "retrieval complete");
        Ok(hits)
    }

    fn score(&self, candidates: Vec<Candidate>, now: DateTime<Utc>) -> Vec<ScoredHit> {
        // BM25 ranks are negative, lower = more relevant. Min-max normalize
        // so the best candidate maps to 1.0 and the worst to 0.0; a single
        // candidate (or all-equal ranks) maps to 1.0.
        let best = candidates.iter().map(|c| c.bm25).fold(f64::INFINITY, f64::min);
        let worst = candidates
            .iter()
            .map(|c| c.bm25)
            .fold(f64::NEG_INFINITY, f64::max);
        let span = worst - best;

        candidates
            .into_iter()
            .map(|c| {
                let relevance = if span > 0.0 {
                    ((worst - c.bm25) / span) as f32
                } else {
                    1.0
                };
                let recency = match c.ts {
                    Some(ts) => {
                        let age_hours =
                            (now - ts).num_seconds().max(0) as f32 / 3600.0;
                        0.5_f32.powf(age_hours / self.config.recency_half_life_hours)
                    }
                    None => 1.0,
                };
                let score = self.config.lexical_weight * relevance
                    + self.config.recency_weight * recency;
                ScoredHit {
                    source: c.source,
                    text: c.text,
                    score,
                    ts: c.ts,
                }
            })
            .collect()
    }
}
